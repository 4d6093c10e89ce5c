//! Statement parser for the SQL shell. One statement per input, optionally
//! terminated by `;`. Keywords are case-insensitive; string literals use
//! single quotes; integers may be negative.

use chumsky::prelude::*;
use strata::FieldType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    CreateTable {
        name: String,
        columns: Vec<ColumnDef>,
    },
    DropTable(String),
    Insert {
        table: String,
        values: Vec<String>,
    },
    Select {
        table: String,
        filter: Option<Filter>,
    },
    Delete {
        table: String,
        field: String,
        value: String,
    },
    Update {
        table: String,
        assignments: Vec<(String, String)>,
        key_field: String,
        key_value: String,
    },
    Begin,
    Commit,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: FieldType,
    pub len: usize,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq(String, String),
    Ge(String, String),
    Le(String, String),
    Between(String, String, String),
}

fn kw(word: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |s: String, span| {
            if s.eq_ignore_ascii_case(word) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected {word}")))
            }
        })
        .padded()
}

fn ident() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    text::ident().padded()
}

fn literal() -> impl Parser<char, String, Error = Simple<char>> + Clone {
    let string = just('\'')
        .ignore_then(filter(|c: &char| *c != '\'').repeated().collect::<String>())
        .then_ignore(just('\''));
    let number = just('-')
        .or_not()
        .then(text::digits(10))
        .map(|(neg, digits): (Option<char>, String)| match neg {
            Some(_) => format!("-{digits}"),
            None => digits,
        });
    string.or(number).padded()
}

fn column_def() -> impl Parser<char, ColumnDef, Error = Simple<char>> + Clone {
    let length = text::int(10)
        .delimited_by(just('(').padded(), just(')').padded())
        .map(|digits: String| digits.parse::<usize>().unwrap_or(0));

    let col_type = kw("int")
        .ignore_then(length.clone().or_not())
        .map(|len| (FieldType::Int, len.unwrap_or(4)))
        .or(kw("string").ignore_then(length).map(|len| (FieldType::Str, len)));

    ident()
        .then(col_type)
        .then(kw("unique").to(true).or_not())
        .map(|((name, (ty, len)), unique)| ColumnDef {
            name,
            ty,
            len,
            unique: unique.unwrap_or(false),
        })
}

fn statement() -> impl Parser<char, Statement, Error = Simple<char>> {
    let create = kw("create")
        .ignore_then(kw("table"))
        .ignore_then(ident())
        .then(
            column_def()
                .separated_by(just(',').padded())
                .at_least(1)
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(name, columns)| Statement::CreateTable { name, columns });

    let drop = kw("drop")
        .ignore_then(kw("table"))
        .ignore_then(ident())
        .map(Statement::DropTable);

    let insert = kw("insert")
        .ignore_then(kw("into"))
        .ignore_then(ident())
        .then_ignore(kw("values"))
        .then(
            literal()
                .separated_by(just(',').padded())
                .at_least(1)
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table, values)| Statement::Insert { table, values });

    let between = ident()
        .then_ignore(kw("between"))
        .then(literal())
        .then_ignore(kw("and"))
        .then(literal())
        .map(|((field, low), high)| Filter::Between(field, low, high));
    let comparison = ident()
        .then(
            just(">=")
                .to(">=")
                .or(just("<=").to("<="))
                .or(just("=").to("="))
                .padded(),
        )
        .then(literal())
        .map(|((field, op), value)| match op {
            ">=" => Filter::Ge(field, value),
            "<=" => Filter::Le(field, value),
            _ => Filter::Eq(field, value),
        });
    let condition = between.or(comparison);

    let select = kw("select")
        .ignore_then(just('*').padded())
        .ignore_then(kw("from"))
        .ignore_then(ident())
        .then(kw("where").ignore_then(condition).or_not())
        .map(|(table, filter)| Statement::Select { table, filter });

    let equality = ident()
        .then_ignore(just('=').padded())
        .then(literal());

    let delete = kw("delete")
        .ignore_then(kw("from"))
        .ignore_then(ident())
        .then_ignore(kw("where"))
        .then(equality.clone())
        .map(|(table, (field, value))| Statement::Delete {
            table,
            field,
            value,
        });

    let update = kw("update")
        .ignore_then(ident())
        .then_ignore(kw("set"))
        .then(equality.clone().separated_by(just(',').padded()).at_least(1))
        .then_ignore(kw("where"))
        .then(equality)
        .map(|((table, assignments), (key_field, key_value))| Statement::Update {
            table,
            assignments,
            key_field,
            key_value,
        });

    let begin = kw("begin").to(Statement::Begin);
    let commit = kw("commit").to(Statement::Commit);
    let abort = kw("abort").or(kw("rollback")).to(Statement::Abort);

    choice((
        create, drop, insert, select, delete, update, begin, commit, abort,
    ))
    .then_ignore(just(';').padded().or_not())
    .then_ignore(end())
}

/// Parse one statement.
pub fn parse(input: &str) -> Result<Statement, String> {
    statement().parse(input).map_err(|errors| {
        errors
            .into_iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    })
}
