//! Parse-back checks for emitted SQL.

use sqlparser::dialect::{
    DuckDbDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

use super::dialect::Dialect;

fn parser_dialect(dialect: Dialect) -> Box<dyn sqlparser::dialect::Dialect> {
    match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Parse `sql` with the sqlparser dialect matching `dialect`.
pub fn validate_sql(sql: &str, dialect: Dialect) -> Result<(), String> {
    Parser::parse_sql(&*parser_dialect(dialect), sql)
        .map(|_| ())
        .map_err(|e| format!("{dialect} rejected generated SQL: {e}\n{sql}"))
}

/// Parse every statement in `statements`, reporting the first failure.
pub fn validate_all<'a>(statements: impl IntoIterator<Item = &'a str>, dialect: Dialect) -> Result<(), String> {
    statements
        .into_iter()
        .try_for_each(|sql| validate_sql(sql, dialect))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting_styles_parse() {
        validate_sql("SELECT \"k0\" FROM \"stg_a\"", Dialect::Postgres).unwrap();
        validate_sql("SELECT `k0` FROM `stg_a`", Dialect::MySql).unwrap();
        validate_sql("SELECT [k0] FROM [stg_a]", Dialect::TSql).unwrap();
        validate_all(["SELECT 1", "SELECT COUNT(*) AS n FROM t"], Dialect::Sqlite).unwrap();
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(validate_sql("SELEC * FORM t", Dialect::DuckDb).is_err());
        assert!(validate_all(["SELECT 1", "DROP"], Dialect::Postgres).is_err());
    }
}
