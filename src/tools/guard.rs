//! Statement policy for the `query` tool.
//!
//! SQL is parsed with sqlparser and classified on the AST, so DDL cannot be
//! smuggled past the check through casing, comments or formatting. Unparsable
//! SQL is rejected outright.

use crate::config::DatabaseKind;
use crate::error::{AdsError, AdsResult};
use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// What an allowed statement does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces rows
    Query,
    /// Anything else (INSERT, UPDATE, CREATE, ...); reports affected rows
    Write,
}

fn dialect(kind: DatabaseKind) -> Box<dyn Dialect> {
    match kind {
        DatabaseKind::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseKind::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Check `sql` against the policy and classify it.
///
/// ```
/// use ads_mcp_server::config::DatabaseKind;
/// use ads_mcp_server::tools::guard::{check_statement, StatementKind};
///
/// let kind = check_statement("SELECT * FROM campaigns", DatabaseKind::Postgres).unwrap();
/// assert_eq!(kind, StatementKind::Query);
///
/// assert!(check_statement("DROP TABLE campaigns", DatabaseKind::Postgres).is_err());
/// ```
pub fn check_statement(sql: &str, kind: DatabaseKind) -> AdsResult<StatementKind> {
    let dialect = dialect(kind);
    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| AdsError::invalid_input(format!("Failed to parse SQL statement: {}", e)))?;

    let statement = match statements.as_slice() {
        [] => return Err(AdsError::invalid_input("Empty SQL statement")),
        [statement] => statement,
        _ => {
            return Err(AdsError::invalid_input(
                "Multiple statements are not allowed; send one statement per call",
            ));
        }
    };

    if let Some(operation) = blocked_operation(statement) {
        return Err(AdsError::blocked(operation));
    }

    Ok(match statement {
        Statement::Query(_) => StatementKind::Query,
        _ => StatementKind::Write,
    })
}

fn blocked_operation(statement: &Statement) -> Option<&'static str> {
    match statement {
        Statement::Drop { .. }
        | Statement::DropFunction { .. }
        | Statement::DropProcedure { .. }
        | Statement::DropTrigger { .. }
        | Statement::DropPolicy { .. } => Some("DROP"),
        Statement::Truncate { .. } => Some("TRUNCATE"),
        Statement::AlterTable { .. }
        | Statement::AlterIndex { .. }
        | Statement::AlterView { .. }
        | Statement::AlterSchema { .. }
        | Statement::AlterRole { .. }
        | Statement::AlterPolicy { .. }
        | Statement::AlterType { .. } => Some("ALTER"),
        _ => None,
    }
}
