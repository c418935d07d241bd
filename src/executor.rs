//! The database-executor boundary.
//!
//! The compiler produces a [`SqlObject`] and hands it to an executor; the
//! executor owns connections, prepared statements, and the driver's
//! placeholder mechanism. Parameters must be passed through the driver -
//! never concatenated into the SQL text.

use async_trait::async_trait;

use crate::error::CompilerResult;
use crate::sql::dialect::DialectCapabilities;
use crate::sql::params::SqlObject;
use crate::sql::Dialect;

/// A result row: qualified output name to scalar JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// The database engine behind an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineType {
    Postgres,
    MySql,
    Sqlite,
}

impl EngineType {
    pub fn dialect(&self) -> Dialect {
        match self {
            EngineType::Postgres => Dialect::Postgres,
            EngineType::MySql => Dialect::MySql,
            EngineType::Sqlite => Dialect::Sqlite,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineType::Postgres => "postgres",
            EngineType::MySql => "mysql",
            EngineType::Sqlite => "sqlite",
        }
    }
}

/// Executes parameterized SQL against a relational database.
///
/// Implementations wrap a driver/pool; synchronous drivers (SQLite)
/// implement the same interface by wrapping the blocking call.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Run one statement and return its rows.
    async fn execute(&self, sql: &SqlObject) -> CompilerResult<Vec<Row>>;

    /// The engine this executor talks to.
    fn engine_type(&self) -> EngineType;

    /// Dialect capabilities, defaulting to the engine's dialect flags.
    fn capabilities(&self) -> DialectCapabilities {
        use crate::sql::SqlDialect;
        self.engine_type().dialect().capabilities()
    }
}
