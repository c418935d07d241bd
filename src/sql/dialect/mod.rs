//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (PostgreSQL/SQLite), `` ` `` (MySQL)
//! - Bind-parameter placeholders: `$1,$2,…` (PostgreSQL) vs `?` (MySQL/SQLite)
//! - Boolean literals: true/false vs 1/0
//! - Case-insensitive string matching: ILIKE vs LOWER() LIKE LOWER()
//! - Date truncation: DATE_TRUNC vs DATE_FORMAT vs strftime
//! - Capability flags (window functions, frame clauses, CTEs)
//!
//! # Usage
//!
//! ```ignore
//! use strata::sql::dialect::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! let marker = dialect.placeholder(0);            // $1
//! ```

pub mod helpers;
mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;

use super::expr::Expr;
use super::token::TokenStream;
use crate::semantic::time::Granularity;

/// How a dialect represents booleans in result sets and literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanRepresentation {
    /// Native TRUE/FALSE literals (PostgreSQL).
    TrueFalse,
    /// Numeric 1/0 (MySQL, SQLite).
    OneZero,
}

/// Capability flags the planner and builder consult before emitting SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    pub supports_window_functions: bool,
    pub supports_frame_clause: bool,
    pub supports_cte: bool,
    /// Column type the dialect stores datetimes as (informational).
    pub date_type: &'static str,
    pub boolean_representation: BooleanRepresentation,
}

/// Case-insensitive string-matching operators the filter layer dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringConditionOp {
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

/// Aggregate functions the builder renders through the dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// - PostgreSQL/SQLite: `"identifier"`
    /// - MySQL: `` `identifier` ``
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str;

    // =========================================================================
    // Bind Parameters
    // =========================================================================

    /// Render the marker for the bind parameter at `idx` (0-based).
    ///
    /// - PostgreSQL: `$1`, `$2`, …
    /// - MySQL/SQLite: `?`
    fn placeholder(&self, idx: usize) -> String {
        let _ = idx;
        "?".into()
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET with bound-parameter markers.
    ///
    /// All supported dialects accept `LIMIT ? OFFSET ?`.
    fn emit_limit_offset(&self, limit: Option<usize>, offset: Option<usize>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    // =========================================================================
    // Operators
    // =========================================================================

    /// String concatenation operator.
    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Whether this dialect supports the `||` concat operator.
    ///
    /// MySQL uses `||` as logical OR by default.
    fn supports_concat_operator(&self) -> bool {
        true
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Render an aggregate over an expression.
    fn aggregate(&self, agg: AggregateFn, expr: Expr) -> Expr {
        use super::expr;
        match agg {
            AggregateFn::Count => expr::count(expr),
            AggregateFn::CountDistinct => expr::count_distinct(expr),
            AggregateFn::Sum => expr::sum(expr),
            AggregateFn::Avg => expr::avg(expr),
            AggregateFn::Min => expr::min(expr),
            AggregateFn::Max => expr::max(expr),
        }
    }

    // =========================================================================
    // String Matching
    // =========================================================================

    /// Build a case-insensitive string condition.
    ///
    /// `pattern` is a bind-parameter expression carrying the ready LIKE
    /// pattern (`%v%`, `v%`, `%v`); the value itself never reaches the SQL
    /// text. The default folds both sides with LOWER(), which is correct
    /// for MySQL and SQLite; PostgreSQL overrides with ILIKE.
    fn string_condition(&self, expr: Expr, op: StringConditionOp, pattern: Expr) -> Expr {
        use super::expr::{func, ExprExt};
        let folded = func("LOWER", vec![expr]).like(func("LOWER", vec![pattern]));
        match op {
            StringConditionOp::NotContains => folded.not(),
            _ => folded,
        }
    }

    // =========================================================================
    // Date/Time
    // =========================================================================

    /// Truncate a datetime expression to the given granularity.
    fn time_trunc(&self, granularity: Granularity, expr: Expr) -> Expr;

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Capability flags consulted before emitting dialect-gated SQL.
    fn capabilities(&self) -> DialectCapabilities;

    // =========================================================================
    // Function Remapping
    // =========================================================================

    /// Remap a function name for this dialect.
    ///
    /// Different databases use different names for the same functions:
    /// - `STRFTIME` → `TO_CHAR` (PostgreSQL) / `DATE_FORMAT` (MySQL)
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None`
    /// to keep the original. The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::Sqlite => &Sqlite,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn placeholder(&self, idx: usize) -> String {
        self.dialect().placeholder(idx)
    }

    fn emit_limit_offset(&self, limit: Option<usize>, offset: Option<usize>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn concat_operator(&self) -> &'static str {
        self.dialect().concat_operator()
    }

    fn supports_concat_operator(&self) -> bool {
        self.dialect().supports_concat_operator()
    }

    fn aggregate(&self, agg: AggregateFn, expr: Expr) -> Expr {
        self.dialect().aggregate(agg, expr)
    }

    fn string_condition(&self, expr: Expr, op: StringConditionOp, pattern: Expr) -> Expr {
        self.dialect().string_condition(expr, op, pattern)
    }

    fn time_trunc(&self, granularity: Granularity, expr: Expr) -> Expr {
        self.dialect().time_trunc(granularity, expr)
    }

    fn capabilities(&self) -> DialectCapabilities {
        self.dialect().capabilities()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}
