//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features:
//! - ANSI identifier quoting (`"`)
//! - Native boolean type (true/false)
//! - `$1, $2, …` bind-parameter markers
//! - ILIKE for case-insensitive matching
//! - DATE_TRUNC for date truncation
//! - Full window-function and frame-clause support

use super::helpers;
use super::{BooleanRepresentation, DialectCapabilities, SqlDialect, StringConditionOp};
use crate::semantic::time::Granularity;
use crate::sql::expr::{func, lit_str, Expr, ExprExt};

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn placeholder(&self, idx: usize) -> String {
        format!("${}", idx + 1)
    }

    fn string_condition(&self, expr: Expr, op: StringConditionOp, pattern: Expr) -> Expr {
        let matched = expr.ilike(pattern);
        match op {
            StringConditionOp::NotContains => matched.not(),
            _ => matched,
        }
    }

    fn time_trunc(&self, granularity: Granularity, expr: Expr) -> Expr {
        func("DATE_TRUNC", vec![lit_str(granularity.as_str()), expr])
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            supports_window_functions: true,
            supports_frame_clause: true,
            supports_cte: true,
            date_type: "timestamp",
            boolean_representation: BooleanRepresentation::TrueFalse,
        }
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_postgres(name)
    }
}
