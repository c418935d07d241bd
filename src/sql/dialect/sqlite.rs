//! SQLite SQL dialect.
//!
//! SQLite differences from ANSI:
//! - ANSI identifier quoting (`"`)
//! - Boolean stored as INTEGER, literals render as 1/0
//! - `?` bind-parameter markers
//! - Case-insensitivity via LOWER() folding (LIKE is ASCII-insensitive
//!   only for ASCII; folding keeps behavior consistent across dialects)
//! - Date truncation via strftime/date modifiers
//! - Window functions and frames from 3.25

use super::helpers;
use super::{BooleanRepresentation, DialectCapabilities, SqlDialect, StringConditionOp};
use crate::semantic::time::Granularity;
use crate::sql::expr::{func, lit_str, Expr, ExprExt};

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    /// SQLite's LIKE has no default escape character, so the wildcard
    /// escaping in bound patterns needs an explicit ESCAPE clause.
    fn string_condition(&self, expr: Expr, op: StringConditionOp, pattern: Expr) -> Expr {
        Expr::LikeEscape {
            expr: Box::new(func("LOWER", vec![expr])),
            pattern: Box::new(func("LOWER", vec![pattern])),
            escape_char: '\\',
            negated: matches!(op, StringConditionOp::NotContains),
        }
    }

    fn time_trunc(&self, granularity: Granularity, expr: Expr) -> Expr {
        let fmt = |e: Expr, pattern: &str| func("STRFTIME", vec![lit_str(pattern), e]);
        match granularity {
            Granularity::Year => fmt(expr, "%Y-01-01 00:00:00"),
            Granularity::Month => fmt(expr, "%Y-%m-01 00:00:00"),
            Granularity::Day => fmt(expr, "%Y-%m-%d 00:00:00"),
            Granularity::Hour => fmt(expr, "%Y-%m-%d %H:00:00"),
            Granularity::Minute => fmt(expr, "%Y-%m-%d %H:%M:00"),
            Granularity::Second => fmt(expr, "%Y-%m-%d %H:%M:%S"),
            // 'weekday 0' advances to the next Sunday (or stays on one),
            // so minus six days always lands on the Monday of the week.
            Granularity::Week => func(
                "DATE",
                vec![expr, lit_str("weekday 0"), lit_str("-6 days")],
            ),
            Granularity::Quarter => {
                // Zero-padded month strings compare lexicographically.
                let month = fmt(expr.clone(), "%m");
                let suffix = Expr::Case {
                    when_clauses: vec![
                        (month.clone().lte(lit_str("03")), lit_str("-01-01 00:00:00")),
                        (month.clone().lte(lit_str("06")), lit_str("-04-01 00:00:00")),
                        (month.lte(lit_str("09")), lit_str("-07-01 00:00:00")),
                    ],
                    else_clause: Some(Box::new(lit_str("-10-01 00:00:00"))),
                };
                fmt(expr, "%Y").concat(suffix)
            }
        }
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            supports_window_functions: true,
            supports_frame_clause: true,
            supports_cte: true,
            date_type: "text",
            boolean_representation: BooleanRepresentation::OneZero,
        }
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_sqlite(name)
    }
}
