//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting (`` `name` ``)
//! - Boolean is TINYINT(1), literals render as 1/0
//! - `||` is logical OR by default (use CONCAT())
//! - `?` bind-parameter markers
//! - Case-insensitivity via LOWER() folding
//! - Date truncation via DATE_FORMAT and calendar arithmetic
//! - Window functions and frames from 8.0

use super::helpers;
use super::{BooleanRepresentation, DialectCapabilities, SqlDialect};
use crate::semantic::time::Granularity;
use crate::sql::expr::{func, lit_int, lit_str, BinaryOperator, Expr};

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn supports_concat_operator(&self) -> bool {
        // MySQL || is OR by default, use CONCAT() instead
        false
    }

    // Uses default string_condition (LOWER() LIKE LOWER())

    fn time_trunc(&self, granularity: Granularity, expr: Expr) -> Expr {
        let fmt = |e: Expr, pattern: &str| func("DATE_FORMAT", vec![e, lit_str(pattern)]);
        match granularity {
            Granularity::Year => fmt(expr, "%Y-01-01 00:00:00"),
            Granularity::Month => fmt(expr, "%Y-%m-01 00:00:00"),
            Granularity::Day => fmt(expr, "%Y-%m-%d 00:00:00"),
            Granularity::Hour => fmt(expr, "%Y-%m-%d %H:00:00"),
            Granularity::Minute => fmt(expr, "%Y-%m-%d %H:%i:00"),
            Granularity::Second => fmt(expr, "%Y-%m-%d %H:%i:%s"),
            // Monday-start weeks: %x-%v is the ISO year-week pair
            Granularity::Week => func(
                "STR_TO_DATE",
                vec![
                    func(
                        "CONCAT",
                        vec![fmt(expr, "%x-%v"), lit_str(" Monday")],
                    ),
                    lit_str("%x-%v %W"),
                ],
            ),
            Granularity::Quarter => {
                // Quarter start month is q*3-2; %c parses the unpadded month
                let start_month = Expr::Paren(Box::new(Expr::BinaryOp {
                    left: Box::new(Expr::BinaryOp {
                        left: Box::new(func("QUARTER", vec![expr.clone()])),
                        op: BinaryOperator::Mul,
                        right: Box::new(lit_int(3)),
                    }),
                    op: BinaryOperator::Minus,
                    right: Box::new(lit_int(2)),
                }));
                func(
                    "STR_TO_DATE",
                    vec![
                        func(
                            "CONCAT",
                            vec![
                                func("YEAR", vec![expr]),
                                lit_str("-"),
                                start_month,
                                lit_str("-01"),
                            ],
                        ),
                        lit_str("%Y-%c-%d"),
                    ],
                )
            }
        }
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            supports_window_functions: true,
            supports_frame_clause: true,
            supports_cte: true,
            date_type: "datetime",
            boolean_representation: BooleanRepresentation::OneZero,
        }
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }
}
