//! SQL generation module.
//!
//! This module provides a type-safe SQL builder that generates multi-dialect,
//! parameterized SQL. It includes:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`params`] - Bind parameters and the compiled SQL object
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod params;
pub mod query;
pub mod token;

// Re-export commonly used types at the sql module level
pub use dialect::{
    AggregateFn, BooleanRepresentation, Dialect, DialectCapabilities, SqlDialect,
    StringConditionOp,
};
pub use expr::{
    and_all, avg, col, count, count_distinct, count_star, func, lit_bool, lit_float, lit_int,
    lit_null, lit_str, max, min, or_all, param, star, sum, table_col, BinaryOperator, Expr,
    ExprExt, Literal, SortDir, UnaryOperator, WindowFrame, WindowFrameBound, WindowFrameKind,
    WindowOrderBy,
};
pub use params::{ParamBinder, ParamValue, SqlObject};
pub use query::{Cte, Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, TableRef};
pub use token::{Token, TokenStream};
