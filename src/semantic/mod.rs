//! Semantic layer - query representation, validation, planning, and SQL building.
//!
//! This module is the pipeline between the wire-format query and the SQL
//! module:
//!
//! - [`query`] - the Cube.js-compatible semantic query types
//! - [`validate`] - collecting query validator
//! - [`time`] - granularity arithmetic and date-range normalization
//! - [`filters`] - recursive filter normalization into expressions
//! - [`join_graph`] - BFS join-path resolution over the cube graph
//! - [`planner`] - primary-cube selection and pre-aggregation decisions
//! - [`builder`] - plan + query → one parameterized SQL object
//! - [`compare`] - compareDateRange period handling

pub mod builder;
pub mod compare;
pub mod filters;
pub mod join_graph;
pub mod planner;
pub mod query;
pub mod time;
pub mod validate;

pub use builder::build_sql;
pub use join_graph::{JoinGraph, JoinStep};
pub use planner::{plan_query, QueryPlan};
pub use query::{
    DateRangeInput, Filter, FilterCondition, MemberRef, OrderDirection, OrderSpec, SemanticQuery,
    TimeDimensionRef,
};
pub use time::Granularity;
pub use validate::{validate_query, ValidationResult};
