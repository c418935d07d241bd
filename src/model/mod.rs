//! Cube metadata model.
//!
//! Cubes are named logical datasets defined at process startup: a base
//! query carrying the tenant predicate, plus dimensions, measures, and
//! declared joins to other cubes. Definitions are immutable once
//! registered.

pub mod cube;
pub mod dimension;
pub mod join;
pub mod measure;

pub use cube::{
    define_cube, BaseJoin, BaseQuery, Cube, CubeBuilder, QueryContext, SecurityContext, SqlSource,
};
pub use dimension::{Dimension, DimensionType};
pub use join::{CubeJoin, JoinKey, Relationship};
pub use measure::{Aggregation, FrameBound, FrameKind, FrameSpec, Measure, MeasureValueKind, WindowSpec};
