// src/model/measure.rs
use serde_json::Value;

use crate::model::cube::{count_star_source, SqlSource};
use crate::sql::expr::SortDir;

/// How a measure aggregates (or windows) its expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    /// No aggregation: the expression is selected as-is.
    Number,
    RowNumber,
    Rank,
    DenseRank,
    Lag,
    Lead,
    FirstValue,
    LastValue,
    Ntile,
    MovingAvg,
    MovingSum,
}

/// Whether a measure's values coerce to integers or floats when drivers
/// hand numbers back as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureValueKind {
    Integer,
    Float,
}

impl Aggregation {
    /// Window-family aggregations render with an OVER clause.
    pub fn is_window(&self) -> bool {
        matches!(
            self,
            Aggregation::RowNumber
                | Aggregation::Rank
                | Aggregation::DenseRank
                | Aggregation::Lag
                | Aggregation::Lead
                | Aggregation::FirstValue
                | Aggregation::LastValue
                | Aggregation::Ntile
                | Aggregation::MovingAvg
                | Aggregation::MovingSum
        )
    }

    /// Plain aggregations that force a GROUP BY over the other selections.
    pub fn is_aggregating(&self) -> bool {
        matches!(
            self,
            Aggregation::Count
                | Aggregation::CountDistinct
                | Aggregation::Sum
                | Aggregation::Avg
                | Aggregation::Min
                | Aggregation::Max
        )
    }

    /// SQL function name for the window family.
    pub fn window_function(&self) -> Option<&'static str> {
        match self {
            Aggregation::RowNumber => Some("ROW_NUMBER"),
            Aggregation::Rank => Some("RANK"),
            Aggregation::DenseRank => Some("DENSE_RANK"),
            Aggregation::Lag => Some("LAG"),
            Aggregation::Lead => Some("LEAD"),
            Aggregation::FirstValue => Some("FIRST_VALUE"),
            Aggregation::LastValue => Some("LAST_VALUE"),
            Aggregation::Ntile => Some("NTILE"),
            Aggregation::MovingAvg => Some("AVG"),
            Aggregation::MovingSum => Some("SUM"),
            _ => None,
        }
    }

    /// Window functions that take the measure expression as an argument.
    pub fn window_takes_expr(&self) -> bool {
        matches!(
            self,
            Aggregation::Lag
                | Aggregation::Lead
                | Aggregation::FirstValue
                | Aggregation::LastValue
                | Aggregation::MovingAvg
                | Aggregation::MovingSum
        )
    }

    /// Declared value kind, used for numeric post-processing of driver rows.
    pub fn value_kind(&self) -> MeasureValueKind {
        match self {
            Aggregation::Count
            | Aggregation::CountDistinct
            | Aggregation::RowNumber
            | Aggregation::Rank
            | Aggregation::DenseRank
            | Aggregation::Ntile => MeasureValueKind::Integer,
            _ => MeasureValueKind::Float,
        }
    }

    /// Wire name (Cube.js metadata spelling).
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "countDistinct",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Number => "number",
            Aggregation::RowNumber => "rowNumber",
            Aggregation::Rank => "rank",
            Aggregation::DenseRank => "denseRank",
            Aggregation::Lag => "lag",
            Aggregation::Lead => "lead",
            Aggregation::FirstValue => "firstValue",
            Aggregation::LastValue => "lastValue",
            Aggregation::Ntile => "ntile",
            Aggregation::MovingAvg => "movingAvg",
            Aggregation::MovingSum => "movingSum",
        }
    }
}

/// Window configuration for window-family measures.
#[derive(Debug, Clone, Default)]
pub struct WindowSpec {
    /// Dimension names (on the owning cube) to partition by.
    pub partition_by: Vec<String>,
    /// Dimension names with direction to order by within the window.
    pub order_by: Vec<(String, SortDir)>,
    /// Offset for lag/lead.
    pub offset: Option<i64>,
    /// Default value for lag/lead.
    pub default_value: Option<Value>,
    /// Bucket count for ntile.
    pub n_tile: Option<i64>,
    /// Optional frame clause.
    pub frame: Option<FrameSpec>,
}

impl WindowSpec {
    pub fn partition_by(mut self, dimensions: Vec<&str>) -> Self {
        self.partition_by = dimensions.into_iter().map(String::from).collect();
        self
    }

    pub fn order_by(mut self, fields: Vec<(&str, SortDir)>) -> Self {
        self.order_by = fields.into_iter().map(|(f, d)| (f.into(), d)).collect();
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn n_tile(mut self, n: i64) -> Self {
        self.n_tile = Some(n);
        self
    }

    pub fn frame(mut self, frame: FrameSpec) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Frame clause: `ROWS|RANGE BETWEEN <start> AND <end>`.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub kind: FrameKind,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Rows,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    Unbounded,
    Current,
    /// Row/range offset; negative values precede, positive follow.
    Offset(i64),
}

/// A measure definition.
#[derive(Debug, Clone)]
pub struct Measure {
    pub aggregation: Aggregation,
    pub sql: SqlSource,
    /// Optional predicates ANDed into a CASE wrapper for conditional
    /// aggregation.
    pub filters: Vec<SqlSource>,
    pub window: Option<WindowSpec>,
    pub title: Option<String>,
    pub format: Option<String>,
}

impl Measure {
    fn new(aggregation: Aggregation, sql: SqlSource) -> Self {
        Self {
            aggregation,
            sql,
            filters: vec![],
            window: None,
            title: None,
            format: None,
        }
    }

    /// COUNT(*) unless a filter forces a CASE expression.
    pub fn count() -> Self {
        Self::new(Aggregation::Count, count_star_source())
    }

    pub fn count_distinct(sql: impl Into<SqlSource>) -> Self {
        Self::new(Aggregation::CountDistinct, sql.into())
    }

    pub fn sum(sql: impl Into<SqlSource>) -> Self {
        Self::new(Aggregation::Sum, sql.into())
    }

    pub fn avg(sql: impl Into<SqlSource>) -> Self {
        Self::new(Aggregation::Avg, sql.into())
    }

    pub fn min(sql: impl Into<SqlSource>) -> Self {
        Self::new(Aggregation::Min, sql.into())
    }

    pub fn max(sql: impl Into<SqlSource>) -> Self {
        Self::new(Aggregation::Max, sql.into())
    }

    /// Unaggregated expression measure.
    pub fn number(sql: impl Into<SqlSource>) -> Self {
        Self::new(Aggregation::Number, sql.into())
    }

    /// A window-family measure. `sql` is ignored for the argument-less
    /// functions (rowNumber, rank, denseRank, ntile).
    pub fn window(aggregation: Aggregation, sql: impl Into<SqlSource>) -> Self {
        Self::new(aggregation, sql.into())
    }

    /// Add a conditional-aggregation predicate.
    pub fn filter(mut self, predicate: impl Into<SqlSource>) -> Self {
        self.filters.push(predicate.into());
        self
    }

    pub fn window_spec(mut self, spec: WindowSpec) -> Self {
        self.window = Some(spec);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.into());
        self
    }
}
