// src/model/dimension.rs
use serde::{Deserialize, Serialize};

use crate::model::cube::SqlSource;

/// The value type of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionType {
    String,
    Number,
    Time,
    Boolean,
}

impl DimensionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionType::String => "string",
            DimensionType::Number => "number",
            DimensionType::Time => "time",
            DimensionType::Boolean => "boolean",
        }
    }
}

/// A dimension: a categorical or time attribute usable in grouping,
/// ordering, and filters.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub dimension_type: DimensionType,
    pub sql: SqlSource,
    pub primary_key: bool,
    pub format: Option<String>,
    pub title: Option<String>,
}

impl Dimension {
    fn new(dimension_type: DimensionType, sql: impl Into<SqlSource>) -> Self {
        Self {
            dimension_type,
            sql: sql.into(),
            primary_key: false,
            format: None,
            title: None,
        }
    }

    pub fn string(sql: impl Into<SqlSource>) -> Self {
        Self::new(DimensionType::String, sql)
    }

    pub fn number(sql: impl Into<SqlSource>) -> Self {
        Self::new(DimensionType::Number, sql)
    }

    pub fn time(sql: impl Into<SqlSource>) -> Self {
        Self::new(DimensionType::Time, sql)
    }

    pub fn boolean(sql: impl Into<SqlSource>) -> Self {
        Self::new(DimensionType::Boolean, sql)
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.into());
        self
    }
}
