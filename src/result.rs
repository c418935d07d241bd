//! Typed results and annotation metadata.
//!
//! Rows come back from drivers as JSON-ish maps; the annotator attaches
//! per-field metadata (titles, types, formats, granularities, comparison
//! periods) and coerces numeric strings into numbers keyed by each
//! measure's declared aggregation - PostgreSQL returns COUNT/SUM as
//! strings.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::executor::Row;
use crate::model::MeasureValueKind;
use crate::registry::{default_title, short_title, CubeRegistry};
use crate::semantic::query::{MemberRef, SemanticQuery};

/// Row keys carrying comparison-period metadata.
pub const PERIOD_KEY: &str = "__period";
pub const PERIOD_INDEX_KEY: &str = "__periodIndex";
pub const PERIOD_DAY_INDEX_KEY: &str = "__periodDayIndex";

/// The kind of query a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "regularQuery")]
    Regular,
    #[serde(rename = "compareDateRangeQuery")]
    CompareDateRange,
}

/// Per-field metadata in the result annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAnnotation {
    pub title: String,
    pub short_title: String,
    #[serde(rename = "type")]
    pub member_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<String>,
}

/// Comparison-period metadata: one range/label pair per period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodsAnnotation {
    pub ranges: Vec<Vec<String>>,
    pub labels: Vec<String>,
}

/// Result annotation: field metadata keyed by qualified name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub measures: BTreeMap<String, FieldAnnotation>,
    pub dimensions: BTreeMap<String, FieldAnnotation>,
    pub time_dimensions: BTreeMap<String, FieldAnnotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periods: Option<PeriodsAnnotation>,
}

/// A typed, annotated result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub query_type: QueryType,
    pub data: Vec<Row>,
    pub annotation: Annotation,
}

impl QueryResult {
    /// Wrap into the wire envelope consumed by API adapters.
    pub fn into_envelope(self, query: &SemanticQuery) -> ResultEnvelope {
        ResultEnvelope {
            query_type: self.query_type,
            results: vec![ResultItem {
                data: self.data,
                annotation: self.annotation,
                query: query.clone(),
                request_id: Uuid::new_v4().to_string(),
                last_refresh_time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            }],
        }
    }
}

/// Result wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub query_type: QueryType,
    pub results: Vec<ResultItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub data: Vec<Row>,
    pub annotation: Annotation,
    pub query: SemanticQuery,
    pub request_id: String,
    pub last_refresh_time: String,
}

/// Build the annotation for a query from registry metadata.
pub fn build_annotation(registry: &CubeRegistry, query: &SemanticQuery) -> Annotation {
    let mut annotation = Annotation::default();

    for member_name in &query.measures {
        if let Some((member, cube)) = lookup(registry, member_name) {
            if let Some(measure) = cube.measure(&member.field) {
                annotation.measures.insert(
                    member.qualified(),
                    FieldAnnotation {
                        title: measure
                            .title
                            .clone()
                            .unwrap_or_else(|| default_title(&member.cube, &member.field)),
                        short_title: short_title(&member.field),
                        member_type: measure.aggregation.as_str().into(),
                        format: measure.format.clone(),
                        granularity: None,
                    },
                );
            }
        }
    }

    for member_name in &query.dimensions {
        if let Some((member, cube)) = lookup(registry, member_name) {
            if let Some(dimension) = cube.dimension(&member.field) {
                annotation.dimensions.insert(
                    member.qualified(),
                    FieldAnnotation {
                        title: dimension
                            .title
                            .clone()
                            .unwrap_or_else(|| default_title(&member.cube, &member.field)),
                        short_title: short_title(&member.field),
                        member_type: dimension.dimension_type.as_str().into(),
                        format: dimension.format.clone(),
                        granularity: None,
                    },
                );
            }
        }
    }

    for td in &query.time_dimensions {
        if let Some((member, cube)) = lookup(registry, &td.dimension) {
            if let Some(dimension) = cube.dimension(&member.field) {
                annotation.time_dimensions.insert(
                    member.qualified(),
                    FieldAnnotation {
                        title: dimension
                            .title
                            .clone()
                            .unwrap_or_else(|| default_title(&member.cube, &member.field)),
                        short_title: short_title(&member.field),
                        member_type: dimension.dimension_type.as_str().into(),
                        format: dimension.format.clone(),
                        granularity: td.granularity.map(|g| g.as_str().into()),
                    },
                );
            }
        }
    }

    annotation
}

fn lookup(
    registry: &CubeRegistry,
    member_name: &str,
) -> Option<(MemberRef, std::sync::Arc<crate::model::Cube>)> {
    let member = MemberRef::parse(member_name)?;
    let cube = registry.get(&member.cube)?;
    Some((member, cube))
}

/// Coerce numeric-string measure values in place, keyed by each
/// measure's declared kind - never by string-pattern matching.
pub fn coerce_measure_values(registry: &CubeRegistry, query: &SemanticQuery, rows: &mut [Row]) {
    let kinds: Vec<(String, MeasureValueKind)> = query
        .measures
        .iter()
        .filter_map(|member_name| {
            let (member, cube) = lookup(registry, member_name)?;
            let measure = cube.measure(&member.field)?;
            Some((member.qualified(), measure.aggregation.value_kind()))
        })
        .collect();

    for row in rows.iter_mut() {
        for (alias, kind) in &kinds {
            if let Some(value) = row.get(alias) {
                if let Some(coerced) = coerce_value(value, *kind) {
                    row.insert(alias.clone(), coerced);
                }
            }
        }
    }
}

fn coerce_value(value: &Value, kind: MeasureValueKind) -> Option<Value> {
    let text = match value {
        Value::String(s) => s.as_str(),
        // Integer-kind floats from drivers collapse to integers.
        Value::Number(n) => {
            if kind == MeasureValueKind::Integer && !n.is_i64() {
                return n.as_f64().map(|f| Value::from(f as i64));
            }
            return None;
        }
        _ => return None,
    };
    match kind {
        MeasureValueKind::Integer => text
            .parse::<i64>()
            .ok()
            .map(Value::from)
            .or_else(|| text.parse::<f64>().ok().map(|f| Value::from(f as i64))),
        MeasureValueKind::Float => text.parse::<f64>().ok().map(Value::from),
    }
}
