//! Semantic query types - the Cube.js-compatible wire representation.
//!
//! A semantic query references cube members by qualified name
//! (`"Cube.field"`) and is fully JSON-serializable. Filter operators
//! arrive as strings so unknown operators surface as validation errors
//! rather than deserialization failures.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use super::time::Granularity;

/// A semantic query - what the caller sends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SemanticQuery {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub measures: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dimensions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub time_dimensions: Vec<TimeDimensionRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
    #[serde(skip_serializing_if = "OrderSpec::is_empty")]
    pub order: OrderSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// A time-dimension request: dimension, optional truncation granularity,
/// and either a date range or a list of comparison ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeDimensionRef {
    pub dimension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRangeInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_date_range: Option<Vec<DateRangeInput>>,
}

/// A date range on the wire: a single expression (`"2024-01-01"`,
/// `"last 7 days"`) or an absolute `[start, end]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DateRangeInput {
    Expression(String),
    Range(Vec<String>),
}

/// A filter: either a simple member condition or a logical combination
/// of nested filters, to arbitrary depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filter {
    And { and: Vec<Filter> },
    Or { or: Vec<Filter> },
    Condition(FilterCondition),
}

/// A simple member condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub member: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

/// The operators a simple filter accepts.
pub const KNOWN_OPERATORS: [&str; 15] = [
    "equals",
    "notEquals",
    "contains",
    "notContains",
    "startsWith",
    "endsWith",
    "gt",
    "gte",
    "lt",
    "lte",
    "set",
    "notSet",
    "inDateRange",
    "beforeDate",
    "afterDate",
];

/// Sort direction on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// The `order` object. JSON objects are unordered in theory but ordered
/// in practice; insertion order decides ORDER BY precedence, so this is
/// a pair list with map (de)serialization rather than a HashMap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderSpec(pub Vec<(String, OrderDirection)>);

impl OrderSpec {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, OrderDirection)> {
        self.0.iter()
    }
}

impl From<Vec<(String, OrderDirection)>> for OrderSpec {
    fn from(pairs: Vec<(String, OrderDirection)>) -> Self {
        OrderSpec(pairs)
    }
}

impl Serialize for OrderSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (member, dir) in &self.0 {
            map.serialize_entry(member, dir)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for OrderSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderVisitor;

        impl<'de> Visitor<'de> for OrderVisitor {
            type Value = OrderSpec;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map of member name to \"asc\"/\"desc\"")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((member, dir)) = access.next_entry::<String, OrderDirection>()? {
                    pairs.push((member, dir));
                }
                Ok(OrderSpec(pairs))
            }
        }

        deserializer.deserialize_map(OrderVisitor)
    }
}

/// A parsed `"Cube.field"` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberRef {
    pub cube: String,
    pub field: String,
}

impl MemberRef {
    /// Parse a qualified member name. Exactly one `.` with non-empty halves.
    pub fn parse(member: &str) -> Option<MemberRef> {
        let mut parts = member.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(cube), Some(field), None) if !cube.is_empty() && !field.is_empty() => {
                Some(MemberRef {
                    cube: cube.into(),
                    field: field.into(),
                })
            }
            _ => None,
        }
    }

    pub fn qualified(&self) -> String {
        format!("{}.{}", self.cube, self.field)
    }
}

impl std::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.cube, self.field)
    }
}

impl SemanticQuery {
    /// Whether no member or filter is present at all.
    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
            && self.dimensions.is_empty()
            && self.time_dimensions.is_empty()
            && self.filters.is_empty()
    }

    /// The comparison time dimension, if this is a compareDateRange query
    /// (two or more periods).
    pub fn compare_time_dimension(&self) -> Option<(usize, &TimeDimensionRef)> {
        self.time_dimensions.iter().enumerate().find(|(_, td)| {
            td.compare_date_range
                .as_ref()
                .map(|ranges| ranges.len() >= 2)
                .unwrap_or(false)
        })
    }
}

impl Filter {
    /// Every simple condition in this subtree, in order.
    pub fn conditions(&self) -> Vec<&FilterCondition> {
        match self {
            Filter::And { and } => and.iter().flat_map(|f| f.conditions()).collect(),
            Filter::Or { or } => or.iter().flat_map(|f| f.conditions()).collect(),
            Filter::Condition(c) => vec![c],
        }
    }
}
