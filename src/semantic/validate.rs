//! Query validation against the cube registry.
//!
//! Validation collects every error rather than stopping at the first,
//! so callers can surface the full list. It checks existence and kind
//! of referenced members; it does not sanitize value types (a
//! non-numeric operand to `gt` surfaces at execution, not here).

use crate::model::DimensionType;
use crate::registry::{CubeRegistry, MemberKind};
use crate::semantic::query::{Filter, MemberRef, SemanticQuery, KNOWN_OPERATORS};

/// Outcome of validating a query.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate a semantic query against the registry.
pub fn validate_query(registry: &CubeRegistry, query: &SemanticQuery) -> ValidationResult {
    let mut errors = Vec::new();

    if query.is_empty() {
        errors.push(
            "query must reference at least one measure, dimension, time dimension, or filter"
                .to_string(),
        );
    }

    for member in &query.measures {
        match parse_member(member, &mut errors) {
            Some(m) => match member_kind(registry, &m, &mut errors) {
                Some(MemberKind::Measure) => {}
                Some(MemberKind::Dimension(_)) => {
                    errors.push(format!("'{}' is a dimension, not a measure", member));
                }
                None => {}
            },
            None => {}
        }
    }

    for member in &query.dimensions {
        match parse_member(member, &mut errors) {
            Some(m) => match member_kind(registry, &m, &mut errors) {
                Some(MemberKind::Dimension(_)) => {}
                Some(MemberKind::Measure) => {
                    errors.push(format!("'{}' is a measure, not a dimension", member));
                }
                None => {}
            },
            None => {}
        }
    }

    for td in &query.time_dimensions {
        if let Some(m) = parse_member(&td.dimension, &mut errors) {
            match member_kind(registry, &m, &mut errors) {
                Some(MemberKind::Dimension(DimensionType::Time)) => {}
                Some(MemberKind::Dimension(other)) => errors.push(format!(
                    "time dimension '{}' must be of type time, found {}",
                    td.dimension,
                    other.as_str()
                )),
                Some(MemberKind::Measure) => errors.push(format!(
                    "time dimension '{}' references a measure",
                    td.dimension
                )),
                None => {}
            }
        }
    }

    for filter in &query.filters {
        validate_filter(registry, filter, &mut errors);
    }

    for (member, _) in query.order.iter() {
        if let Some(m) = parse_member(member, &mut errors) {
            member_kind(registry, &m, &mut errors);
        }
    }

    ValidationResult::from_errors(errors)
}

fn validate_filter(registry: &CubeRegistry, filter: &Filter, errors: &mut Vec<String>) {
    match filter {
        Filter::And { and } => {
            for child in and {
                validate_filter(registry, child, errors);
            }
        }
        Filter::Or { or } => {
            for child in or {
                validate_filter(registry, child, errors);
            }
        }
        Filter::Condition(condition) => {
            if let Some(m) = parse_member(&condition.member, errors) {
                // Any member kind is allowed: dimensions filter rows,
                // measures filter aggregates.
                member_kind(registry, &m, errors);
            }
            if !KNOWN_OPERATORS.contains(&condition.operator.as_str()) {
                errors.push(format!("unknown filter operator '{}'", condition.operator));
            }
        }
    }
}

fn parse_member(member: &str, errors: &mut Vec<String>) -> Option<MemberRef> {
    match MemberRef::parse(member) {
        Some(m) => Some(m),
        None => {
            errors.push(format!(
                "'{}' is not a valid member reference (expected 'Cube.field')",
                member
            ));
            None
        }
    }
}

fn member_kind(
    registry: &CubeRegistry,
    member: &MemberRef,
    errors: &mut Vec<String>,
) -> Option<MemberKind> {
    if !registry.contains(&member.cube) {
        errors.push(format!("unknown cube '{}'", member.cube));
        return None;
    }
    match registry.member_kind(&member.cube, &member.field) {
        Some(kind) => Some(kind),
        None => {
            errors.push(format!(
                "unknown field '{}' on cube '{}'",
                member.field, member.cube
            ));
            None
        }
    }
}
