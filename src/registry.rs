//! Cube registry - compiled cubes keyed by name.
//!
//! Join targets are stored by name inside cubes and resolved through the
//! registry on demand, which is what makes mutual cube references legal.
//! Registering a cube under an existing name replaces it.

use std::collections::HashMap;
use std::sync::Arc;

use inflector::Inflector;
use serde::{Deserialize, Serialize};

use crate::model::{Cube, DimensionType};

/// Holds compiled cubes for one compiler instance. Immutable after
/// startup by convention; the compiler never mutates it mid-query.
#[derive(Debug, Clone, Default)]
pub struct CubeRegistry {
    cubes: HashMap<String, Arc<Cube>>,
}

impl CubeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cube. An existing cube with the same name is replaced.
    pub fn register(&mut self, cube: Cube) {
        self.cubes.insert(cube.name.clone(), Arc::new(cube));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Cube>> {
        self.cubes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cubes.contains_key(name)
    }

    /// All cubes, sorted by name for deterministic iteration.
    pub fn all(&self) -> Vec<Arc<Cube>> {
        let mut cubes: Vec<_> = self.cubes.values().cloned().collect();
        cubes.sort_by(|a, b| a.name.cmp(&b.name));
        cubes
    }

    /// Discovery metadata for every cube, without executing SQL.
    pub fn metadata(&self) -> Vec<CubeMetadata> {
        self.all()
            .iter()
            .map(|cube| {
                let mut measures: Vec<MemberMetadata> = cube
                    .measures
                    .iter()
                    .map(|(name, measure)| MemberMetadata {
                        name: format!("{}.{}", cube.name, name),
                        title: measure
                            .title
                            .clone()
                            .unwrap_or_else(|| default_title(&cube.name, name)),
                        short_title: short_title(name),
                        member_type: measure.aggregation.as_str().into(),
                        format: measure.format.clone(),
                    })
                    .collect();
                measures.sort_by(|a, b| a.name.cmp(&b.name));

                let mut dimensions: Vec<MemberMetadata> = cube
                    .dimensions
                    .iter()
                    .map(|(name, dimension)| MemberMetadata {
                        name: format!("{}.{}", cube.name, name),
                        title: dimension
                            .title
                            .clone()
                            .unwrap_or_else(|| default_title(&cube.name, name)),
                        short_title: short_title(name),
                        member_type: dimension.dimension_type.as_str().into(),
                        format: dimension.format.clone(),
                    })
                    .collect();
                dimensions.sort_by(|a, b| a.name.cmp(&b.name));

                CubeMetadata {
                    name: cube.name.clone(),
                    title: cube.title.clone().unwrap_or_else(|| cube.name.to_title_case()),
                    description: cube.description.clone(),
                    measures,
                    dimensions,
                }
            })
            .collect()
    }

    /// Kind of a member on a cube, if it exists.
    pub fn member_kind(&self, cube: &str, field: &str) -> Option<MemberKind> {
        let cube = self.get(cube)?;
        if let Some(dimension) = cube.dimension(field) {
            return Some(MemberKind::Dimension(dimension.dimension_type));
        }
        if cube.measure(field).is_some() {
            return Some(MemberKind::Measure);
        }
        None
    }
}

/// What a qualified member name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Dimension(DimensionType),
    Measure,
}

/// Per-cube discovery info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CubeMetadata {
    pub name: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub measures: Vec<MemberMetadata>,
    pub dimensions: Vec<MemberMetadata>,
}

/// Per-member discovery info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberMetadata {
    pub name: String,
    pub title: String,
    pub short_title: String,
    #[serde(rename = "type")]
    pub member_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

pub(crate) fn short_title(field: &str) -> String {
    field.to_title_case()
}

pub(crate) fn default_title(cube: &str, field: &str) -> String {
    format!("{} {}", cube.to_title_case(), field.to_title_case())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaseQuery, Dimension, Measure};
    use crate::sql::query::TableRef;

    fn sample_cube(name: &str) -> Cube {
        Cube::builder(name)
            .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("employees"))))
            .dimension("name", Dimension::string("name"))
            .measure("count", Measure::count())
            .build()
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = CubeRegistry::new();
        registry.register(sample_cube("Employees"));
        assert!(registry.get("Employees").is_some());
        assert!(registry.get("Missing").is_none());
    }

    #[test]
    fn test_reregistration_replaces() {
        let mut registry = CubeRegistry::new();
        registry.register(sample_cube("Employees"));

        let replacement = Cube::builder("Employees")
            .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("employees_v2"))))
            .measure("count", Measure::count())
            .build();
        registry.register(replacement);

        let cube = registry.get("Employees").unwrap();
        assert!(cube.dimension("name").is_none());
        assert_eq!(registry.all().len(), 1);
    }

    #[test]
    fn test_metadata() {
        let mut registry = CubeRegistry::new();
        registry.register(sample_cube("Employees"));
        let meta = registry.metadata();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta[0].name, "Employees");
        assert_eq!(meta[0].measures[0].name, "Employees.count");
        assert_eq!(meta[0].measures[0].member_type, "count");
        assert_eq!(meta[0].dimensions[0].member_type, "string");
    }

    #[test]
    fn test_short_title_humanizes() {
        assert_eq!(short_title("totalLinesOfCode"), "Total Lines Of Code");
        assert_eq!(short_title("name"), "Name");
    }

    #[test]
    fn test_member_kind() {
        let mut registry = CubeRegistry::new();
        registry.register(sample_cube("Employees"));
        assert_eq!(
            registry.member_kind("Employees", "count"),
            Some(MemberKind::Measure)
        );
        assert_eq!(
            registry.member_kind("Employees", "name"),
            Some(MemberKind::Dimension(DimensionType::String))
        );
        assert_eq!(registry.member_kind("Employees", "missing"), None);
    }
}
