//! Query planning: which cubes a query touches, which one anchors the
//! FROM clause, the join order, and which fan-out cubes must be
//! pre-aggregated in CTEs.
//!
//! Every decision here is order-independent: cube sets are sorted before
//! any choice is made, so permuting a query's member lists cannot change
//! the primary cube, the join order, or the CTE count.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{CompilerError, CompilerResult};
use crate::registry::CubeRegistry;
use crate::semantic::join_graph::{JoinGraph, JoinStep};
use crate::semantic::query::{MemberRef, SemanticQuery, TimeDimensionRef};

/// The planner's output, consumed by the SQL builder.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// The cube whose base query forms the outer FROM.
    pub primary: String,
    /// Joins in apply order (deduplicated join tree from the primary).
    pub joins: Vec<JoinStep>,
    /// Cubes whose measures must be pre-aggregated in a CTE before
    /// joining, to avoid fan-out double-counting.
    pub cte_cubes: BTreeSet<String>,
    /// Parsed measure references in query order.
    pub measures: Vec<MemberRef>,
    /// Parsed dimension references in query order.
    pub dimensions: Vec<MemberRef>,
    /// Parsed time-dimension references in query order.
    pub time_dimensions: Vec<(MemberRef, TimeDimensionRef)>,
}

impl QueryPlan {
    /// Is this a single-cube plan (no joins, no CTEs)?
    pub fn is_single_cube(&self) -> bool {
        self.joins.is_empty() && self.cte_cubes.is_empty()
    }

    /// The join step whose target is `cube`, if any.
    pub fn step_to(&self, cube: &str) -> Option<&JoinStep> {
        self.joins.iter().find(|step| step.to_cube == cube)
    }
}

/// Plan a validated query.
pub fn plan_query(registry: &CubeRegistry, query: &SemanticQuery) -> CompilerResult<QueryPlan> {
    let measures = parse_members(&query.measures)?;
    let dimensions = parse_members(&query.dimensions)?;
    let mut time_dimensions = Vec::with_capacity(query.time_dimensions.len());
    for td in &query.time_dimensions {
        let member = parse_member(&td.dimension)?;
        time_dimensions.push((member, td.clone()));
    }

    // Cube usage: every prefix mentioned anywhere in the query.
    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut measure_cubes: BTreeSet<String> = BTreeSet::new();
    let mut dimension_cubes: BTreeSet<String> = BTreeSet::new();

    for m in &measures {
        used.insert(m.cube.clone());
        measure_cubes.insert(m.cube.clone());
    }
    for d in &dimensions {
        used.insert(d.cube.clone());
        dimension_cubes.insert(d.cube.clone());
    }
    for (m, _) in &time_dimensions {
        used.insert(m.cube.clone());
        dimension_cubes.insert(m.cube.clone());
    }
    for filter in &query.filters {
        for condition in filter.conditions() {
            used.insert(parse_member(&condition.member)?.cube);
        }
    }

    if used.is_empty() {
        return Err(CompilerError::Validation(vec![
            "query must reference at least one cube".into(),
        ]));
    }

    // Primary cube: alphabetically-first among measure cubes, then
    // dimension cubes, then everything used. Sets iterate sorted, so
    // this cannot depend on the order members were written in.
    let primary = measure_cubes
        .iter()
        .next()
        .or_else(|| dimension_cubes.iter().next())
        .or_else(|| used.iter().next())
        .expect("usage set checked non-empty")
        .clone();

    for cube in &used {
        if !registry.contains(cube) {
            return Err(CompilerError::Validation(vec![format!(
                "unknown cube '{}'",
                cube
            )]));
        }
    }

    let graph = JoinGraph::from_registry(registry);
    let others: Vec<String> = used.iter().filter(|c| **c != primary).cloned().collect();
    let joins = graph.join_tree(&primary, &others)?;

    // Pre-aggregation: a measure-contributing cube reached through any
    // fan-out edge would inflate the other cubes' aggregates, so it gets
    // aggregated first in a CTE grouped by its join keys.
    let mut cte_cubes = BTreeSet::new();
    for cube in &measure_cubes {
        if *cube == primary {
            continue;
        }
        let path = graph.find_path(&primary, cube)?;
        if path.iter().any(|step| step.join.relationship.causes_fanout()) {
            cte_cubes.insert(cube.clone());
        }
    }

    debug!(
        primary = %primary,
        joins = joins.len(),
        ctes = cte_cubes.len(),
        "planned query"
    );

    Ok(QueryPlan {
        primary,
        joins,
        cte_cubes,
        measures,
        dimensions,
        time_dimensions,
    })
}

fn parse_members(members: &[String]) -> CompilerResult<Vec<MemberRef>> {
    members.iter().map(|m| parse_member(m)).collect()
}

fn parse_member(member: &str) -> CompilerResult<MemberRef> {
    MemberRef::parse(member)
        .ok_or_else(|| CompilerError::plan(format!("invalid member reference '{}'", member)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaseQuery, Cube, CubeJoin, Dimension, Measure};
    use crate::sql::query::TableRef;

    fn registry() -> CubeRegistry {
        let mut registry = CubeRegistry::new();
        registry.register(
            Cube::builder("Employees")
                .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("employees"))))
                .dimension("name", Dimension::string("name"))
                .measure("count", Measure::count())
                .join("Departments", CubeJoin::belongs_to("department_id", "id"))
                .join("Productivity", CubeJoin::has_many("id", "employee_id"))
                .build(),
        );
        registry.register(
            Cube::builder("Departments")
                .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("departments"))))
                .dimension("name", Dimension::string("name"))
                .measure("count", Measure::count())
                .build(),
        );
        registry.register(
            Cube::builder("Productivity")
                .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("productivity"))))
                .dimension("date", Dimension::time("date"))
                .measure("totalLinesOfCode", Measure::sum("lines_of_code"))
                .build(),
        );
        registry
    }

    fn query(measures: &[&str], dimensions: &[&str]) -> SemanticQuery {
        SemanticQuery {
            measures: measures.iter().map(|s| s.to_string()).collect(),
            dimensions: dimensions.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_cube_plan() {
        let plan = plan_query(&registry(), &query(&["Employees.count"], &[])).unwrap();
        assert_eq!(plan.primary, "Employees");
        assert!(plan.is_single_cube());
    }

    #[test]
    fn test_multi_cube_joins() {
        let plan = plan_query(
            &registry(),
            &query(&["Employees.count"], &["Departments.name"]),
        )
        .unwrap();
        assert_eq!(plan.primary, "Employees");
        assert_eq!(plan.joins.len(), 1);
        assert_eq!(plan.joins[0].to_cube, "Departments");
        assert!(plan.cte_cubes.is_empty());
    }

    #[test]
    fn test_fanout_measure_triggers_cte() {
        let plan = plan_query(
            &registry(),
            &query(
                &["Employees.count", "Productivity.totalLinesOfCode"],
                &["Departments.name"],
            ),
        )
        .unwrap();
        assert_eq!(plan.primary, "Employees");
        assert_eq!(plan.cte_cubes.len(), 1);
        assert!(plan.cte_cubes.contains("Productivity"));
    }

    #[test]
    fn test_fanout_without_measure_needs_no_cte() {
        // Productivity only contributes a dimension: no double counting.
        let plan = plan_query(
            &registry(),
            &query(&["Employees.count"], &["Productivity.date"]),
        )
        .unwrap();
        assert!(plan.cte_cubes.is_empty());
    }

    #[test]
    fn test_primary_choice_is_permutation_independent() {
        let forward = plan_query(
            &registry(),
            &query(
                &["Employees.count", "Productivity.totalLinesOfCode"],
                &[],
            ),
        )
        .unwrap();
        let reversed = plan_query(
            &registry(),
            &query(
                &["Productivity.totalLinesOfCode", "Employees.count"],
                &[],
            ),
        )
        .unwrap();
        assert_eq!(forward.primary, reversed.primary);
        assert_eq!(forward.cte_cubes.len(), reversed.cte_cubes.len());
        assert_eq!(forward.joins.len(), reversed.joins.len());
    }

    #[test]
    fn test_primary_falls_back_to_dimension_cubes() {
        let plan = plan_query(&registry(), &query(&[], &["Departments.name"])).unwrap();
        assert_eq!(plan.primary, "Departments");
    }

    #[test]
    fn test_unreachable_cube_fails() {
        let mut registry = registry();
        registry.register(
            Cube::builder("Island")
                .base_query(|_ctx| Ok(BaseQuery::from_table(TableRef::new("island"))))
                .measure("count", Measure::count())
                .build(),
        );
        let err = plan_query(
            &registry,
            &query(&["Employees.count", "Island.count"], &[]),
        )
        .unwrap_err();
        assert!(matches!(err, CompilerError::JoinResolution { .. }));
    }
}
