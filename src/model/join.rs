// src/model/join.rs
use std::fmt;
use std::sync::Arc;

use crate::sql::expr::{Expr, ExprExt};
use crate::sql::query::JoinType;

/// Declared cardinality between the owning cube and the join target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl Relationship {
    /// SQL join type implied by the relationship, absent an override.
    pub fn default_join_type(&self) -> JoinType {
        match self {
            Relationship::BelongsTo => JoinType::Inner,
            Relationship::HasOne | Relationship::HasMany | Relationship::BelongsToMany => {
                JoinType::Left
            }
        }
    }

    /// Does joining across this edge multiply rows on the owning side?
    pub fn causes_fanout(&self) -> bool {
        matches!(self, Relationship::HasMany | Relationship::BelongsToMany)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::BelongsTo => "belongsTo",
            Relationship::HasOne => "hasOne",
            Relationship::HasMany => "hasMany",
            Relationship::BelongsToMany => "belongsToMany",
        }
    }
}

type JoinComparator = Arc<dyn Fn(Expr, Expr) -> Expr + Send + Sync>;

/// One column pair of a join condition. The default comparator is
/// equality; a custom comparator enables range/inequality joins.
#[derive(Clone)]
pub struct JoinKey {
    pub source: String,
    pub target: String,
    comparator: Option<JoinComparator>,
}

impl JoinKey {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            comparator: None,
        }
    }

    pub fn with_comparator(
        mut self,
        f: impl Fn(Expr, Expr) -> Expr + Send + Sync + 'static,
    ) -> Self {
        self.comparator = Some(Arc::new(f));
        self
    }

    /// Build the join predicate for resolved source/target column exprs.
    pub fn condition(&self, source_expr: Expr, target_expr: Expr) -> Expr {
        match &self.comparator {
            Some(f) => f(source_expr, target_expr),
            None => source_expr.eq(target_expr),
        }
    }
}

impl fmt::Debug for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinKey")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("custom_comparator", &self.comparator.is_some())
            .finish()
    }
}

/// A declared relationship from the containing cube to a target cube.
#[derive(Debug, Clone)]
pub struct CubeJoin {
    pub relationship: Relationship,
    pub on: Vec<JoinKey>,
    /// Optional override of the relationship-derived SQL join type.
    pub join_type: Option<JoinType>,
}

impl CubeJoin {
    pub fn new(relationship: Relationship, on: Vec<JoinKey>) -> Self {
        Self {
            relationship,
            on,
            join_type: None,
        }
    }

    pub fn belongs_to(source: &str, target: &str) -> Self {
        Self::new(Relationship::BelongsTo, vec![JoinKey::new(source, target)])
    }

    pub fn has_one(source: &str, target: &str) -> Self {
        Self::new(Relationship::HasOne, vec![JoinKey::new(source, target)])
    }

    pub fn has_many(source: &str, target: &str) -> Self {
        Self::new(Relationship::HasMany, vec![JoinKey::new(source, target)])
    }

    pub fn belongs_to_many(source: &str, target: &str) -> Self {
        Self::new(
            Relationship::BelongsToMany,
            vec![JoinKey::new(source, target)],
        )
    }

    pub fn with_join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = Some(join_type);
        self
    }

    /// The SQL join type: explicit override or relationship default.
    pub fn sql_join_type(&self) -> JoinType {
        self.join_type
            .unwrap_or_else(|| self.relationship.default_join_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::table_col;
    use crate::sql::Dialect;

    #[test]
    fn test_join_type_mapping() {
        assert_eq!(
            CubeJoin::belongs_to("department_id", "id").sql_join_type(),
            JoinType::Inner
        );
        assert_eq!(
            CubeJoin::has_one("id", "employee_id").sql_join_type(),
            JoinType::Left
        );
        assert_eq!(
            CubeJoin::has_many("id", "employee_id").sql_join_type(),
            JoinType::Left
        );
        assert_eq!(
            CubeJoin::belongs_to_many("id", "tag_id").sql_join_type(),
            JoinType::Left
        );
    }

    #[test]
    fn test_explicit_type_overrides_default() {
        let join = CubeJoin::has_many("id", "employee_id").with_join_type(JoinType::Inner);
        assert_eq!(join.sql_join_type(), JoinType::Inner);
    }

    #[test]
    fn test_fanout() {
        assert!(!Relationship::BelongsTo.causes_fanout());
        assert!(!Relationship::HasOne.causes_fanout());
        assert!(Relationship::HasMany.causes_fanout());
        assert!(Relationship::BelongsToMany.causes_fanout());
    }

    #[test]
    fn test_custom_comparator() {
        let key = JoinKey::new("valid_from", "event_date")
            .with_comparator(|source, target| source.lte(target));
        let expr = key.condition(
            table_col("rates", "valid_from"),
            table_col("events", "event_date"),
        );
        let sql = expr
            .to_tokens_for_dialect(Dialect::Postgres)
            .serialize(Dialect::Postgres);
        assert_eq!(sql, "\"rates\".\"valid_from\" <= \"events\".\"event_date\"");
    }
}
