//! The compiler facade: one `execute` entry point chaining
//! validator → planner → builder → executor → annotator, plus the
//! metadata, validation, and dry-run surfaces.
//!
//! The facade holds no mutable state beyond the registry, which is
//! frozen once cubes are registered; concurrent `execute` calls share it
//! freely through `Arc`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::try_join_all;
use tracing::debug;

use crate::error::{CompilerError, CompilerResult};
use crate::executor::{DatabaseExecutor, Row};
use crate::model::{Cube, QueryContext, SecurityContext};
use crate::registry::{CubeMetadata, CubeRegistry};
use crate::result::{
    build_annotation, coerce_measure_values, PeriodsAnnotation, QueryResult, QueryType,
};
use crate::semantic::compare::{self, ComparePeriod};
use crate::semantic::query::{MemberRef, SemanticQuery};
use crate::semantic::time::Granularity;
use crate::semantic::{build_sql, plan_query, validate_query, ValidationResult};
use crate::sql::params::SqlObject;
use crate::sql::Dialect;

/// The semantic-layer query compiler.
pub struct Compiler {
    registry: CubeRegistry,
    executor: Arc<dyn DatabaseExecutor>,
    dialect: Dialect,
}

impl Compiler {
    /// Create a compiler over an executor, using the executor's engine
    /// dialect.
    pub fn new(executor: Arc<dyn DatabaseExecutor>) -> Self {
        let dialect = executor.engine_type().dialect();
        Self::with_dialect(executor, dialect)
    }

    /// Create a compiler with an explicit dialect (e.g. for dry-run SQL
    /// against a different engine than the executor's).
    pub fn with_dialect(executor: Arc<dyn DatabaseExecutor>, dialect: Dialect) -> Self {
        Self {
            registry: CubeRegistry::new(),
            executor,
            dialect,
        }
    }

    /// Register a cube. Re-registration under the same name replaces the
    /// previous definition.
    pub fn register_cube(&mut self, cube: Cube) {
        self.registry.register(cube);
    }

    pub fn registry(&self) -> &CubeRegistry {
        &self.registry
    }

    /// Per-cube discovery metadata; no SQL is executed.
    pub fn metadata(&self) -> Vec<CubeMetadata> {
        self.registry.metadata()
    }

    /// Pre-flight validation for clients that want it without executing.
    pub fn validate_query(&self, query: &SemanticQuery) -> ValidationResult {
        validate_query(&self.registry, query)
    }

    /// Dry-run: compile to SQL + parameters without touching the executor.
    pub fn sql(
        &self,
        query: &SemanticQuery,
        security_context: &SecurityContext,
    ) -> CompilerResult<SqlObject> {
        self.check_security_context(security_context)?;
        self.check_valid(query)?;
        self.compile(query, security_context, Utc::now())
    }

    /// Execute a semantic query and return the annotated result.
    pub async fn execute(
        &self,
        query: &SemanticQuery,
        security_context: &SecurityContext,
    ) -> CompilerResult<QueryResult> {
        self.check_security_context(security_context)?;
        self.check_valid(query)?;
        let now = Utc::now();

        match query.compare_time_dimension() {
            Some((td_index, _)) => self.execute_compare(query, security_context, td_index, now).await,
            None => {
                let data = self.execute_single(query, security_context, now).await?;
                Ok(QueryResult {
                    query_type: QueryType::Regular,
                    data,
                    annotation: build_annotation(&self.registry, query),
                })
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_security_context(&self, security_context: &SecurityContext) -> CompilerResult<()> {
        if security_context.is_empty() {
            return Err(CompilerError::SecurityContext(
                "security context must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn check_valid(&self, query: &SemanticQuery) -> CompilerResult<()> {
        let validation = self.validate_query(query);
        if !validation.is_valid {
            return Err(CompilerError::Validation(validation.errors));
        }
        Ok(())
    }

    fn compile(
        &self,
        query: &SemanticQuery,
        security_context: &SecurityContext,
        now: DateTime<Utc>,
    ) -> CompilerResult<SqlObject> {
        let plan = plan_query(&self.registry, query)?;
        let ctx = QueryContext::new(security_context.clone(), &plan.primary, query.clone());
        build_sql(&self.registry, &plan, query, &ctx, self.dialect, now)
    }

    /// One planned-and-built statement through the executor, with numeric
    /// post-processing applied.
    async fn execute_single(
        &self,
        query: &SemanticQuery,
        security_context: &SecurityContext,
        now: DateTime<Utc>,
    ) -> CompilerResult<Vec<Row>> {
        let sql = self.compile(query, security_context, now)?;
        debug!(sql = %sql.sql, "executing statement");
        let mut rows = self.executor.execute(&sql).await.map_err(|err| match err {
            already @ CompilerError::DatabaseExecution { .. } => already,
            other => CompilerError::DatabaseExecution {
                message: other.to_string(),
                sql: sql.sql.clone(),
            },
        })?;
        coerce_measure_values(&self.registry, query, &mut rows);
        Ok(rows)
    }

    /// Expand compareDateRange into aligned sub-queries, run them
    /// concurrently, and merge. The first failing period aborts the
    /// comparison; there are no partial results.
    async fn execute_compare(
        &self,
        query: &SemanticQuery,
        security_context: &SecurityContext,
        td_index: usize,
        now: DateTime<Utc>,
    ) -> CompilerResult<QueryResult> {
        let td = &query.time_dimensions[td_index];
        let ranges = td
            .compare_date_range
            .as_ref()
            .expect("caller detected comparison");
        let periods = compare::resolve_periods(ranges, now)?;
        let time_alias = MemberRef::parse(&td.dimension)
            .map(|m| m.qualified())
            .unwrap_or_else(|| td.dimension.clone());
        let granularity = td.granularity.unwrap_or(Granularity::Day);

        let sub_results = try_join_all(periods.iter().map(|period| {
            let sub_query = compare::period_query(query, td_index, period);
            async move {
                self.execute_single(&sub_query, security_context, now)
                    .await
                    .map(|rows| (period.clone(), rows))
            }
        }))
        .await?;

        let mut merged: Vec<Row> = Vec::new();
        for (period, mut rows) in sub_results {
            compare::annotate_rows(&mut rows, &period, &time_alias, granularity);
            merged.extend(rows);
        }
        compare::sort_merged(&mut merged, &time_alias);

        let mut annotation = build_annotation(&self.registry, query);
        annotation.periods = Some(periods_annotation(&periods));

        Ok(QueryResult {
            query_type: QueryType::CompareDateRange,
            data: merged,
            annotation,
        })
    }
}

fn periods_annotation(periods: &[ComparePeriod]) -> PeriodsAnnotation {
    PeriodsAnnotation {
        ranges: periods
            .iter()
            .map(|p| {
                vec![
                    p.start.to_rfc3339_opts(SecondsFormat::Millis, true),
                    p.end.to_rfc3339_opts(SecondsFormat::Millis, true),
                ]
            })
            .collect(),
        labels: periods.iter().map(|p| p.label.clone()).collect(),
    }
}
