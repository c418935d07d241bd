//! SQL building: a plan plus the original query becomes one parameterized
//! statement.
//!
//! Construction order matters: positional dialects pair the n-th `?` in
//! the text with the n-th bound value, so parameters are bound in text
//! order - CTE bodies first, then the outer WHERE, HAVING, and finally
//! LIMIT/OFFSET. Selections, joins and ordering never bind parameters.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{CompilerError, CompilerResult};
use crate::model::{
    Aggregation, Cube, DimensionType, FrameBound, FrameKind, Measure, QueryContext,
};
use crate::registry::{CubeRegistry, MemberKind};
use crate::semantic::filters::{self, ResolvedMember};
use crate::semantic::planner::QueryPlan;
use crate::semantic::query::{DateRangeInput, Filter, MemberRef, OrderDirection, SemanticQuery};
use crate::semantic::time::{self, Granularity};
use crate::sql::dialect::AggregateFn;
use crate::sql::expr::{
    and_all, col, lit_bool, lit_float, lit_int, lit_null, lit_str, table_col, Expr, ExprExt,
    SortDir, WindowFrame, WindowFrameBound, WindowFrameKind, WindowOrderBy,
};
use crate::sql::params::{ParamBinder, SqlObject};
use crate::sql::query::{Cte, OrderByExpr, Query, SelectExpr, TableRef};
use crate::sql::{Dialect, SqlDialect};

/// Build the parameterized SQL object for a planned query.
pub fn build_sql(
    registry: &CubeRegistry,
    plan: &QueryPlan,
    query: &SemanticQuery,
    ctx: &QueryContext,
    dialect: Dialect,
    now: DateTime<Utc>,
) -> CompilerResult<SqlObject> {
    SqlBuilder {
        registry,
        plan,
        query,
        ctx,
        dialect,
        now,
    }
    .build()
}

/// One output column of the statement.
struct Selection {
    alias: String,
    expr: Expr,
    /// Inner expression for GROUP BY (None for aggregate outputs).
    group_expr: Option<Expr>,
    /// Whether this output is an aggregate (forces grouping of the rest).
    aggregating: bool,
}

struct SqlBuilder<'a> {
    registry: &'a CubeRegistry,
    plan: &'a QueryPlan,
    query: &'a SemanticQuery,
    ctx: &'a QueryContext,
    dialect: Dialect,
    now: DateTime<Utc>,
}

impl<'a> SqlBuilder<'a> {
    fn build(&self) -> CompilerResult<SqlObject> {
        let mut binder = ParamBinder::new();

        // 1. Pre-aggregation CTEs (their parameters come first in the text).
        let mut ctes = Vec::new();
        for cube_name in &self.plan.cte_cubes {
            ctes.push(self.build_cte(cube_name, &mut binder)?);
        }

        // 2. Outer FROM and join chain.
        let primary = self.cube(&self.plan.primary)?;
        let primary_base = primary.base_query(self.ctx)?;
        let mut outer = Query::new().from(primary_base.from.clone().with_alias(&primary.alias()));
        for cte in ctes {
            outer = outer.with_cte(cte);
        }
        for base_join in &primary_base.joins {
            outer = outer.join(
                base_join.join_type,
                base_join.table.clone(),
                base_join.on.clone(),
            );
        }
        outer = self.apply_joins(outer)?;

        // 3. Selections.
        let selections = self.build_selections()?;
        let any_aggregating = selections.iter().any(|s| s.aggregating);
        outer = outer.select(
            selections
                .iter()
                .map(|s| SelectExpr::new(s.expr.clone()).with_alias(&s.alias))
                .collect::<Vec<_>>(),
        );

        // 4. WHERE: primary security predicate, time ranges, then
        //    dimension filter trees.
        if let Some(base_where) = primary_base.where_clause.clone() {
            outer = outer.filter(base_where);
        }
        for condition in self.time_range_conditions(&mut binder)? {
            outer = outer.filter(condition);
        }
        let (where_filters, having_filters) = self.split_filters();
        for filter in where_filters {
            if let Some(expr) = self.normalize_outer_filter(filter, &mut binder)? {
                outer = outer.filter(expr);
            }
        }

        // 5. GROUP BY every non-measure selection once anything aggregates.
        if any_aggregating {
            let group_exprs: Vec<Expr> = selections
                .iter()
                .filter_map(|s| s.group_expr.clone())
                .collect();
            outer = outer.group_by(group_exprs);
        }

        // 6. HAVING: filter trees that reference measures.
        for filter in having_filters {
            if let Some(expr) = self.normalize_outer_filter(filter, &mut binder)? {
                outer = outer.having(expr);
            }
        }

        // 7. ORDER BY.
        outer = outer.order_by(self.build_order(&selections)?);

        // 8. LIMIT / OFFSET, parameterized like every other query literal.
        if let Some(limit) = self.query.limit {
            outer = outer.limit_param(binder.push_indexed(limit as i64));
        }
        if let Some(offset) = self.query.offset {
            outer = outer.offset_param(binder.push_indexed(offset as i64));
        }

        let sql = outer.to_sql(self.dialect);
        debug!(dialect = %self.dialect, params = binder.len(), "built SQL");
        Ok(SqlObject::new(sql, binder.into_params()))
    }

    // =========================================================================
    // CTEs
    // =========================================================================

    /// Pre-aggregate a fan-out cube: group its measures by the join keys
    /// plus every non-measure field the outer query references.
    fn build_cte(&self, cube_name: &str, binder: &mut ParamBinder) -> CompilerResult<Cte> {
        let cube = self.cube(cube_name)?;
        let alias = cube.alias();
        let base = cube.base_query(self.ctx)?;

        let step = self.plan.step_to(cube_name).ok_or_else(|| {
            CompilerError::plan(format!(
                "pre-aggregated cube '{}' is missing from the join plan",
                cube_name
            ))
        })?;

        let mut select: Vec<SelectExpr> = Vec::new();
        let mut group_by: Vec<Expr> = Vec::new();

        // Join keys, exported under their raw column names.
        for key in &step.join.on {
            let expr = table_col(&alias, &key.target);
            select.push(SelectExpr::new(expr.clone()).with_alias(&key.target));
            group_by.push(expr);
        }

        // Non-measure fields the outer query references, exported under
        // their qualified names.
        for field in self.exported_fields(cube_name) {
            let dimension = cube.dimension(&field).ok_or_else(|| {
                CompilerError::plan(format!("unknown field '{}.{}'", cube_name, field))
            })?;
            let expr = dimension.sql.resolve(self.ctx, &alias);
            let qualified = format!("{}.{}", cube_name, field);
            select.push(SelectExpr::new(expr.clone()).with_alias(&qualified));
            group_by.push(expr);
        }

        // Time dimensions of this cube, truncated inside the CTE.
        for (member, td) in &self.plan.time_dimensions {
            if member.cube != cube_name {
                continue;
            }
            let dimension = cube
                .dimension(&member.field)
                .ok_or_else(|| CompilerError::plan(format!("unknown field '{}'", member)))?;
            let raw = dimension.sql.resolve(self.ctx, &alias);
            let expr = match td.granularity {
                Some(granularity) => self.dialect.time_trunc(granularity, raw),
                None => raw,
            };
            select.push(SelectExpr::new(expr.clone()).with_alias(&member.qualified()));
            group_by.push(expr);
        }

        // Measures, aggregated per group.
        for member in &self.plan.measures {
            if member.cube != cube_name {
                continue;
            }
            let measure = cube
                .measure(&member.field)
                .ok_or_else(|| CompilerError::plan(format!("unknown measure '{}'", member)))?;
            if measure.aggregation.is_window() {
                return Err(CompilerError::UnsupportedFeature {
                    feature: format!("window measure '{}' on a pre-aggregated cube", member),
                    dialect: self.dialect.name().into(),
                });
            }
            let expr = self.measure_expr(&cube, measure)?;
            if measure.aggregation == Aggregation::Number {
                group_by.push(expr.clone());
            }
            select.push(SelectExpr::new(expr).with_alias(&member.qualified()));
        }

        let mut inner = Query::new()
            .select(select)
            .from(base.from.clone().with_alias(&alias));
        for base_join in &base.joins {
            inner = inner.join(
                base_join.join_type,
                base_join.table.clone(),
                base_join.on.clone(),
            );
        }
        if let Some(where_clause) = base.where_clause.clone() {
            inner = inner.filter(where_clause);
        }

        // Date ranges for this cube's time dimensions apply to raw values
        // inside the CTE.
        for (member, td) in &self.plan.time_dimensions {
            if member.cube != cube_name {
                continue;
            }
            if let Some(range) = &td.date_range {
                if let Some(condition) = self.range_condition(member, range, &cube, &alias, binder)?
                {
                    inner = inner.filter(condition);
                }
            }
        }

        // Top-level simple filters on this cube's dimensions also apply
        // inside the CTE, against the raw expressions.
        for filter in &self.query.filters {
            let condition = match filter {
                Filter::Condition(condition) => condition,
                _ => continue,
            };
            match MemberRef::parse(&condition.member) {
                Some(member) if member.cube == cube_name && !self.is_measure(&member) => {}
                _ => continue,
            }
            let mut resolve = |m: &MemberRef| -> CompilerResult<ResolvedMember> {
                self.resolve_inside_cube(&cube, &alias, m)
            };
            if let Some(expr) =
                filters::normalize_filter(filter, &mut resolve, binder, self.dialect, self.now)?
            {
                inner = inner.filter(expr);
            }
        }

        inner = inner.group_by(group_by);

        Ok(Cte::new(&cte_alias(cube_name), inner))
    }

    /// Dimension fields of a pre-aggregated cube that the outer query
    /// references through selections, nested filters, or ordering.
    fn exported_fields(&self, cube_name: &str) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        for member in &self.plan.dimensions {
            if member.cube == cube_name {
                fields.insert(member.field.clone());
            }
        }
        for (member_name, _) in self.query.order.iter() {
            if let Some(member) = MemberRef::parse(member_name) {
                if member.cube == cube_name && !self.is_measure(&member) {
                    fields.insert(member.field.clone());
                }
            }
        }
        // Members referenced inside logical filter trees resolve against
        // exported columns (top-level simple conditions go inside the CTE).
        for filter in &self.query.filters {
            if matches!(filter, Filter::Condition(_)) {
                continue;
            }
            for condition in filter.conditions() {
                if let Some(member) = MemberRef::parse(&condition.member) {
                    if member.cube == cube_name && !self.is_measure(&member) {
                        fields.insert(member.field.clone());
                    }
                }
            }
        }
        // Time dimensions are exported separately (truncated).
        for (member, _) in &self.plan.time_dimensions {
            if member.cube == cube_name {
                fields.remove(&member.field);
            }
        }
        fields
    }

    // =========================================================================
    // Joins
    // =========================================================================

    fn apply_joins(&self, mut outer: Query) -> CompilerResult<Query> {
        for step in &self.plan.joins {
            let source_alias = self.table_alias(&step.from_cube)?;
            let join_type = step.join.sql_join_type();

            if self.plan.cte_cubes.contains(&step.to_cube) {
                let target_alias = cte_alias(&step.to_cube);
                let conditions: Vec<Expr> = step
                    .join
                    .on
                    .iter()
                    .map(|key| {
                        key.condition(
                            table_col(&source_alias, &key.source),
                            table_col(&target_alias, &key.target),
                        )
                    })
                    .collect();
                let on = and_all(conditions).ok_or_else(|| self.empty_join_error(step))?;
                outer = outer.join(join_type, TableRef::new(&target_alias), on);
            } else {
                let target = self.cube(&step.to_cube)?;
                let target_alias = target.alias();
                let target_base = target.base_query(self.ctx)?;
                let mut conditions: Vec<Expr> = step
                    .join
                    .on
                    .iter()
                    .map(|key| {
                        key.condition(
                            table_col(&source_alias, &key.source),
                            table_col(&target_alias, &key.target),
                        )
                    })
                    .collect();
                // The joined cube's security predicate rides on the ON
                // clause so LEFT JOIN semantics stay intact.
                if let Some(where_clause) = target_base.where_clause {
                    conditions.push(where_clause);
                }
                let on = and_all(conditions).ok_or_else(|| self.empty_join_error(step))?;
                outer = outer.join(
                    join_type,
                    target_base.from.clone().with_alias(&target_alias),
                    on,
                );
            }
        }
        Ok(outer)
    }

    fn empty_join_error(&self, step: &crate::semantic::join_graph::JoinStep) -> CompilerError {
        CompilerError::plan(format!(
            "join from '{}' to '{}' declares no keys",
            step.from_cube, step.to_cube
        ))
    }

    /// The alias a cube's columns are addressed by in the outer query.
    fn table_alias(&self, cube_name: &str) -> CompilerResult<String> {
        if self.plan.cte_cubes.contains(cube_name) {
            Ok(cte_alias(cube_name))
        } else {
            Ok(self.cube(cube_name)?.alias())
        }
    }

    // =========================================================================
    // Selections
    // =========================================================================

    fn build_selections(&self) -> CompilerResult<Vec<Selection>> {
        let mut selections = Vec::new();

        for member in &self.plan.dimensions {
            let expr = self.dimension_output(member, None)?;
            selections.push(Selection {
                alias: member.qualified(),
                expr: expr.clone(),
                group_expr: Some(expr),
                aggregating: false,
            });
        }

        for (member, td) in &self.plan.time_dimensions {
            let expr = self.dimension_output(member, td.granularity)?;
            selections.push(Selection {
                alias: member.qualified(),
                expr: expr.clone(),
                group_expr: Some(expr),
                aggregating: false,
            });
        }

        for member in &self.plan.measures {
            selections.push(self.measure_output(member)?);
        }

        Ok(selections)
    }

    /// A dimension or time-dimension output expression.
    fn dimension_output(
        &self,
        member: &MemberRef,
        granularity: Option<Granularity>,
    ) -> CompilerResult<Expr> {
        if self.plan.cte_cubes.contains(&member.cube) {
            // Exported (and, for time dimensions, already truncated).
            return Ok(table_col(&cte_alias(&member.cube), &member.qualified()));
        }
        let cube = self.cube(&member.cube)?;
        let dimension = cube
            .dimension(&member.field)
            .ok_or_else(|| CompilerError::plan(format!("unknown dimension '{}'", member)))?;
        let raw = dimension.sql.resolve(self.ctx, &cube.alias());
        Ok(match granularity {
            Some(g) => self.dialect.time_trunc(g, raw),
            None => raw,
        })
    }

    /// A measure output: aggregate, window expression, or CTE
    /// re-aggregation.
    fn measure_output(&self, member: &MemberRef) -> CompilerResult<Selection> {
        let cube = self.cube(&member.cube)?;
        let measure = cube
            .measure(&member.field)
            .ok_or_else(|| CompilerError::plan(format!("unknown measure '{}'", member)))?;

        if self.plan.cte_cubes.contains(&member.cube) {
            let column = table_col(&cte_alias(&member.cube), &member.qualified());
            return Ok(match reaggregate(measure.aggregation) {
                Some(agg) => Selection {
                    alias: member.qualified(),
                    expr: self.dialect.aggregate(agg, column),
                    group_expr: None,
                    aggregating: true,
                },
                // Unaggregated (number) exports group like a dimension.
                None => Selection {
                    alias: member.qualified(),
                    expr: column.clone(),
                    group_expr: Some(column),
                    aggregating: false,
                },
            });
        }

        let expr = self.measure_expr(&cube, measure)?;
        Ok(Selection {
            alias: member.qualified(),
            expr,
            group_expr: None,
            aggregating: measure.aggregation.is_aggregating(),
        })
    }

    /// Render a measure against its own cube (no CTE indirection).
    fn measure_expr(&self, cube: &Cube, measure: &Measure) -> CompilerResult<Expr> {
        let alias = cube.alias();
        let base = measure.sql.resolve(self.ctx, &alias);

        // Conditional aggregation: CASE WHEN <filters> THEN <expr> END.
        let filtered = if measure.filters.is_empty() {
            base
        } else {
            let predicates: Vec<Expr> = measure
                .filters
                .iter()
                .map(|f| f.resolve(self.ctx, &alias))
                .collect();
            let condition = and_all(predicates).expect("non-empty filter list");
            let then_value = match base {
                // COUNT(CASE WHEN ... THEN 1 END) counts matching rows.
                Expr::Star { .. } => lit_int(1),
                other => other,
            };
            Expr::Case {
                when_clauses: vec![(condition, then_value)],
                else_clause: None,
            }
        };

        if measure.aggregation.is_window() {
            return self.window_expr(cube, measure, filtered);
        }

        Ok(match measure.aggregation {
            Aggregation::Count => self.dialect.aggregate(AggregateFn::Count, filtered),
            Aggregation::CountDistinct => {
                self.dialect.aggregate(AggregateFn::CountDistinct, filtered)
            }
            Aggregation::Sum => self.dialect.aggregate(AggregateFn::Sum, filtered),
            Aggregation::Avg => self.dialect.aggregate(AggregateFn::Avg, filtered),
            Aggregation::Min => self.dialect.aggregate(AggregateFn::Min, filtered),
            Aggregation::Max => self.dialect.aggregate(AggregateFn::Max, filtered),
            Aggregation::Number => filtered,
            _ => unreachable!("window aggregations handled above"),
        })
    }

    /// Render a window-family measure: `fn(args) OVER (...)`.
    fn window_expr(&self, cube: &Cube, measure: &Measure, arg: Expr) -> CompilerResult<Expr> {
        let capabilities = self.dialect.capabilities();
        if !capabilities.supports_window_functions {
            return Err(CompilerError::UnsupportedFeature {
                feature: format!("window function '{}'", measure.aggregation.as_str()),
                dialect: self.dialect.name().into(),
            });
        }

        let function_name = measure
            .aggregation
            .window_function()
            .expect("window family checked");
        let spec = measure.window.clone().unwrap_or_default();

        let mut args: Vec<Expr> = Vec::new();
        if measure.aggregation.window_takes_expr() {
            args.push(arg);
        }
        match measure.aggregation {
            Aggregation::Lag | Aggregation::Lead => {
                if let Some(offset) = spec.offset {
                    args.push(lit_int(offset));
                    if let Some(default) = &spec.default_value {
                        args.push(json_literal(default));
                    }
                }
            }
            Aggregation::Ntile => {
                args.push(lit_int(spec.n_tile.unwrap_or(1)));
            }
            _ => {}
        }

        let alias = cube.alias();
        let mut partition_by = Vec::with_capacity(spec.partition_by.len());
        for field in &spec.partition_by {
            partition_by.push(self.window_field(cube, &alias, field)?);
        }
        let mut order_by = Vec::with_capacity(spec.order_by.len());
        for (field, dir) in &spec.order_by {
            let expr = self.window_field(cube, &alias, field)?;
            order_by.push(match dir {
                SortDir::Asc => WindowOrderBy::asc(expr),
                SortDir::Desc => WindowOrderBy::desc(expr),
            });
        }

        let frame = match &spec.frame {
            Some(frame_spec) => {
                if !capabilities.supports_frame_clause {
                    return Err(CompilerError::UnsupportedFeature {
                        feature: "window frame clause".into(),
                        dialect: self.dialect.name().into(),
                    });
                }
                Some(WindowFrame {
                    kind: match frame_spec.kind {
                        FrameKind::Rows => WindowFrameKind::Rows,
                        FrameKind::Range => WindowFrameKind::Range,
                    },
                    start: frame_bound(&frame_spec.start, true),
                    end: frame_bound(&frame_spec.end, false),
                })
            }
            None => None,
        };

        Ok(Expr::WindowFunction {
            function: Box::new(Expr::Function {
                name: function_name.into(),
                args,
                distinct: false,
            }),
            partition_by,
            order_by,
            frame,
        })
    }

    /// Resolve a window partition/order field against the owning cube's
    /// dimensions.
    fn window_field(&self, cube: &Cube, alias: &str, field: &str) -> CompilerResult<Expr> {
        let dimension = cube.dimension(field).ok_or_else(|| {
            CompilerError::plan(format!(
                "window field '{}' is not a dimension of cube '{}'",
                field, cube.name
            ))
        })?;
        Ok(dimension.sql.resolve(self.ctx, alias))
    }

    // =========================================================================
    // Filters and ranges
    // =========================================================================

    /// Date-range conditions for time dimensions of non-CTE cubes.
    fn time_range_conditions(&self, binder: &mut ParamBinder) -> CompilerResult<Vec<Expr>> {
        let mut conditions = Vec::new();
        for (member, td) in &self.plan.time_dimensions {
            if self.plan.cte_cubes.contains(&member.cube) {
                continue;
            }
            if let Some(range) = &td.date_range {
                let cube = self.cube(&member.cube)?;
                let alias = cube.alias();
                if let Some(condition) = self.range_condition(member, range, &cube, &alias, binder)?
                {
                    conditions.push(condition);
                }
            }
        }
        Ok(conditions)
    }

    fn range_condition(
        &self,
        member: &MemberRef,
        range: &DateRangeInput,
        cube: &Cube,
        alias: &str,
        binder: &mut ParamBinder,
    ) -> CompilerResult<Option<Expr>> {
        let dimension = cube
            .dimension(&member.field)
            .ok_or_else(|| CompilerError::plan(format!("unknown time dimension '{}'", member)))?;
        let expr = dimension.sql.resolve(self.ctx, alias);
        match time::normalize_range(range, self.now) {
            Some((start, end)) => {
                let start_param = binder.push(start);
                let end_param = binder.push(end);
                Ok(Some(expr.clone().gte(start_param).and(expr.lte(end_param))))
            }
            None => {
                tracing::warn!(member = %member, "skipping unparseable date range");
                Ok(None)
            }
        }
    }

    /// Partition top-level filters into WHERE and HAVING trees. Simple
    /// conditions already pushed into a CTE are dropped here.
    fn split_filters(&self) -> (Vec<&'a Filter>, Vec<&'a Filter>) {
        let mut where_filters = Vec::new();
        let mut having_filters = Vec::new();
        for filter in &self.query.filters {
            if let Filter::Condition(condition) = filter {
                if let Some(member) = MemberRef::parse(&condition.member) {
                    if self.plan.cte_cubes.contains(&member.cube) && !self.is_measure(&member) {
                        continue; // applied inside the CTE
                    }
                }
            }
            let is_measure = |m: &MemberRef| self.is_measure(m);
            if filters::references_measure(filter, &is_measure) {
                having_filters.push(filter);
            } else {
                where_filters.push(filter);
            }
        }
        (where_filters, having_filters)
    }

    fn normalize_outer_filter(
        &self,
        filter: &Filter,
        binder: &mut ParamBinder,
    ) -> CompilerResult<Option<Expr>> {
        let mut resolve =
            |member: &MemberRef| -> CompilerResult<ResolvedMember> { self.resolve_member(member) };
        filters::normalize_filter(filter, &mut resolve, binder, self.dialect, self.now)
    }

    /// Resolve a filter member in the outer query: CTE'd cubes resolve to
    /// exported columns (measures to their re-aggregates), everything
    /// else to the cube's own expressions.
    fn resolve_member(&self, member: &MemberRef) -> CompilerResult<ResolvedMember> {
        let cube = self.cube(&member.cube)?;
        let kind = self
            .registry
            .member_kind(&member.cube, &member.field)
            .ok_or_else(|| CompilerError::plan(format!("unknown member '{}'", member)))?;

        if self.plan.cte_cubes.contains(&member.cube) {
            let column = table_col(&cte_alias(&member.cube), &member.qualified());
            return Ok(match kind {
                MemberKind::Measure => {
                    let measure = cube.measure(&member.field).expect("kind checked");
                    let expr = match reaggregate(measure.aggregation) {
                        Some(agg) => self.dialect.aggregate(agg, column),
                        None => column,
                    };
                    ResolvedMember {
                        expr,
                        is_time: false,
                    }
                }
                MemberKind::Dimension(dimension_type) => ResolvedMember {
                    expr: column,
                    is_time: dimension_type == DimensionType::Time,
                },
            });
        }

        match kind {
            MemberKind::Measure => {
                let measure = cube.measure(&member.field).expect("kind checked");
                Ok(ResolvedMember {
                    expr: self.measure_expr(&cube, measure)?,
                    is_time: false,
                })
            }
            MemberKind::Dimension(dimension_type) => {
                let dimension = cube.dimension(&member.field).expect("kind checked");
                Ok(ResolvedMember {
                    expr: dimension.sql.resolve(self.ctx, &cube.alias()),
                    is_time: dimension_type == DimensionType::Time,
                })
            }
        }
    }

    /// Resolve a member inside a CTE body against the cube's own alias.
    fn resolve_inside_cube(
        &self,
        cube: &Cube,
        alias: &str,
        member: &MemberRef,
    ) -> CompilerResult<ResolvedMember> {
        let kind = self
            .registry
            .member_kind(&member.cube, &member.field)
            .ok_or_else(|| CompilerError::plan(format!("unknown member '{}'", member)))?;
        match kind {
            MemberKind::Dimension(dimension_type) => {
                let dimension = cube.dimension(&member.field).expect("kind checked");
                Ok(ResolvedMember {
                    expr: dimension.sql.resolve(self.ctx, alias),
                    is_time: dimension_type == DimensionType::Time,
                })
            }
            MemberKind::Measure => Err(CompilerError::plan(format!(
                "measure '{}' cannot be filtered inside a pre-aggregation",
                member
            ))),
        }
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    fn build_order(&self, selections: &[Selection]) -> CompilerResult<Vec<OrderByExpr>> {
        let mut order = Vec::new();
        if self.query.order.is_empty() {
            // Chart-friendly default: time dimensions ascend.
            for (member, td) in &self.plan.time_dimensions {
                if td.granularity.is_some() {
                    order.push(OrderByExpr::asc(col(&member.qualified())));
                }
            }
            return Ok(order);
        }

        for (member_name, direction) in self.query.order.iter() {
            let expr = if selections.iter().any(|s| &s.alias == member_name) {
                // Selected members order by their output alias.
                col(member_name)
            } else {
                let member = MemberRef::parse(member_name).ok_or_else(|| {
                    CompilerError::plan(format!("invalid order member '{}'", member_name))
                })?;
                self.resolve_member(&member)?.expr
            };
            order.push(match direction {
                OrderDirection::Asc => OrderByExpr::asc(expr),
                OrderDirection::Desc => OrderByExpr::desc(expr),
            });
        }
        Ok(order)
    }

    // =========================================================================
    // Lookup helpers
    // =========================================================================

    fn cube(&self, name: &str) -> CompilerResult<Arc<Cube>> {
        self.registry
            .get(name)
            .ok_or_else(|| CompilerError::plan(format!("unknown cube '{}'", name)))
    }

    fn is_measure(&self, member: &MemberRef) -> bool {
        matches!(
            self.registry.member_kind(&member.cube, &member.field),
            Some(MemberKind::Measure)
        )
    }
}

/// Alias of a pre-aggregation CTE for a cube.
pub(crate) fn cte_alias(cube_name: &str) -> String {
    format!("{}_agg", cube_name.to_lowercase())
}

/// How a pre-aggregated measure re-aggregates in the outer query.
/// Counts become sums of partial counts; avg-of-avgs is accepted as an
/// approximation.
fn reaggregate(aggregation: Aggregation) -> Option<AggregateFn> {
    match aggregation {
        Aggregation::Count | Aggregation::CountDistinct | Aggregation::Sum => {
            Some(AggregateFn::Sum)
        }
        Aggregation::Avg => Some(AggregateFn::Avg),
        Aggregation::Min => Some(AggregateFn::Min),
        Aggregation::Max => Some(AggregateFn::Max),
        _ => None,
    }
}

/// Map a frame bound; a plain offset precedes at the start of the frame
/// and follows at the end.
fn frame_bound(bound: &FrameBound, is_start: bool) -> WindowFrameBound {
    match bound {
        FrameBound::Unbounded => {
            if is_start {
                WindowFrameBound::UnboundedPreceding
            } else {
                WindowFrameBound::UnboundedFollowing
            }
        }
        FrameBound::Current => WindowFrameBound::CurrentRow,
        FrameBound::Offset(0) => WindowFrameBound::CurrentRow,
        FrameBound::Offset(n) => {
            if is_start {
                WindowFrameBound::Preceding(n.unsigned_abs())
            } else {
                WindowFrameBound::Following(n.unsigned_abs())
            }
        }
    }
}

/// Trusted cube-definition constants (lag/lead defaults) inline as
/// literals.
fn json_literal(value: &serde_json::Value) -> Expr {
    match value {
        serde_json::Value::Null => lit_null(),
        serde_json::Value::Bool(b) => lit_bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                lit_int(i)
            } else {
                lit_float(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => lit_str(s),
        other => lit_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BaseQuery, CubeJoin, Dimension, SecurityContext, WindowSpec};
    use crate::semantic::planner::plan_query;
    use crate::semantic::query::{FilterCondition, OrderSpec, TimeDimensionRef};
    use crate::sql::expr::star;
    use crate::sql::params::ParamValue;
    use serde_json::json;

    fn org_predicate(alias: &str, ctx: &QueryContext) -> Expr {
        let org = ctx
            .security("organisationId")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        table_col(alias, "organisation_id").eq(json_literal(&org))
    }

    fn registry() -> CubeRegistry {
        let mut registry = CubeRegistry::new();
        registry.register(
            Cube::builder("Employees")
                .base_query(|ctx| {
                    Ok(BaseQuery::from_table(TableRef::new("employees"))
                        .filter(org_predicate("employees", ctx)))
                })
                .dimension("name", Dimension::string("name"))
                .dimension("hiredAt", Dimension::time("hired_at"))
                .measure("count", crate::model::Measure::count())
                .measure(
                    "activeCount",
                    crate::model::Measure::count()
                        .filter(table_col("employees", "active").eq(lit_bool(true))),
                )
                .measure(
                    "rowNumber",
                    crate::model::Measure::window(Aggregation::RowNumber, star()),
                )
                .measure(
                    "salaryRank",
                    crate::model::Measure::window(Aggregation::Rank, star()).window_spec(
                        WindowSpec::default()
                            .partition_by(vec!["name"])
                            .order_by(vec![("hiredAt", SortDir::Desc)]),
                    ),
                )
                .join("Departments", CubeJoin::belongs_to("department_id", "id"))
                .join("Productivity", CubeJoin::has_many("id", "employee_id"))
                .build(),
        );
        registry.register(
            Cube::builder("Departments")
                .base_query(|ctx| {
                    Ok(BaseQuery::from_table(TableRef::new("departments"))
                        .filter(org_predicate("departments", ctx)))
                })
                .dimension("name", Dimension::string("name"))
                .measure("count", crate::model::Measure::count())
                .build(),
        );
        registry.register(
            Cube::builder("Productivity")
                .base_query(|ctx| {
                    Ok(BaseQuery::from_table(TableRef::new("productivity"))
                        .filter(org_predicate("productivity", ctx)))
                })
                .dimension("date", Dimension::time("date"))
                .dimension("language", Dimension::string("language"))
                .measure(
                    "totalLinesOfCode",
                    crate::model::Measure::sum("lines_of_code"),
                )
                .measure(
                    "latestLines",
                    crate::model::Measure::window(Aggregation::LastValue, "lines_of_code"),
                )
                .build(),
        );
        registry
    }

    fn ctx() -> QueryContext {
        let mut sc = SecurityContext::new();
        sc.insert("organisationId".into(), json!(1));
        QueryContext::new(sc, "Employees", SemanticQuery::default())
    }

    fn now() -> DateTime<Utc> {
        time::parse_datetime("2024-06-15 12:00:00").unwrap()
    }

    fn build(query: &SemanticQuery) -> SqlObject {
        let registry = registry();
        let plan = plan_query(&registry, query).unwrap();
        build_sql(&registry, &plan, query, &ctx(), Dialect::Postgres, now()).unwrap()
    }

    #[test]
    fn test_simple_count() {
        let query = SemanticQuery {
            measures: vec!["Employees.count".into()],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("COUNT(*) AS \"Employees.count\""));
        assert!(sql.sql.contains("FROM \"employees\""));
        assert!(sql.sql.contains("\"organisation_id\" = 1"));
        assert!(!sql.sql.contains("JOIN"));
        assert!(!sql.sql.contains("WITH"));
        assert!(sql.params.is_empty());
    }

    #[test]
    fn test_belongs_to_inner_join_with_security_on_clause() {
        let query = SemanticQuery {
            measures: vec!["Employees.count".into()],
            dimensions: vec!["Departments.name".into()],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("INNER JOIN \"departments\""));
        // one security predicate per cube instance
        assert_eq!(sql.sql.matches("\"organisation_id\" = 1").count(), 2);
        assert!(sql.sql.contains("GROUP BY"));
    }

    #[test]
    fn test_filter_values_are_parameterized() {
        let query = SemanticQuery {
            measures: vec!["Employees.count".into()],
            filters: vec![Filter::Condition(FilterCondition {
                member: "Employees.name".into(),
                operator: "equals".into(),
                values: vec![json!("Alex Chen"), json!("Sarah Johnson")],
            })],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("IN ($1, $2)"));
        assert!(!sql.sql.contains("Alex Chen"));
        assert_eq!(sql.params.len(), 2);
    }

    #[test]
    fn test_hasmany_measure_builds_cte() {
        let query = SemanticQuery {
            measures: vec![
                "Employees.count".into(),
                "Productivity.totalLinesOfCode".into(),
            ],
            dimensions: vec!["Departments.name".into()],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.starts_with("WITH \"productivity_agg\" AS ("));
        assert!(sql.sql.contains("LEFT JOIN \"productivity_agg\""));
        // inner aggregation groups by the join key
        assert!(sql.sql.contains("GROUP BY \"productivity\".\"employee_id\""));
        // outer re-aggregates the partial sums
        assert!(sql
            .sql
            .contains("SUM(\"productivity_agg\".\"Productivity.totalLinesOfCode\")"));
        // security predicate present for all three cubes
        assert_eq!(sql.sql.matches("\"organisation_id\" = 1").count(), 3);
    }

    #[test]
    fn test_time_dimension_truncation_and_range() {
        let query = SemanticQuery {
            measures: vec!["Productivity.totalLinesOfCode".into()],
            time_dimensions: vec![TimeDimensionRef {
                dimension: "Productivity.date".into(),
                granularity: Some(Granularity::Month),
                date_range: Some(DateRangeInput::Range(vec![
                    "2024-01-01".into(),
                    "2024-03-31".into(),
                ])),
                compare_date_range: None,
            }],
            order: OrderSpec(vec![("Productivity.date".into(), OrderDirection::Asc)]),
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql
            .sql
            .contains("DATE_TRUNC('month', \"productivity\".\"date\")"));
        assert!(sql.sql.contains(">= $1"));
        assert!(sql.sql.contains("<= $2"));
        assert!(sql.sql.contains("ORDER BY \"Productivity.date\" ASC"));
        assert_eq!(sql.params.len(), 2);
    }

    #[test]
    fn test_limit_offset_parameterized() {
        let query = SemanticQuery {
            measures: vec!["Employees.count".into()],
            dimensions: vec!["Employees.name".into()],
            limit: Some(10),
            offset: Some(20),
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("LIMIT $1"));
        assert!(sql.sql.contains("OFFSET $2"));
        assert_eq!(sql.params, vec![ParamValue::Int(10), ParamValue::Int(20)]);
    }

    #[test]
    fn test_conditional_aggregation_renders_case() {
        let query = SemanticQuery {
            measures: vec!["Employees.activeCount".into()],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("COUNT(CASE WHEN"));
        assert!(sql.sql.contains("THEN 1 END)"));
    }

    #[test]
    fn test_window_measure_without_config_renders_empty_over() {
        let query = SemanticQuery {
            measures: vec!["Employees.rowNumber".into()],
            dimensions: vec!["Employees.name".into()],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("ROW_NUMBER() OVER ()"));
        // window output does not force grouping
        assert!(!sql.sql.contains("GROUP BY"));
    }

    #[test]
    fn test_window_measure_with_partition() {
        let query = SemanticQuery {
            measures: vec!["Employees.salaryRank".into()],
            dimensions: vec!["Employees.name".into()],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("RANK() OVER (PARTITION BY"));
        assert!(sql.sql.contains("ORDER BY \"employees\".\"hired_at\" DESC"));
    }

    #[test]
    fn test_measure_filter_goes_to_having() {
        let query = SemanticQuery {
            measures: vec!["Employees.count".into()],
            dimensions: vec!["Departments.name".into()],
            filters: vec![Filter::Condition(FilterCondition {
                member: "Employees.count".into(),
                operator: "gt".into(),
                values: vec![json!(3)],
            })],
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql.sql.contains("HAVING COUNT(*) > $1"));
    }

    #[test]
    fn test_order_by_alias_and_direction() {
        let query = SemanticQuery {
            measures: vec!["Employees.count".into()],
            dimensions: vec!["Departments.name".into()],
            order: OrderSpec(vec![
                ("Employees.count".into(), OrderDirection::Desc),
                ("Departments.name".into(), OrderDirection::Asc),
            ]),
            ..Default::default()
        };
        let sql = build(&query);
        assert!(sql
            .sql
            .contains("ORDER BY \"Employees.count\" DESC, \"Departments.name\" ASC"));
    }

    #[test]
    fn test_byte_stable_output() {
        let query = SemanticQuery {
            measures: vec![
                "Employees.count".into(),
                "Productivity.totalLinesOfCode".into(),
            ],
            dimensions: vec!["Departments.name".into()],
            ..Default::default()
        };
        assert_eq!(build(&query).sql, build(&query).sql);
    }

    #[test]
    fn test_window_measure_on_preaggregated_cube_is_unsupported() {
        let registry = registry();
        let query = SemanticQuery {
            measures: vec!["Employees.count".into(), "Productivity.latestLines".into()],
            ..Default::default()
        };
        let plan = plan_query(&registry, &query).unwrap();
        let err = build_sql(&registry, &plan, &query, &ctx(), Dialect::Postgres, now()).unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedFeature { .. }));
    }

    #[test]
    fn test_cte_filter_pushed_inside() {
        let query = SemanticQuery {
            measures: vec![
                "Employees.count".into(),
                "Productivity.totalLinesOfCode".into(),
            ],
            filters: vec![Filter::Condition(FilterCondition {
                member: "Productivity.language".into(),
                operator: "equals".into(),
                values: vec![json!("rust")],
            })],
            ..Default::default()
        };
        let sql = build(&query);
        // predicate lands inside the CTE body, before the outer SELECT
        let with_end = sql.sql.find("LEFT JOIN").expect("join present");
        let cte_body = &sql.sql[..with_end];
        assert!(cte_body.contains("$1"));
        assert_eq!(sql.params, vec![ParamValue::String("rust".into())]);
    }
}
