//! Filter normalization: the recursive wire filter tree becomes one
//! expression per tree, with every value bound as a parameter.
//!
//! Logical nodes recurse and combine with AND/OR; empty branches
//! contribute no predicate. Unparseable date values make the offending
//! condition disappear with a warning rather than failing the query.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::{CompilerError, CompilerResult};
use crate::semantic::query::{DateRangeInput, Filter, FilterCondition, MemberRef};
use crate::semantic::time;
use crate::sql::dialect::StringConditionOp;
use crate::sql::expr::{and_all, lit_int, or_all, Expr, ExprExt};
use crate::sql::params::{ParamBinder, ParamValue};
use crate::sql::{Dialect, SqlDialect};

/// A member resolved to a concrete expression for filtering.
pub struct ResolvedMember {
    pub expr: Expr,
    /// Time-typed members normalize scalar values to datetimes.
    pub is_time: bool,
}

/// Resolver callback: the builder supplies member lookup so the
/// normalizer stays independent of plan details (CTE aliasing, measure
/// re-aggregation).
pub type MemberResolver<'a> = dyn FnMut(&MemberRef) -> CompilerResult<ResolvedMember> + 'a;

/// Normalize one filter tree. `None` means the tree contributes no
/// predicate.
pub fn normalize_filter(
    filter: &Filter,
    resolve: &mut MemberResolver<'_>,
    binder: &mut ParamBinder,
    dialect: Dialect,
    now: DateTime<Utc>,
) -> CompilerResult<Option<Expr>> {
    match filter {
        Filter::And { and } => {
            let children = normalize_children(and, resolve, binder, dialect, now)?;
            Ok(and_all(children))
        }
        Filter::Or { or } => {
            let children = normalize_children(or, resolve, binder, dialect, now)?;
            Ok(or_all(children))
        }
        Filter::Condition(condition) => normalize_condition(condition, resolve, binder, dialect, now),
    }
}

fn normalize_children(
    filters: &[Filter],
    resolve: &mut MemberResolver<'_>,
    binder: &mut ParamBinder,
    dialect: Dialect,
    now: DateTime<Utc>,
) -> CompilerResult<Vec<Expr>> {
    let mut exprs = Vec::with_capacity(filters.len());
    for filter in filters {
        if let Some(expr) = normalize_filter(filter, resolve, binder, dialect, now)? {
            exprs.push(expr);
        }
    }
    Ok(exprs)
}

fn normalize_condition(
    condition: &FilterCondition,
    resolve: &mut MemberResolver<'_>,
    binder: &mut ParamBinder,
    dialect: Dialect,
    now: DateTime<Utc>,
) -> CompilerResult<Option<Expr>> {
    let member = MemberRef::parse(&condition.member).ok_or_else(|| {
        CompilerError::plan(format!("invalid member '{}' in filter", condition.member))
    })?;
    let resolved = resolve(&member)?;
    let expr = resolved.expr;
    let values = &condition.values;

    let normalized = match condition.operator.as_str() {
        "equals" => {
            let params = bind_scalars(values, resolved.is_time, binder);
            match params.len() {
                // No values can match: literal-false predicate.
                0 => Some(literal_false()),
                1 => Some(expr.eq(params.into_iter().next().expect("len checked"))),
                _ => Some(expr.in_list(params)),
            }
        }
        "notEquals" => {
            let params = bind_scalars(values, resolved.is_time, binder);
            match params.len() {
                0 => None,
                1 => Some(expr.ne(params.into_iter().next().expect("len checked"))),
                _ => Some(expr.not_in_list(params)),
            }
        }
        "contains" => string_conditions(
            expr,
            StringConditionOp::Contains,
            values,
            binder,
            dialect,
            false,
        ),
        "notContains" => string_conditions(
            expr,
            StringConditionOp::NotContains,
            values,
            binder,
            dialect,
            true,
        ),
        "startsWith" => string_conditions(
            expr,
            StringConditionOp::StartsWith,
            values,
            binder,
            dialect,
            false,
        ),
        "endsWith" => string_conditions(
            expr,
            StringConditionOp::EndsWith,
            values,
            binder,
            dialect,
            false,
        ),
        "gt" | "gte" | "lt" | "lte" => {
            comparison(expr, &condition.operator, values, resolved.is_time, binder)
        }
        "set" => Some(expr.is_not_null()),
        "notSet" => Some(expr.is_null()),
        "inDateRange" => in_date_range(expr, values, binder, now),
        "beforeDate" => date_bound(expr, values, binder, now, DateEdge::Before),
        "afterDate" => date_bound(expr, values, binder, now, DateEdge::After),
        other => {
            // Validation reports unknown operators; reaching here means the
            // caller skipped validation.
            return Err(CompilerError::plan(format!(
                "unknown filter operator '{}'",
                other
            )));
        }
    };

    Ok(normalized)
}

/// `1 <> 1`, the no-row predicate for `equals` with an empty value list.
fn literal_false() -> Expr {
    lit_int(1).ne(lit_int(1))
}

/// Bind scalar values; time-typed members parse values to datetimes and
/// drop (with a warning) any that don't parse.
fn bind_scalars(
    values: &[serde_json::Value],
    is_time: bool,
    binder: &mut ParamBinder,
) -> Vec<Expr> {
    values
        .iter()
        .filter_map(|value| {
            if is_time {
                let text = value.as_str()?;
                match time::parse_datetime(text) {
                    Some(dt) => Some(binder.push(dt)),
                    None => {
                        warn!(value = text, "skipping unparseable datetime filter value");
                        None
                    }
                }
            } else {
                Some(binder.push(ParamValue::from_json(value)))
            }
        })
        .collect()
}

fn string_conditions(
    expr: Expr,
    op: StringConditionOp,
    values: &[serde_json::Value],
    binder: &mut ParamBinder,
    dialect: Dialect,
    negated: bool,
) -> Option<Expr> {
    let conditions: Vec<Expr> = values
        .iter()
        .filter_map(|value| value.as_str())
        .map(|value| {
            let pattern = match op {
                StringConditionOp::Contains | StringConditionOp::NotContains => {
                    format!("%{}%", escape_like(value))
                }
                StringConditionOp::StartsWith => format!("{}%", escape_like(value)),
                StringConditionOp::EndsWith => format!("%{}", escape_like(value)),
            };
            let pattern_param = binder.push(pattern);
            dialect.string_condition(expr.clone(), op, pattern_param)
        })
        .collect();

    if negated {
        // Negated matches must all hold.
        and_all(conditions)
    } else {
        or_all(conditions)
    }
}

/// LIKE wildcards in user values are literals, not wildcards.
fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn comparison(
    expr: Expr,
    operator: &str,
    values: &[serde_json::Value],
    is_time: bool,
    binder: &mut ParamBinder,
) -> Option<Expr> {
    let value = match values.first() {
        Some(v) => v,
        None => {
            warn!(operator, "comparison filter without a value skipped");
            return None;
        }
    };
    let mut params = bind_scalars(std::slice::from_ref(value), is_time, binder);
    let param = params.pop()?;
    Some(match operator {
        "gt" => expr.gt(param),
        "gte" => expr.gte(param),
        "lt" => expr.lt(param),
        _ => expr.lte(param),
    })
}

fn in_date_range(
    expr: Expr,
    values: &[serde_json::Value],
    binder: &mut ParamBinder,
    now: DateTime<Utc>,
) -> Option<Expr> {
    let strings: Vec<String> = values
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    let input = match strings.len() {
        1 => DateRangeInput::Expression(strings.into_iter().next().expect("len checked")),
        2 => DateRangeInput::Range(strings),
        _ => {
            warn!("inDateRange expects one expression or a [start, end] pair; filter skipped");
            return None;
        }
    };
    match time::normalize_range(&input, now) {
        Some((start, end)) => {
            let start_param = binder.push(start);
            let end_param = binder.push(end);
            Some(expr.clone().gte(start_param).and(expr.lte(end_param)))
        }
        None => {
            warn!(?input, "skipping unparseable date range filter");
            None
        }
    }
}

enum DateEdge {
    Before,
    After,
}

fn date_bound(
    expr: Expr,
    values: &[serde_json::Value],
    binder: &mut ParamBinder,
    now: DateTime<Utc>,
    edge: DateEdge,
) -> Option<Expr> {
    let text = values.first().and_then(|v| v.as_str())?;
    let input = DateRangeInput::Expression(text.into());
    match time::normalize_range(&input, now) {
        // A bare date covers the whole day: before compares against its
        // start, after against its end.
        Some((start, end)) => Some(match edge {
            DateEdge::Before => expr.lt(binder.push(start)),
            DateEdge::After => expr.gt(binder.push(end)),
        }),
        None => {
            warn!(value = text, "skipping unparseable date bound filter");
            None
        }
    }
}

/// Does this filter tree reference any member the predicate considers a
/// measure? Used to route trees between WHERE and HAVING.
pub fn references_measure(filter: &Filter, is_measure: &dyn Fn(&MemberRef) -> bool) -> bool {
    filter.conditions().iter().any(|condition| {
        MemberRef::parse(&condition.member)
            .map(|m| is_measure(&m))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::expr::table_col;
    use serde_json::json;

    fn resolver(is_time: bool) -> impl FnMut(&MemberRef) -> CompilerResult<ResolvedMember> {
        move |member| {
            Ok(ResolvedMember {
                expr: table_col("employees", &member.field),
                is_time,
            })
        }
    }

    fn sql_of(expr: &Expr) -> String {
        expr.to_tokens_for_dialect(Dialect::Postgres)
            .serialize(Dialect::Postgres)
    }

    fn now() -> DateTime<Utc> {
        time::parse_datetime("2024-06-15 12:00:00").unwrap()
    }

    fn condition(member: &str, operator: &str, values: Vec<serde_json::Value>) -> Filter {
        Filter::Condition(FilterCondition {
            member: member.into(),
            operator: operator.into(),
            values,
        })
    }

    #[test]
    fn test_equals_single_value() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition("Employees.name", "equals", vec![json!("Alex Chen")]),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sql_of(&expr), "\"employees\".\"name\" = $1");
        assert_eq!(
            binder.into_params(),
            vec![ParamValue::String("Alex Chen".into())]
        );
    }

    #[test]
    fn test_equals_multiple_values_in_list() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition(
                "Employees.name",
                "equals",
                vec![json!("Alex Chen"), json!("Sarah Johnson")],
            ),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sql_of(&expr), "\"employees\".\"name\" IN ($1, $2)");
    }

    #[test]
    fn test_equals_empty_is_literal_false() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition("Employees.name", "equals", vec![]),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sql_of(&expr), "1 <> 1");
        assert!(binder.is_empty());
    }

    #[test]
    fn test_not_equals_empty_contributes_nothing() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition("Employees.name", "notEquals", vec![]),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap();
        assert!(expr.is_none());
    }

    #[test]
    fn test_contains_binds_pattern() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition("Employees.name", "contains", vec![json!("che")]),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sql_of(&expr), "(\"employees\".\"name\" ILIKE $1)");
        assert_eq!(binder.into_params(), vec![ParamValue::String("%che%".into())]);
    }

    #[test]
    fn test_contains_escapes_wildcards() {
        let mut binder = ParamBinder::new();
        normalize_filter(
            &condition("Employees.name", "contains", vec![json!("50%_x")]),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap();
        assert_eq!(
            binder.into_params(),
            vec![ParamValue::String("%50\\%\\_x%".into())]
        );
    }

    #[test]
    fn test_set_not_set() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition("Employees.name", "set", vec![]),
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(sql_of(&expr), "\"employees\".\"name\" IS NOT NULL");
    }

    #[test]
    fn test_in_date_range_binds_day_bounds() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition(
                "Employees.hiredAt",
                "inDateRange",
                vec![json!("2024-01-01"), json!("2024-03-31")],
            ),
            &mut resolver(true),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        let sql = sql_of(&expr);
        assert!(sql.contains(">= $1"));
        assert!(sql.contains("<= $2"));
        let params = binder.into_params();
        assert_eq!(
            params[0],
            ParamValue::DateTime(time::parse_datetime("2024-01-01 00:00:00").unwrap())
        );
        assert_eq!(
            params[1],
            ParamValue::DateTime(time::parse_datetime("2024-03-31 23:59:59.999").unwrap())
        );
    }

    #[test]
    fn test_unparseable_date_skips_filter() {
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &condition("Employees.hiredAt", "beforeDate", vec![json!("not a date")]),
            &mut resolver(true),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap();
        assert!(expr.is_none());
        assert!(binder.is_empty());
    }

    #[test]
    fn test_logical_tree() {
        let filter = Filter::And {
            and: vec![
                condition("Employees.name", "set", vec![]),
                Filter::Or {
                    or: vec![
                        condition("Employees.salary", "gt", vec![json!(100)]),
                        condition("Employees.salary", "lt", vec![json!(10)]),
                    ],
                },
            ],
        };
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &filter,
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap()
        .unwrap();
        let sql = sql_of(&expr);
        assert!(sql.contains("IS NOT NULL AND ("));
        assert!(sql.contains("> $1 OR"));
        assert!(sql.contains("< $2"));
        assert_eq!(binder.len(), 2);
    }

    #[test]
    fn test_empty_logical_branch_contributes_nothing() {
        let filter = Filter::Or { or: vec![] };
        let mut binder = ParamBinder::new();
        let expr = normalize_filter(
            &filter,
            &mut resolver(false),
            &mut binder,
            Dialect::Postgres,
            now(),
        )
        .unwrap();
        assert!(expr.is_none());
    }

    #[test]
    fn test_references_measure() {
        let filter = Filter::And {
            and: vec![
                condition("Employees.name", "set", vec![]),
                condition("Employees.count", "gt", vec![json!(5)]),
            ],
        };
        let is_measure = |m: &MemberRef| m.field == "count";
        assert!(references_measure(&filter, &is_measure));
        let only_dims = condition("Employees.name", "set", vec![]);
        assert!(!references_measure(&only_dims, &is_measure));
    }
}
