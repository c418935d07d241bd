//! Security-oriented properties: tenant predicate injection and
//! parameterization of every query-supplied literal.

mod common;

use common::{fixture_compiler, security_context, MockExecutor};
use serde_json::json;

use strata::semantic::query::SemanticQuery;

fn query(value: serde_json::Value) -> SemanticQuery {
    serde_json::from_value(value).expect("valid query json")
}

/// Every cube touched by the query contributes its security predicate
/// exactly once: a distinctive sentinel tenant id must appear once per
/// cube instance in the generated SQL.
#[test]
fn test_security_predicate_once_per_cube() {
    let executor = MockExecutor::returning(vec![]);
    let compiler = fixture_compiler(executor);

    let mut ctx = strata::SecurityContext::new();
    ctx.insert("organisationId".into(), json!(424242));

    let single = compiler
        .sql(&query(json!({"measures": ["Employees.count"]})), &ctx)
        .unwrap();
    assert_eq!(single.sql.matches("424242").count(), 1);

    let multi = compiler
        .sql(
            &query(json!({
                "measures": ["Employees.count", "Productivity.totalLinesOfCode"],
                "dimensions": ["Departments.name"]
            })),
            &ctx,
        )
        .unwrap();
    // three cubes, three predicates (one inside the CTE)
    assert_eq!(multi.sql.matches("424242").count(), 3);
}

/// SQL-injection payloads in filter values must never appear in the SQL
/// text; they travel as bound parameters only.
#[test]
fn test_injection_payloads_never_reach_sql_text() {
    let executor = MockExecutor::returning(vec![]);
    let compiler = fixture_compiler(executor);

    let payloads = [
        "'; DROP TABLE employees; --",
        "1 OR 1=1",
        "\" OR \"\"=\"",
        "Robert'); DELETE FROM departments;--",
        "%' ESCAPE '",
    ];

    for payload in payloads {
        for operator in ["equals", "contains", "startsWith", "endsWith", "gt"] {
            let sql = compiler
                .sql(
                    &query(json!({
                        "measures": ["Employees.count"],
                        "filters": [{
                            "member": "Employees.name",
                            "operator": operator,
                            "values": [payload]
                        }]
                    })),
                    &security_context(),
                )
                .unwrap();
            assert!(
                !sql.sql.contains(payload),
                "payload {:?} leaked into SQL for operator {}: {}",
                payload,
                operator,
                sql.sql
            );
            assert_eq!(sql.params.len(), 1, "operator {}", operator);
        }
    }
}

/// Limit and offset are query literals too.
#[test]
fn test_limit_offset_not_inlined() {
    let executor = MockExecutor::returning(vec![]);
    let compiler = fixture_compiler(executor);

    let sql = compiler
        .sql(
            &query(json!({
                "measures": ["Employees.count"],
                "dimensions": ["Employees.name"],
                "limit": 987654,
                "offset": 123456
            })),
            &security_context(),
        )
        .unwrap();

    assert!(!sql.sql.contains("987654"));
    assert!(!sql.sql.contains("123456"));
    assert_eq!(sql.params.len(), 2);
}

/// Same query, same context: byte-identical SQL.
#[test]
fn test_sql_is_byte_stable() {
    let executor = MockExecutor::returning(vec![]);
    let compiler = fixture_compiler(executor);

    let q = query(json!({
        "measures": ["Employees.count", "Productivity.totalLinesOfCode"],
        "dimensions": ["Departments.name"],
        "filters": [{"member": "Employees.name", "operator": "set"}],
        "order": {"Departments.name": "asc"}
    }));

    let first = compiler.sql(&q, &security_context()).unwrap();
    let second = compiler.sql(&q, &security_context()).unwrap();
    assert_eq!(first.sql, second.sql);
    assert_eq!(first.params, second.params);
}

/// Permuting the measures list cannot change the primary cube or the
/// number of pre-aggregation CTEs.
#[test]
fn test_planner_determinism_under_permutation() {
    let executor = MockExecutor::returning(vec![]);
    let compiler = fixture_compiler(executor);

    let forward = compiler
        .sql(
            &query(json!({
                "measures": ["Employees.count", "Productivity.totalLinesOfCode"],
                "dimensions": ["Departments.name"]
            })),
            &security_context(),
        )
        .unwrap();
    let reversed = compiler
        .sql(
            &query(json!({
                "measures": ["Productivity.totalLinesOfCode", "Employees.count"],
                "dimensions": ["Departments.name"]
            })),
            &security_context(),
        )
        .unwrap();

    assert_eq!(
        forward.sql.matches("WITH").count(),
        reversed.sql.matches("WITH").count()
    );
    assert_eq!(
        forward.sql.contains("FROM \"employees\""),
        reversed.sql.contains("FROM \"employees\"")
    );
}

/// Two compilers over one executor share nothing: registering a cube in
/// one is invisible to the other.
#[test]
fn test_compiler_instances_are_independent() {
    let executor = MockExecutor::returning(vec![]);
    let first = fixture_compiler(executor.clone());
    let second = strata::Compiler::new(executor);

    assert_eq!(first.metadata().len(), 3);
    assert!(second.metadata().is_empty());
}
