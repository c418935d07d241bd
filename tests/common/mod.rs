//! Shared fixtures for the integration tests: the Employees /
//! Departments / Productivity cube trio and a scriptable mock executor.

// Not every test binary exercises every fixture helper.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use strata::error::CompilerResult;
use strata::executor::{DatabaseExecutor, EngineType, Row};
use strata::model::{BaseQuery, Cube, CubeJoin, Dimension, Measure, QueryContext, SecurityContext};
use strata::sql::expr::{lit_int, table_col, Expr, ExprExt};
use strata::sql::params::SqlObject;
use strata::sql::query::TableRef;
use strata::Compiler;

/// Canned-response executor that records every statement it runs.
pub struct MockExecutor {
    engine: EngineType,
    pub calls: Mutex<Vec<SqlObject>>,
    #[allow(clippy::type_complexity)]
    handler: Box<dyn Fn(&SqlObject) -> CompilerResult<Vec<Row>> + Send + Sync>,
}

impl MockExecutor {
    pub fn returning(rows: Vec<Row>) -> Arc<Self> {
        Arc::new(Self {
            engine: EngineType::Postgres,
            calls: Mutex::new(vec![]),
            handler: Box::new(move |_| Ok(rows.clone())),
        })
    }

    pub fn with_handler(
        handler: impl Fn(&SqlObject) -> CompilerResult<Vec<Row>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            engine: EngineType::Postgres,
            calls: Mutex::new(vec![]),
            handler: Box::new(handler),
        })
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("mock lock")
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }
}

#[async_trait]
impl DatabaseExecutor for MockExecutor {
    async fn execute(&self, sql: &SqlObject) -> CompilerResult<Vec<Row>> {
        self.calls.lock().expect("mock lock").push(sql.clone());
        (self.handler)(sql)
    }

    fn engine_type(&self) -> EngineType {
        self.engine
    }
}

fn org_predicate(alias: &str, ctx: &QueryContext) -> Expr {
    let org = ctx
        .security("organisationId")
        .and_then(|v| v.as_i64())
        .unwrap_or(-1);
    table_col(alias, "organisation_id").eq(lit_int(org))
}

/// The fixture model: 12 employees across 4 departments, per-employee
/// productivity rows.
pub fn fixture_compiler(executor: Arc<MockExecutor>) -> Compiler {
    let mut compiler = Compiler::new(executor);

    compiler.register_cube(
        Cube::builder("Employees")
            .title("Employees")
            .base_query(|ctx| {
                Ok(BaseQuery::from_table(TableRef::new("employees"))
                    .filter(org_predicate("employees", ctx)))
            })
            .dimension("id", Dimension::number("id").primary_key())
            .dimension("name", Dimension::string("name"))
            .dimension("hiredAt", Dimension::time("hired_at"))
            .measure("count", Measure::count())
            .measure("avgSalary", Measure::avg("salary"))
            .join("Departments", CubeJoin::belongs_to("department_id", "id"))
            .join("Productivity", CubeJoin::has_many("id", "employee_id"))
            .build(),
    );

    compiler.register_cube(
        Cube::builder("Departments")
            .title("Departments")
            .base_query(|ctx| {
                Ok(BaseQuery::from_table(TableRef::new("departments"))
                    .filter(org_predicate("departments", ctx)))
            })
            .dimension("id", Dimension::number("id").primary_key())
            .dimension("name", Dimension::string("name"))
            .measure("count", Measure::count())
            .build(),
    );

    compiler.register_cube(
        Cube::builder("Productivity")
            .title("Productivity")
            .base_query(|ctx| {
                Ok(BaseQuery::from_table(TableRef::new("productivity"))
                    .filter(org_predicate("productivity", ctx)))
            })
            .dimension("date", Dimension::time("date"))
            .dimension("language", Dimension::string("language"))
            .measure("totalLinesOfCode", Measure::sum("lines_of_code"))
            .measure("count", Measure::count())
            .build(),
    );

    compiler
}

pub fn security_context() -> SecurityContext {
    let mut ctx = SecurityContext::new();
    ctx.insert("organisationId".into(), json!(1));
    ctx
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    let mut row = Row::new();
    for (key, value) in pairs {
        row.insert(key.to_string(), value.clone());
    }
    row
}
