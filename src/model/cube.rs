// src/model/cube.rs
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{CompilerError, CompilerResult};
use crate::model::dimension::Dimension;
use crate::model::join::CubeJoin;
use crate::model::measure::Measure;
use crate::semantic::query::SemanticQuery;
use crate::sql::expr::{star, Expr};
use crate::sql::query::{JoinType, TableRef};

/// Caller-supplied tenant data, injected into every cube's base query.
///
/// The compiler reads no specific key; by convention it carries
/// `organisationId` (and optionally `userId`, `userRole`).
pub type SecurityContext = serde_json::Map<String, serde_json::Value>;

/// Context handed to cube closures when a query is planned.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub security_context: SecurityContext,
    /// The primary cube of the query being planned.
    pub cube: String,
    /// The query being planned (echoed for closures that branch on it).
    pub query: SemanticQuery,
}

impl QueryContext {
    pub fn new(security_context: SecurityContext, cube: &str, query: SemanticQuery) -> Self {
        Self {
            security_context,
            cube: cube.into(),
            query,
        }
    }

    /// Read a key from the security context.
    pub fn security(&self, key: &str) -> Option<&serde_json::Value> {
        self.security_context.get(key)
    }
}

/// A resolvable SQL expression: a bare column on the cube's base table,
/// a fixed expression, or a function of the query context.
#[derive(Clone)]
pub enum SqlSource {
    /// Column on the cube's base table; qualified with the cube alias at
    /// resolution time.
    Column(String),
    /// Fixed expression, used as written.
    Expr(Expr),
    /// Context-dependent expression.
    Thunk(Arc<dyn Fn(&QueryContext) -> Expr + Send + Sync>),
}

impl SqlSource {
    /// Build from a closure over the query context.
    pub fn thunk(f: impl Fn(&QueryContext) -> Expr + Send + Sync + 'static) -> Self {
        SqlSource::Thunk(Arc::new(f))
    }

    /// Resolve to a concrete expression against the cube's table alias.
    pub fn resolve(&self, ctx: &QueryContext, alias: &str) -> Expr {
        match self {
            SqlSource::Column(column) => Expr::Column {
                table: Some(alias.into()),
                column: column.clone(),
            },
            SqlSource::Expr(expr) => expr.clone(),
            SqlSource::Thunk(f) => f(ctx),
        }
    }
}

impl fmt::Debug for SqlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlSource::Column(c) => f.debug_tuple("Column").field(c).finish(),
            SqlSource::Expr(e) => f.debug_tuple("Expr").field(e).finish(),
            SqlSource::Thunk(_) => f.write_str("Thunk(..)"),
        }
    }
}

impl From<&str> for SqlSource {
    fn from(column: &str) -> Self {
        SqlSource::Column(column.into())
    }
}

impl From<String> for SqlSource {
    fn from(column: String) -> Self {
        SqlSource::Column(column)
    }
}

impl From<Expr> for SqlSource {
    fn from(expr: Expr) -> Self {
        SqlSource::Expr(expr)
    }
}

/// A join inside a cube's own base query.
#[derive(Debug, Clone)]
pub struct BaseJoin {
    pub table: TableRef,
    pub on: Expr,
    pub join_type: JoinType,
}

/// The SQL block a cube's data comes from. `where_clause` must encode the
/// security predicate; omitting it is a data-leak bug the compiler cannot
/// detect syntactically.
#[derive(Debug, Clone)]
pub struct BaseQuery {
    pub from: TableRef,
    pub joins: Vec<BaseJoin>,
    pub where_clause: Option<Expr>,
}

impl BaseQuery {
    pub fn from_table(table: TableRef) -> Self {
        Self {
            from: table,
            joins: vec![],
            where_clause: None,
        }
    }

    pub fn join(mut self, join_type: JoinType, table: TableRef, on: Expr) -> Self {
        self.joins.push(BaseJoin {
            table,
            on,
            join_type,
        });
        self
    }

    pub fn filter(mut self, condition: Expr) -> Self {
        use crate::sql::expr::ExprExt;
        self.where_clause = Some(match self.where_clause {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }
}

type BaseQueryFn = Arc<dyn Fn(&QueryContext) -> CompilerResult<BaseQuery> + Send + Sync>;

/// A cube: a named logical dataset.
#[derive(Clone)]
pub struct Cube {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    base_query: BaseQueryFn,
    pub dimensions: HashMap<String, Dimension>,
    pub measures: HashMap<String, Measure>,
    /// Joins keyed by target cube name. Targets resolve lazily through
    /// the registry, so mutual references between cubes are legal.
    pub joins: HashMap<String, CubeJoin>,
}

impl Cube {
    pub fn builder(name: &str) -> CubeBuilder {
        CubeBuilder::new(name)
    }

    /// Evaluate the base query against a context. Closure failures are
    /// surfaced as security-context errors: the context is the only input.
    pub fn base_query(&self, ctx: &QueryContext) -> CompilerResult<BaseQuery> {
        (self.base_query)(ctx).map_err(|err| match err {
            CompilerError::SecurityContext(msg) => {
                CompilerError::SecurityContext(format!("cube '{}': {}", self.name, msg))
            }
            other => other,
        })
    }

    /// The table alias this cube's columns are qualified with.
    pub fn alias(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.get(name)
    }

    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.get(name)
    }
}

impl fmt::Debug for Cube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cube")
            .field("name", &self.name)
            .field("dimensions", &self.dimensions.keys().collect::<Vec<_>>())
            .field("measures", &self.measures.keys().collect::<Vec<_>>())
            .field("joins", &self.joins.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for cube definitions.
#[must_use = "builders have no effect until build() is called"]
pub struct CubeBuilder {
    name: String,
    title: Option<String>,
    description: Option<String>,
    base_query: Option<BaseQueryFn>,
    dimensions: HashMap<String, Dimension>,
    measures: HashMap<String, Measure>,
    joins: HashMap<String, CubeJoin>,
}

impl CubeBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            base_query: None,
            dimensions: HashMap::new(),
            measures: HashMap::new(),
            joins: HashMap::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The cube's base query. The returned `where_clause` must reference
    /// the security context.
    pub fn base_query(
        mut self,
        f: impl Fn(&QueryContext) -> CompilerResult<BaseQuery> + Send + Sync + 'static,
    ) -> Self {
        self.base_query = Some(Arc::new(f));
        self
    }

    pub fn dimension(mut self, name: &str, dimension: Dimension) -> Self {
        self.dimensions.insert(name.into(), dimension);
        self
    }

    pub fn measure(mut self, name: &str, measure: Measure) -> Self {
        self.measures.insert(name.into(), measure);
        self
    }

    pub fn join(mut self, target_cube: &str, join: CubeJoin) -> Self {
        self.joins.insert(target_cube.into(), join);
        self
    }

    /// Finalize the cube.
    ///
    /// # Panics
    ///
    /// Panics if no base query was set; a cube without one cannot produce
    /// SQL and this is a definition error caught at startup.
    pub fn build(self) -> Cube {
        let base_query = self
            .base_query
            .unwrap_or_else(|| panic!("cube '{}' has no base query", self.name));
        Cube {
            name: self.name,
            title: self.title,
            description: self.description,
            base_query,
            dimensions: self.dimensions,
            measures: self.measures,
            joins: self.joins,
        }
    }
}

/// Convenience wrapper mirroring the `defineCube` style of cube creation.
pub fn define_cube(name: &str, f: impl FnOnce(CubeBuilder) -> CubeBuilder) -> Cube {
    f(Cube::builder(name)).build()
}

/// A count measure defaults to `COUNT(*)`.
pub(crate) fn count_star_source() -> SqlSource {
    SqlSource::Expr(star())
}
