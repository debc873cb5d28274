pub mod bigquery;
pub mod executor;
pub mod params;
pub mod render;

pub use bigquery::BigQueryExecutor;
pub use executor::{QueryError, QueryExecutor, QueryResult, Row};
pub use params::{ConnectionContext, ModelParameters, ParameterResolver, ParameterSet};
pub use render::{render, QueryParameter, RenderError, RenderedQuery};
