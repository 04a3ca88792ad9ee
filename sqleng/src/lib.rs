pub mod engine;
pub mod macros;

pub use engine::{
    register_sql_engine, QueryFormat, SqlConnection, SqlEngineError, SqlQueryEngine,
    SqlQueryPayload,
};
pub use macros::{Dialect, Fill, FillMode, Interpolated, MacroEngine, MacroError};
