pub mod config;
pub mod context;
pub mod error;
pub mod hooks;

pub use config::{AppConfig, EngineConfig, ErrorMode};
pub use context::{Context, ContextMap};
pub use error::{ParaselError, Result};
