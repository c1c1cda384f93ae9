//! Backend adapters, tool dispatch and the enrichment pipeline behind the
//! lumen chat shell.

pub mod backends;
pub mod config;
pub mod pipeline;
pub mod search;
pub mod tools;

mod http;
mod json_extract;

pub use backends::{
    BackendError, BackendErrorKind, ImageBackend, ImageOptions, ImageRequest, ImageResponse,
    SearchBackend, TextBackend, Turn,
};
pub use config::EngineConfig;
pub use pipeline::{Backends, CancelHandle, Orchestrator, PipelineOutcome, Route};
pub use tools::ToolDispatcher;
