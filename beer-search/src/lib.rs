#[macro_use]
extern crate tracing;

pub mod config;
pub mod error;
pub mod helpers;
pub mod indexer;
pub mod profiling;
mod responders;
pub mod routes;
pub mod server;
pub mod state;

pub use config::Settings;
pub use error::ServerError;
pub use indexer::{index_directory, IndexingStats};
pub use routes::StaticFiles;
pub use state::State;
