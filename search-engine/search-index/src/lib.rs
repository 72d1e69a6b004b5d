#[macro_use]
extern crate tracing;

use std::sync::Arc;

use aexecutor::SearcherExecutorPool;

pub mod analyzers;
mod batch;
mod document;
mod helpers;
mod index;
pub mod mapping;
pub mod query;
mod reader;
pub mod structures;
mod writer;

pub use batch::Batch;
pub use document::{DebugDocument, StoredDocument};
pub use index::{Index, OpenError};
pub use mapping::{DocumentMapping, FieldKind, FieldMapping, IndexMapping};
pub use query::{QueryBuildError, QueryKind};
pub use reader::{
    DocumentMatch,
    FacetRequest,
    FacetResult,
    HighlightRequest,
    NumericRangeRequest,
    SearchRequest,
    SearchResult,
    Sort,
    MAX_SIZE,
};
pub use structures::IndexSettings;

pub(crate) type ReaderExecutor = Arc<SearcherExecutorPool>;
