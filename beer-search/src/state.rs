use std::sync::Arc;

use search_index::Index;

use crate::routes::StaticFiles;

#[derive(Clone)]
pub struct State {
    pub log_search: bool,
    pub index: Index,
    pub static_files: Arc<StaticFiles>,
}

impl State {
    pub fn new(index: Index, static_files: StaticFiles, log_search: bool) -> Self {
        Self {
            log_search,
            index,
            static_files: Arc::new(static_files),
        }
    }
}
