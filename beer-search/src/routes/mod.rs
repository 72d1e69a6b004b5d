mod api;
mod default_handlers;
mod static_files;

use anyhow::Error;
use hyper::Body;
use routerify::Router;

pub use self::static_files::{content_type, StaticFiles};
use crate::error::ServerError;
use crate::state::State;

pub fn get_router(state: State) -> anyhow::Result<Router<Body, ServerError>> {
    Router::builder()
        .data(state)
        .post("/api/search", api::search)
        .any_method("/api/search", default_handlers::handle_405)
        .get("/api/fields", api::fields)
        .any_method("/api/fields", default_handlers::handle_405)
        .get("/api/debug/:docID", api::debug_document)
        .any_method("/api/debug/:docID", default_handlers::handle_405)
        .any_method("/api", default_handlers::handle_404)
        .any_method("/api/*", default_handlers::handle_404)
        .get("/*", static_files::serve)
        .err_handler(default_handlers::error_handler)
        .any(default_handlers::handle_404)
        .build()
        .map_err(|e| Error::msg(format!("failed to build router: {}", e)))
}
