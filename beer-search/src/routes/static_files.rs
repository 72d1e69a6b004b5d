use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use headers::{ETag, HeaderMapExt, IfNoneMatch};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Response, StatusCode};

use crate::helpers::{get_state, BeerRequest, BeerResponse};
use crate::responders::json_response;

const INDEX_FILE: &str = "index.html";

/// Serves files from a single directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    etag: Option<ETag>,
}

impl StaticFiles {
    /// Serves `root`, tagging every response with `etag` when given.
    pub fn new(root: impl Into<PathBuf>, etag: Option<&str>) -> Result<Self> {
        let etag = match etag {
            Some(tag) => {
                let tag = tag.trim_matches('"');
                let parsed = format!("\"{}\"", tag)
                    .parse::<ETag>()
                    .map_err(|_| anyhow::Error::msg(format!("invalid static etag {:?}", tag)))?;
                Some(parsed)
            },
            None => None,
        };

        Ok(Self {
            root: root.into(),
            etag,
        })
    }

    /// Maps a request path onto the served directory.
    ///
    /// Returns `None` for anything but plain path segments.
    pub fn resolve(&self, uri_path: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for component in Path::new(uri_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {},
                _ => return None,
            }
        }

        Some(path)
    }

    async fn read(&self, uri_path: &str) -> Result<Option<(PathBuf, Vec<u8>)>> {
        let mut target = match self.resolve(uri_path) {
            None => return Ok(None),
            Some(target) => target,
        };

        if tokio::fs::metadata(&target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            target.push(INDEX_FILE);
        }

        match tokio::fs::read(&target).await {
            Ok(data) => return Ok(Some((target, data))),
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", target.display()))
            },
        }

        if !is_client_route(uri_path) {
            return Ok(None);
        }

        let fallback = self.root.join(INDEX_FILE);
        match tokio::fs::read(&fallback).await {
            Ok(data) => Ok(Some((fallback, data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", fallback.display())),
        }
    }
}

/// A path whose last segment has no extension, e.g. `/beers/1`.
fn is_client_route(uri_path: &str) -> bool {
    let last = uri_path.rsplit('/').next().unwrap_or_default();
    !last.contains('.')
}

/// The content type served for a file with the given path.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

pub async fn serve(req: BeerRequest) -> BeerResponse {
    let state = get_state(&req)?;
    let files = &state.static_files;

    let (path, data) = match files.read(req.uri().path()).await? {
        Some(found) => found,
        None => return json_response(404, "file not found"),
    };

    if let Some(etag) = files.etag.as_ref() {
        if let Some(condition) = req.headers().typed_get::<IfNoneMatch>() {
            if !condition.precondition_passes(etag) {
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = StatusCode::NOT_MODIFIED;
                resp.headers_mut().typed_insert(etag.clone());
                return Ok(resp);
            }
        }
    }

    let mut resp = Response::new(Body::from(data));
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
    if let Some(etag) = files.etag.as_ref() {
        resp.headers_mut().typed_insert(etag.clone());
    }

    Ok(resp)
}
