use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Error, Result};
use hyper::Server;
use routerify::RouterService;
use search_index::{Index, IndexMapping, IndexSettings, OpenError};
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::indexer;
use crate::profiling::Profiles;
use crate::routes::{self, StaticFiles};
use crate::state::State;

/// Binds the HTTP server to `addr`.
///
/// Returns the address actually bound along with the future serving
/// requests until `shutdown` resolves.
pub fn bind<F>(
    state: State,
    addr: &SocketAddr,
    shutdown: F,
) -> Result<(SocketAddr, impl Future<Output = Result<()>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = routes::get_router(state)?;
    let service = RouterService::new(router)
        .map_err(|e| Error::msg(format!("failed to create router service: {}", e)))?;

    let server = Server::try_bind(addr)
        .with_context(|| format!("failed to bind to {}", addr))?
        .serve(service);
    let bound = server.local_addr();

    let serving = async move {
        server.with_graceful_shutdown(shutdown).await?;
        Ok(())
    };

    Ok((bound, serving))
}

pub async fn start(settings: Settings) -> Result<()> {
    let addr = settings.socket_addr()?;
    let static_files = StaticFiles::new(&settings.static_dir, settings.static_etag.as_deref())?;

    let profiles = Arc::new(Profiles::start(
        settings.cpu_profile.clone(),
        settings.mem_profile.clone(),
    ));

    let (index, loader) = open_index(&settings, profiles.clone()).await?;
    let state = State::new(index.clone(), static_files, !settings.silent_search);

    let (bound, server) = bind(state, &addr, shutdown_signal())?;
    info!("Listening on {}", bound);
    if let Err(e) = server.await {
        error!("server error: {:?}", e);
    }

    info!("shutting down index...");
    if let Some(loader) = loader {
        loader.abort();
    }
    tokio::task::spawn_blocking(move || profiles.finish()).await?;
    index.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {:?}", e);
    }
}

/// Opens the index, creating and loading it if it does not exist yet.
async fn open_index(
    settings: &Settings,
    profiles: Arc<Profiles>,
) -> Result<(Index, Option<JoinHandle<()>>)> {
    match Index::open(&settings.index, IndexSettings::default()).await {
        Ok(index) => {
            info!("Opening existing index...");
            return Ok((index, None));
        },
        Err(OpenError::PathDoesNotExist(_)) => {},
        Err(e) => return Err(e.into()),
    }

    info!("Creating new index...");
    let mapping = load_mapping(settings.mapping.as_deref()).await?;
    let index = Index::create(&settings.index, mapping, IndexSettings::default()).await?;

    let loader = tokio::spawn(load_documents(
        index.clone(),
        settings.json_dir.clone(),
        settings.batch_size,
        profiles,
    ));

    Ok((index, Some(loader)))
}

async fn load_mapping(path: Option<&Path>) -> Result<IndexMapping> {
    let path = match path {
        None => return Ok(IndexMapping::beer()),
        Some(path) => path,
    };

    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read mapping file {}", path.display()))?;

    IndexMapping::from_json(&data)
        .with_context(|| format!("invalid mapping file {}", path.display()))
}

async fn load_documents(
    index: Index,
    dir: PathBuf,
    batch_size: usize,
    profiles: Arc<Profiles>,
) {
    if let Err(e) = indexer::index_directory(&index, &dir, batch_size).await {
        error!("failed to load documents from {}: {:?}", dir.display(), e);
    }

    if let Err(e) = tokio::task::spawn_blocking(move || profiles.finish()).await {
        error!("failed to finish profiles: {:?}", e);
    }
}
