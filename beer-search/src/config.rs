use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::{Error, Result};
use clap::Parser;
use tracing::Level;

#[derive(Debug, Clone, Parser)]
#[clap(name = "beer-search", about, version)]
pub struct Settings {
    /// The amount of documents submitted to the index in a single batch.
    #[clap(long, default_value = "100", env)]
    pub batch_size: usize,

    /// The address to listen on, an empty host binds every interface.
    #[clap(long, default_value = ":8094", env)]
    pub addr: String,

    /// The directory of JSON documents loaded into a new index.
    #[clap(long, default_value = "data/", env)]
    pub json_dir: PathBuf,

    /// The path of the index, it is created if it does not exist.
    #[clap(long, default_value = "beer-search.index", env)]
    pub index: PathBuf,

    /// A static ETag value sent with every static file.
    #[clap(long, env)]
    pub static_etag: Option<String>,

    /// The directory of static content served outside of the API.
    #[clap(long = "static", default_value = "static/", env)]
    pub static_dir: PathBuf,

    /// Write a CPU usage profile to this file.
    #[clap(long, env)]
    pub cpu_profile: Option<PathBuf>,

    /// Write a memory profile to this file.
    #[clap(long, env)]
    pub mem_profile: Option<PathBuf>,

    /// A JSON mapping file used when creating the index.
    #[clap(long, env)]
    pub mapping: Option<PathBuf>,

    /// The log level filter, any logs that are above this level won't
    /// be displayed.
    #[clap(long, default_value = "info", env)]
    pub log_level: Level,

    /// An optional bool to disable ANSI colours and pretty formatting for logs.
    /// You probably want to disable this if using file-based logging.
    #[clap(long, env)]
    pub disable_pretty_logs: bool,

    /// An optional bool to disable the logging of each search.
    #[clap(long, env)]
    pub silent_search: bool,

    /// The number of threads to use for the tokio runtime.
    ///
    /// If this is not set, the number of logical cores on the machine is used.
    #[clap(long, short = 't', env)]
    pub runtime_threads: Option<usize>,

    /// A optional directory to send persistent logs.
    ///
    /// Logs are split into hourly chunks.
    #[clap(long, env)]
    pub log_dir: Option<String>,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::msg("batch size must be at least 1"));
        }

        if self.runtime_threads == Some(0) {
            return Err(Error::msg("runtime threads must be at least 1"));
        }

        Ok(())
    }

    /// The address the server binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        parse_addr(&self.addr)
    }
}

/// Parses a listen address where an empty host means every interface.
pub fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let addr = addr.trim();
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    if let Ok(parsed) = full.parse::<SocketAddr>() {
        return Ok(parsed);
    }

    full.to_socket_addrs()
        .map_err(|e| Error::msg(format!("invalid listen address {:?}: {}", addr, e)))?
        .next()
        .ok_or_else(|| Error::msg(format!("listen address {:?} did not resolve", addr)))
}
