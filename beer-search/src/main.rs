#[macro_use]
extern crate tracing;

use anyhow::Result;
use beer_search::Settings;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() {
    let settings = match setup() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error during server config parsing: {:?}", e);
            return;
        },
    };

    let _guard = setup_logger(
        settings.log_level,
        &settings.log_dir,
        !settings.disable_pretty_logs,
    );

    let threads = settings.runtime_threads.unwrap_or_else(num_cpus::get);
    info!("starting runtime with {} threads", threads);
    let maybe_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build();

    let result = match maybe_runtime {
        Ok(runtime) => runtime.block_on(beer_search::server::start(settings)),
        Err(e) => {
            error!("error during runtime creation: {:?}", e);
            return;
        },
    };

    if let Err(e) = result {
        error!("error during server runtime: {:?}", e);
    }
}

fn setup_logger(
    level: Level,
    log_dir: &Option<String>,
    pretty: bool,
) -> Option<WorkerGuard> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", format!("{},tantivy=info", level));
    }

    if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::hourly(dir, "beer_search_.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let fmt = tracing_subscriber::fmt()
            .with_target(true)
            .with_writer(std::io::stdout.and(non_blocking))
            .with_env_filter(EnvFilter::from_default_env())
            .with_thread_names(true)
            .with_thread_ids(true);

        if pretty {
            fmt.pretty().with_ansi(true).init();
        } else {
            fmt.json().with_ansi(false).init();
        }

        Some(guard)
    } else {
        let fmt = tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(true)
            .with_env_filter(EnvFilter::from_default_env());

        if pretty {
            fmt.pretty().with_ansi(true).init();
        } else {
            fmt.compact().with_ansi(false).init();
        }

        None
    }
}

/// Parses and validates the command line flags.
fn setup() -> Result<Settings> {
    let config: Settings = Settings::parse();
    config.validate()?;
    Ok(config)
}
