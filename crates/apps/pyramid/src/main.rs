mod config;
mod error;
mod postgis;
mod report;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use runtime::{TileDispatcher, TileLayout, run_pyramid};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};
use crate::error::CliError;
use crate::postgis::PostGisSource;
use crate::report::{EXIT_CANCELLED, RunReport, write_json, write_tileset};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match Args::parse().into_config() {
        Ok(config) => run(&config).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err}");
            eprintln!("pyramid: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(config: &Config) -> Result<u8, CliError> {
    let source = PostGisSource::connect(&config.dsn, &config.pool, config.layer_name.as_str())
        .await
        .map_err(|e| CliError::Connection(e.to_string()))?;

    let layout = TileLayout::new(config.out.clone(), config.extension.clone());
    let dispatcher = TileDispatcher::new(Arc::new(source), layout, config.dispatch.clone());

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_interrupts(
        tokio::signal::ctrl_c,
        cancel.clone(),
        || std::process::exit(i32::from(EXIT_CANCELLED)),
    ));

    info!(
        table = %config.layer.table_name,
        out = %config.out.display(),
        concurrency = config.dispatch.concurrency,
        "generating z{}..z{}",
        config.zoom_start,
        config.zoom_end
    );
    let outcome = run_pyramid(&dispatcher, &config.request(), &cancel).await;
    watcher.abort();
    let run = outcome?;

    let report = RunReport::new(config, &run);
    println!("{}", report.render());
    if let Some(path) = &config.report {
        write_json(path, &report)?;
        info!(path = %path.display(), "wrote run report");
    }
    let tileset = write_tileset(config, run.data_extent)?;
    info!(path = %tileset.display(), "wrote tileset metadata");

    Ok(report.exit_code())
}

/// The first interrupt cancels the run; a second one calls `force_exit`.
async fn watch_interrupts<F, Fut>(
    mut next_interrupt: F,
    cancel: CancellationToken,
    force_exit: impl FnOnce(),
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    loop {
        if let Err(err) = next_interrupt().await {
            warn!("cannot listen for interrupt: {err}");
            return;
        }
        if cancel.is_cancelled() {
            warn!("second interrupt received, exiting without draining");
            force_exit();
            return;
        }
        warn!("interrupt received, stopping admission of new tiles");
        cancel.cancel();
    }
}
