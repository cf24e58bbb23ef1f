use crate::app::App;
use crate::cli::Args;
use crate::config::Config;
use crate::logging::setup_logging;
use clap::Parser;
use figment::{Figment, providers::Env};
use std::process::ExitCode;
use tracing::info;

mod app;
mod blizzard;
mod cli;
mod config;
mod data;
mod jobs;
mod logging;
mod sync;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config: Config = match Figment::new().merge(Env::raw()).extract() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting arenameta"
    );

    let mut app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    app.start_workers();

    if args.once {
        app.run_once().await
    } else {
        app.start_scheduler();
        app.run().await
    }
}
