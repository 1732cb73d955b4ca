mod aircraftdb;
mod app;
mod cli;
mod net;
mod output;
mod scheduler;

use app::App;
use clap::Parser;
use cli::Options;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use track1090::clock::now_in_ms;
use track1090::state;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = Options::parse();
    let app = App::new(&options);
    info!(
        "hub1090 {} starting, receiver uuid {}",
        env!("CARGO_PKG_VERSION"),
        app.options.uuid
    );

    // warm restart before any traffic arrives
    if let Some(state_dir) = app.state_path() {
        match state::load_all(&state_dir, &app.registry, now_in_ms()) {
            Ok(0) => {}
            Ok(n) => info!("warm restart with {n} aircraft"),
            Err(e) => warn!("state restore: {e}"),
        }
    }

    // listener failures at startup are fatal
    net::run_listeners(&app).await?;

    for connector in app.options.connectors.clone() {
        tokio::spawn(net::run_connector(app.clone(), connector));
    }

    scheduler::spawn_all(&app);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = app.shutdown.send(true);

    // best-effort state dump so the next start is warm
    if let Some(state_dir) = app.state_path() {
        let app = app.clone();
        tokio::task::spawn_blocking(move || {
            state::save_all(&state_dir, &app.registry);
        })
        .await?;
    }
    Ok(())
}
