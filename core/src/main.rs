//! Headless engine entry point. Boots an [`myt_x_core::App`], logs its
//! Transport port, and runs until SIGINT/SIGTERM (spec §9 "Global mutable
//! state": constructed once, no GUI shell in this binary).

use std::time::Duration;

use myt_x_core::App;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = match App::bootstrap().await {
        Ok(app) => app,
        Err(err) => {
            log::error!("failed to start: {err}");
            std::process::exit(1);
        }
    };

    log::info!("myt-x engine running");

    tokio::spawn({
        let app = app.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                app.tick_input_buffer().await;
            }
        }
    });

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received");
    app.shutdown().await;
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
