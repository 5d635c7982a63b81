use compute_service::{server, Config, Error, PprofBackend, Profiler, State};
use dotenv::dotenv;
use log::{debug, error, info, trace};
use std::env;
use std::future;
use std::process;

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::formatted_builder()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();
    info!("Compute Microservice - v{}", env!("CARGO_PKG_VERSION"));
    if let Err(err) = run().await {
        error!("{}", err);
        process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    trace!("Starting...");
    let config = Config::from_args()?;
    debug!("Trying to bind server to address: {}", config.address);
    let profiler = Profiler::new(PprofBackend::new(config.frequency));
    let (addr, server) = server::bind(&config.address, State::new(profiler), shutdown_signal())?;
    info!("Listening on {}", addr);
    server.await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Can't listen for ctrl-c: {}", err);
        future::pending::<()>().await;
    }
    info!("Shutting down");
}
