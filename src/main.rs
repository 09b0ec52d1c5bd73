use flutd::{Config, Server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        width = config.width,
        height = config.height,
        format = ?config.format,
        max_connections = config.max_connections,
        max_line = config.max_line,
        max_buffer = config.max_buffer,
        "Starting flutd server"
    );

    let server = Server::bind(&config)?;

    // Headless: a termination signal stands in for closing the window
    let handle = server.handle();
    if let Err(e) = ctrlc::set_handler(move || handle.window_closed()) {
        warn!(error = %e, "Failed to install signal handler");
    }

    server.run()?;
    Ok(())
}
