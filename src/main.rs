use stockdesk_backend::{app_router, build_state, session_layer, session_store, Config};
use tower_sessions::ExpiredDeletion;
use tracing::Level;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set the log level based on the first argument
    let args: Vec<String> = std::env::args().collect();
    let mut log_level = Level::INFO;
    if args.len() >= 2 {
        log_level = match args[1].as_str() {
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .with_max_level(log_level)
        .init();

    tracing::info!("Log level set to: {}", log_level);

    let config = Config::from_env()?;

    // Initialize our session store as a SQLite database
    let store = session_store(&config.session_db_path).await?;

    // Start a task to delete expired sessions every 5 seconds
    let deletion_task = tokio::task::spawn(
        store
            .clone()
            .continuously_delete_expired(tokio::time::Duration::from_secs(5)),
    );

    let listen_addr = config.listen_addr;
    let state = build_state(config)?;

    // Expired portfolio entries are also dropped lazily on read
    tokio::task::spawn(
        state
            .cache
            .clone()
            .continuously_purge_expired(tokio::time::Duration::from_secs(60)),
    );

    let app = app_router(state, session_layer(store));

    // Run server
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tracing::info!("Listening on: {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    deletion_task.await??;

    Ok(())
}
