//! sqlbox - sandboxed execution server for untrusted MySQL queries.

use std::sync::Arc;

use sqlbox::api::{self, AppState, RateLimiter};
use sqlbox::cli::Cli;
use sqlbox::config::Config;
use sqlbox::db::{self, DatabaseClient, MockDatabaseClient};
use sqlbox::error::Result;
use sqlbox::logging;
use sqlbox::query::QueryExecutor;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", e.category(), e);
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.logging.level, config.logging.format);

    if let Err(e) = run(&cli, config).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

/// Loads the config file and applies command-line overrides.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_from_file(&cli.config_path())?;
    cli.apply_to(&mut config)?;
    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli, config: Config) -> Result<()> {
    info!("Config file: {}", cli.config_path().display());

    let db: Arc<dyn DatabaseClient> = if cli.mock_db {
        warn!("Using in-memory mock database");
        Arc::new(MockDatabaseClient::new())
    } else {
        info!("Connecting to MySQL at {}", config.mysql.display_string());
        db::connect(&config.mysql).await?
    };

    let executor = QueryExecutor::with_blocklist(Arc::clone(&db), config.executor.clone());
    let limiter = RateLimiter::from_config(&config.security);
    let state = AppState::new(executor, limiter);

    let served = api::serve(state, &config.server).await;

    info!("Closing database connections");
    if let Err(e) = db.close().await {
        warn!("Error closing database: {e}");
    }

    served
}
