use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use feedwatch::{
    Config, Console, ConsoleDelivery, Database, FeedFetcher, FeedMonitor, FeedService,
    MemoryStore, MonitorSettings, Scheduler, SqliteStore, SubscriptionStore,
};

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Load configuration
    let config = match Config::load_with_env(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {path}: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = feedwatch::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        feedwatch::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = run(config).await {
        error!("feedwatch stopped with error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> feedwatch::Result<()> {
    config.validate()?;
    info!("feedwatch - feed monitor");

    let (database, store): (Option<Database>, Arc<dyn SubscriptionStore>) =
        match config.database.backend.as_str() {
            "memory" => {
                info!("Using in-memory storage; subscriptions will not survive a restart");
                (None, Arc::new(MemoryStore::new()))
            }
            _ => {
                let db = Database::open(&config.database.path).await?;
                info!("Database opened at {}", config.database.path);
                let store = Arc::new(SqliteStore::new(db.pool().clone()));
                (Some(db), store)
            }
        };

    let fetcher = Arc::new(FeedFetcher::new(&config.monitor)?);
    let monitor = Arc::new(FeedMonitor::new(
        fetcher,
        store,
        Arc::new(ConsoleDelivery),
        MonitorSettings::from_config(&config),
    ));
    let service = FeedService::new(Arc::clone(&monitor));

    service.restore().await?;

    let scheduler = Scheduler::new(Arc::clone(&monitor), config.monitor.poll_interval())
        .spawn()
        .await?;

    let console = Console::new(service, config.delivery.subscriber_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type 'help' for commands.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if let Some(reply) = console.handle_line(&line).await {
                        println!("{reply}");
                    }
                }
                None => break,
            },
        }
    }

    scheduler.stop().await?;
    if let Some(db) = database {
        db.close().await;
    }
    info!("feedwatch stopped");
    Ok(())
}
