use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use fluxbase::auth::{NullValidator, StaticTokenValidator, TokenValidator};
use fluxbase::cli as prog_cli;
use fluxbase::config::ServerConfig;
use fluxbase::realtime::{ConnectionHub, MessageSink, SubscriptionRegistry};
use fluxbase::service::Backend;
use fluxbase::store::SqliteStore;
use fluxbase::{errors, logger};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;

#[derive(Parser, Debug)]
#[command(name = "fluxbase", version, about = "Fluxbase backend server CLI", long_about = None)]
struct Cli {
    /// Path to a config file (TOML)
    #[arg(long, help = "Path to a config file (TOML). If omitted, FLUXBASE_CONFIG then ./fluxbase.toml are tried.")]
    config: Option<PathBuf>,
    /// Override DB path (takes precedence over config)
    #[arg(long, help = "Override database path (e.g., fluxbase.db). Takes precedence over config/env.")]
    db: Option<PathBuf>,
    /// Override listen address (takes precedence over config)
    #[arg(long, help = "Override listen address for serve (e.g., 127.0.0.1:7171).")]
    bind: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the WebSocket server until interrupted")]
    Serve,
    #[command(name = "init-db", about = "Create the database file and bootstrap its schema")]
    InitDb,
    #[command(name = "create-collection", about = "Create a collection in the current database")]
    ColCreate {
        #[arg(help = "Collection name to create")]
        name: String,
        #[arg(long, help = "Optional JSON schema document stored with the collection")]
        schema: Option<String>,
    },
    #[command(name = "delete-collection", about = "Delete a collection and all of its documents")]
    ColDelete {
        #[arg(help = "Collection name to delete")]
        name: String,
    },
    #[command(name = "list-collections", about = "List all collections in the current database")]
    ColList,
    #[command(about = "Execute one request envelope and print the result; find results stream as NDJSON")]
    Query {
        #[arg(help = "Request JSON (e.g., {\"action\":\"find\",\"collection\":\"users\",\"query\":{\"where\":{\"age\":{\"$gte\":21}}}})")]
        request: String,
    },
}

fn resolve_config(cli: &Cli) -> ServerConfig {
    // Precedence: CLI > env > config file > defaults
    let mut cfg = ServerConfig::load(cli.config.as_deref());
    if let Some(db) = &cli.db {
        cfg.db_path = db.clone();
    }
    if let Some(bind) = &cli.bind {
        cfg.bind_addr = bind.clone();
    }
    cfg
}

fn build_backend(cfg: &ServerConfig) -> errors::Result<(Arc<ConnectionHub>, Backend)> {
    let store = Arc::new(SqliteStore::open(&cfg.db_path, &cfg.store_options())?);
    let registry = Arc::new(SubscriptionRegistry::new());
    let validator: Arc<dyn TokenValidator> = if cfg.auth_tokens.is_empty() {
        Arc::new(NullValidator)
    } else {
        Arc::new(StaticTokenValidator::new(cfg.auth_tokens.clone()))
    };
    let hub = Arc::new(ConnectionHub::new(Arc::clone(&registry), validator, cfg.hub_options()));
    let backend = Backend::new(store, registry, Arc::clone(&hub) as Arc<dyn MessageSink>)
        .with_hub(Arc::clone(&hub));
    Ok((hub, backend))
}

async fn report_statistics(backend: Arc<Backend>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; swallow it so startup stays quiet.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let stats = backend.statistics();
        log::info!(
            "status: connections={} subscriptions={}",
            stats.connections,
            stats.subscriptions
        );
    }
}

async fn serve(
    cfg: &ServerConfig,
    hub: Arc<ConnectionHub>,
    backend: Backend,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(&cfg.bind_addr).await?;
    log::info!("listening on ws://{} (db {})", cfg.bind_addr, cfg.db_path.display());
    let backend = Arc::new(backend);
    let reporter = tokio::spawn(report_statistics(Arc::clone(&backend)));
    tokio::select! {
        () = hub.serve(listener) => {}
        _ = tokio::signal::ctrl_c() => log::info!("shutdown signal received"),
    }
    reporter.abort();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli);
    logger::configure_logging(cfg.log_dir.as_deref(), Some(&cfg.log_level), Some(cfg.log_retention));

    let (hub, backend) = match build_backend(&cfg) {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    let r = match cli.command {
        Commands::Serve => serve(&cfg, hub, backend).await,
        Commands::InitDb => {
            prog_cli::run(&backend, prog_cli::Command::InitDb { db_path: cfg.db_path.clone() })
        }
        Commands::ColCreate { name, schema } => {
            prog_cli::run(&backend, prog_cli::Command::ColCreate { name, schema_json: schema })
        }
        Commands::ColDelete { name } => {
            prog_cli::run(&backend, prog_cli::Command::ColDelete { name })
        }
        Commands::ColList => prog_cli::run(&backend, prog_cli::Command::ColList),
        Commands::Query { request } => {
            prog_cli::run(&backend, prog_cli::Command::Query { request_json: request })
        }
    };
    if let Err(e) = r {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
