use clap::Parser;
use log::{error, info};
use server::bus::{self, Bus};
use server::config::GameConfig;
use server::content::{BuiltinMapSource, JsonMapSource, MapSource, Registry};
use server::network::{Server, ServerSettings};
use server::room::RoomContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,

    /// Room tick length in milliseconds
    #[clap(short, long, default_value = "50")]
    tick_ms: u64,

    /// Maximum number of concurrent sessions
    #[clap(short, long, default_value = "128")]
    max_clients: usize,

    /// Directory of `<map>.json` files and an optional `registry.json`
    #[clap(long)]
    content_dir: Option<PathBuf>,

    /// JSON file overriding game rule defaults
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Privileged credential for admin kicks (falls back to ADMIN_TOKEN)
    #[clap(long)]
    admin_token: Option<String>,

    /// Map used when a client does not ask for one
    #[clap(long, default_value = "meadow")]
    default_map: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GameConfig::load(path)?,
        None => GameConfig::default(),
    };
    config.tick_ms = args.tick_ms;

    let mut registry = Registry::builtin();
    let maps: Arc<dyn MapSource> = match &args.content_dir {
        Some(dir) => {
            let registry_path = dir.join("registry.json");
            if registry_path.exists() {
                registry = Registry::load(&registry_path)?;
            }
            info!("Loading maps from {}", dir.display());
            Arc::new(JsonMapSource::new(dir.clone()))
        }
        None => Arc::new(BuiltinMapSource),
    };

    let admin_token = args
        .admin_token
        .or_else(|| std::env::var("ADMIN_TOKEN").ok())
        .filter(|token| !token.is_empty());
    if admin_token.is_some() {
        info!("Admin token configured");
    }

    let bus = Arc::new(Bus::new(config.max_party_size, config.party_name_max_len));
    let settings = ServerSettings {
        max_clients: args.max_clients,
        default_map: args.default_map,
        heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
    };
    let leaderboard_every = Duration::from_millis(config.leaderboard_interval_ms.max(1));
    let leaderboard_size = config.leaderboard_size;
    let context = RoomContext {
        bus: Arc::clone(&bus),
        maps,
        registry: Arc::new(registry),
        config: Arc::new(config),
        admin_token,
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, settings, context).await?;

    let leaderboard_handle = tokio::spawn(bus::run_leaderboard(
        Arc::clone(&bus),
        leaderboard_every,
        leaderboard_size,
    ));

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    server.shutdown();
    leaderboard_handle.abort();
    Ok(())
}
