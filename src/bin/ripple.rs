use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use ripple::cache::{format_memory_size, StorageType, TieredCache};
use ripple::realtime::{ConnectionManager, RealTimeEvent, SendOptions, SendOutcome};
use ripple::{Ripple, RippleConfig};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ripple", about = "Ripple cache and real-time client", version)]
struct Args {
  #[arg(short, long)]
  config: Option<String>,
  /// WebSocket endpoint (overrides config)
  #[arg(long, env = "RIPPLE_URL")]
  url: Option<String>,
  #[arg(long, env = "RIPPLE_USER_ID")]
  user_id: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Connect and print every inbound event
  Listen {
    /// Rooms to join after connecting
    #[arg(short, long)]
    room: Vec<String>,
  },
  /// Send one event and exit
  Send {
    /// Event type, e.g. `chat`
    event_type: String,
    /// JSON payload
    #[arg(default_value = "null")]
    data: String,
    #[arg(long)]
    room: Option<String>,
    #[arg(long)]
    to: Option<String>,
    #[arg(long, default_value = "normal")]
    priority: String,
  },
  /// Print statistics of the configured persistent cache
  CacheStats {
    /// Storage backend (overrides config)
    #[arg(long)]
    storage: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    RippleConfig::from_file(path)?
  } else {
    RippleConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(url) = args.url {
    config.realtime.url = url;
  }
  if let Some(level) = args.log_level {
    config.logging.level = level.parse().map_err(anyhow::Error::msg)?;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.as_str().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  match args.command {
    Commands::Listen { room } => run_listen(config, args.user_id.as_deref(), &room).await,
    Commands::Send {
      event_type,
      data,
      room,
      to,
      priority,
    } => {
      let data: serde_json::Value = serde_json::from_str(&data)?;
      let mut options =
        SendOptions::new().priority(priority.parse().map_err(anyhow::Error::msg)?);
      if let Some(room) = room {
        options = options.room(room);
      }
      if let Some(to) = to {
        options = options.to_user(to);
      }
      run_send(config, args.user_id.as_deref(), &event_type, data, options).await
    }
    Commands::CacheStats { storage } => {
      if let Some(storage) = storage {
        config.cache.storage_type = storage
          .parse::<StorageType>()
          .map_err(anyhow::Error::msg)?;
      }
      run_cache_stats(config).await
    }
  }
}

async fn run_listen(
  config: RippleConfig,
  user_id: Option<&str>,
  rooms: &[String],
) -> Result<(), anyhow::Error> {
  let app = Ripple::from_config(&config).await;
  app.bus().on_any(print_event);

  app.client.connect(user_id).await?;
  for room in rooms {
    app.client.join_room(room).await;
  }

  tokio::signal::ctrl_c().await?;
  tracing::info!("Received SIGINT");
  app.client.disconnect().await;
  Ok(())
}

async fn run_send(
  config: RippleConfig,
  user_id: Option<&str>,
  event_type: &str,
  data: serde_json::Value,
  options: SendOptions,
) -> Result<(), anyhow::Error> {
  let client = ConnectionManager::websocket(config.realtime);
  client.connect(user_id).await?;

  let outcome = client.send(event_type, data, options).await;
  client.disconnect().await;

  match outcome {
    SendOutcome::Sent => {
      println!("{} {}", "sent".green(), event_type);
      Ok(())
    }
    other => Err(anyhow::anyhow!("'{}' not sent: {:?}", event_type, other)),
  }
}

async fn run_cache_stats(config: RippleConfig) -> Result<(), anyhow::Error> {
  let cache = TieredCache::from_config(config.cache.clone()).await;
  let stats = cache.get_stats();

  let mut table = Table::new();
  table.load_preset(UTF8_FULL);
  table.set_header(vec!["Metric", "Value"]);
  table.add_row(vec!["storage".to_string(), config.cache.storage_type.to_string()]);
  table.add_row(vec![
    "backend".to_string(),
    cache
      .backend()
      .map(|b| b.kind().to_string())
      .unwrap_or_else(|| "none".to_string()),
  ]);
  if let Some(backend) = cache.backend() {
    let persisted = backend.count().await?;
    table.add_row(vec!["persisted".to_string(), persisted.to_string()]);
  }
  table.add_row(vec!["size".to_string(), stats.size.to_string()]);
  table.add_row(vec!["max size".to_string(), stats.max_size.to_string()]);
  table.add_row(vec![
    "default ttl".to_string(),
    format!("{:?}", Duration::from_millis(config.cache.default_ttl_ms)),
  ]);
  table.add_row(vec![
    "memory".to_string(),
    format_memory_size(stats.memory_usage),
  ]);
  table.add_row(vec![
    "hit rate".to_string(),
    format!("{:.1}%", stats.hit_rate() * 100.0),
  ]);
  table.add_row(vec![
    "oldest key".to_string(),
    stats.oldest_key.unwrap_or_else(|| "-".to_string()),
  ]);

  println!("{table}");
  Ok(())
}

fn print_event(event: &RealTimeEvent) {
  let kind = if event.event_type.starts_with("connection:") {
    event.event_type.yellow()
  } else {
    event.event_type.cyan()
  };
  let room = event
    .room_id
    .as_deref()
    .map(|r| format!(" [{}]", r).dimmed().to_string())
    .unwrap_or_default();
  println!("{}{} {}", kind.bold(), room, event.data);
}
