mod cache;
mod classify;
mod config;
mod error;
mod fallback;
mod fetch;
mod http;
mod lifecycle;
mod notify;
mod pipeline;
mod strategy;
mod tasks;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cache::{CacheRegistry, MemoryStorage, NoopStorage, SqliteStorage};
use config::{Config, StorageBackend};
use fetch::{Fetcher, HttpFetcher, OfflineFetcher};
use http::ProxyRequest;
use worker::ProxyWorker;

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "An offline-capable request caching proxy")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Pretend the network is unreachable
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-fetch the static-asset manifest into the configured generation
  Install,
  /// Make the installed generation current and evict old stores
  Activate,
  /// Send one request through the proxy
  Fetch {
    /// Path or absolute URL
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a top-level document load
    #[arg(long)]
    navigate: bool,
    /// Request header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// List cache stores and their entry counts
  Stores,
  /// Render a push notification from a JSON payload
  Push { payload: Option<String> },
  /// Route a click on the notification rendered from a payload
  Click {
    #[arg(short, long)]
    action: Option<String>,
    #[arg(short, long)]
    payload: Option<String>,
  },
  /// Fire a background sync event
  Sync {
    #[arg(short, long, default_value = worker::BACKGROUND_SYNC_TAG)]
    tag: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging(&config)?;

  let registry = open_registry(&config)?;
  let fetcher: Arc<dyn Fetcher> = if args.offline {
    Arc::new(OfflineFetcher)
  } else {
    Arc::new(HttpFetcher::new(&config)?)
  };

  let worker = ProxyWorker::new(config, registry, fetcher, Arc::new(notify::LogSink))?;
  worker.restore().await?;

  run(&worker, args.command).await?;
  worker.settle().await;

  Ok(())
}

async fn run(worker: &ProxyWorker, command: Command) -> Result<()> {
  match command {
    Command::Install => {
      let (report, activation) = worker.install().await?;
      println!(
        "installed {} ({} assets)",
        report.generation.static_store(),
        report.assets
      );
      if let Some(activation) = activation {
        print_activation(&activation);
      }
    }
    Command::Activate => print_activation(&worker.activate().await?),
    Command::Fetch {
      url,
      method,
      navigate,
      headers,
      data,
    } => {
      let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let url = worker.config().resolve(&url)?;

      let mut request = if navigate {
        ProxyRequest::navigate(url)
      } else {
        ProxyRequest::get(url)
      };
      request.method = method;
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(data) = data {
        request = request.with_body(data);
      }

      let response = worker.fetch(request).await?;
      println!(
        "{} {} ({:?})",
        response.status, response.status_text, response.source
      );
      for (name, value) in &response.headers {
        println!("{}: {}", name, value);
      }
      println!();
      println!("{}", response.text());
    }
    Command::Stores => {
      let current = worker.current_generation().await;
      let waiting = worker.waiting_generation().await;
      println!("state: {:?}", worker.state().await);
      for name in worker.registry().list_stores()? {
        let entries = worker
          .registry()
          .lookup(&name)?
          .map(|store| store.len())
          .transpose()?
          .unwrap_or(0);
        let marker = match (&current, &waiting) {
          (Some(generation), _) if generation.owns(&name) => "*",
          (_, Some(generation)) if generation.owns(&name) => "+",
          _ => " ",
        };
        println!("{} {} ({} entries)", marker, name, entries);
      }
    }
    Command::Push { payload } => {
      let notification = worker.push(payload.as_deref().map(str::as_bytes)).await?;
      println!("{}", serde_json::to_string_pretty(&notification)?);
    }
    Command::Click { action, payload } => {
      let notification = notify::render(
        notify::parse_payload(payload.as_deref().map(str::as_bytes)),
        &worker.config().notifications,
        chrono::Utc::now(),
      );
      let outcome = worker
        .notification_click(&notification, action.as_deref())
        .await?;
      println!("{:?}", outcome);
    }
    Command::Sync { tag } => {
      if worker.sync(&tag).await {
        println!("sync {} done", tag);
      } else {
        println!("sync {} ignored", tag);
      }
    }
  }

  Ok(())
}

fn print_activation(report: &lifecycle::ActivationReport) {
  println!("activated {}", report.generation.tag());
  for store in &report.evicted {
    println!("  evicted {}", store);
  }
}

fn open_registry(config: &Config) -> Result<CacheRegistry> {
  let registry = match config.storage.backend {
    StorageBackend::Sqlite => CacheRegistry::new(SqliteStorage::open(&config.database_path()?)?),
    StorageBackend::Memory => match config.storage.max_entries {
      Some(limit) => CacheRegistry::new(MemoryStorage::with_capacity(limit)),
      None => CacheRegistry::new(MemoryStorage::new()),
    },
    StorageBackend::None => CacheRegistry::new(NoopStorage),
  };
  Ok(registry)
}

/// Log to stderr, and additionally to `log_file` when configured.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("swcache=info"));
  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let (file_layer, guard) = match &config.log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      std::fs::create_dir_all(dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

      let appender = tracing_appender::rolling::never(dir, file_name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer().with_writer(writer).with_ansi(false);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
