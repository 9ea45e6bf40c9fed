use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use edgecache::cache::CacheSource;
use edgecache::config::Config;
use edgecache::db::records::{Collection, RecordStore, DEFAULT_MAX_AGE_DAYS};
use edgecache::db::Database;
use edgecache::http::HttpRequest;
use edgecache::notify::{self, LogSink};
use edgecache::queue::{spawn_background_replay, PollingTrigger};
use edgecache::{logging, EdgeCache, FetchError};

#[derive(Parser, Debug)]
#[command(name = "edgecache")]
#[command(about = "Edge cache and offline write queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/edgecache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Send one request through the edge
  Fetch {
    /// Absolute URL or path relative to the configured origin
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Header as `Name: value`, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Inspect or clear pending writes
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// Replay pending writes once
  Sync,
  /// Precache the configured paths into the configured version
  Install,
  /// Make the configured version live and delete all others
  Activate,
  /// List cache namespaces
  Namespaces,
  /// Replay pending writes every time connectivity returns
  Watch,
  /// Offline report and audio records
  Records {
    #[command(subcommand)]
    action: RecordsAction,
  },
  /// Render a push payload as a notification
  Push {
    #[arg(long)]
    payload: Option<String>,
  },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  List,
  Clear,
}

#[derive(Subcommand, Debug)]
enum RecordsAction {
  /// Drop records older than the cutoff
  Cleanup {
    #[arg(long, default_value_t = DEFAULT_MAX_AGE_DAYS)]
    max_age_days: i64,
  },
  /// Durable store size in MB
  Size,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init_logging(&config, args.verbose)?;

  match args.command {
    Command::Fetch {
      url,
      method,
      headers,
      data,
    } => {
      let edge = EdgeCache::open(&config)?;
      let mut request = HttpRequest::new(&method, edge.resolve(&url)?);
      for header in &headers {
        let (name, value) = header
          .split_once(':')
          .ok_or_else(|| eyre!("Header must look like `Name: value`: {}", header))?;
        request = request.with_header(name.trim(), value.trim());
      }
      if let Some(body) = data {
        request = request.with_body(body);
      }

      let result = edge.fetch(request).await;
      edge.settle().await;
      match result {
        Ok(served) => {
          println!("{} ({})", served.response.status, served.source);
          if served.source != CacheSource::Network {
            if let Some(at) = served.cached_at {
              println!("cached at {}", at.to_rfc3339());
            }
          }
          println!("{}", served.response.body_text());
        }
        Err(FetchError::Queued { id, cause }) => {
          println!("queued as operation {} ({})", id, cause);
        }
        Err(e) => return Err(eyre!("{}", e)),
      }
    }
    Command::Queue { action } => {
      let edge = EdgeCache::open(&config)?;
      match action {
        QueueAction::List => {
          let ops = edge.queue().list();
          println!("{}", serde_json::to_string_pretty(&ops)?);
        }
        QueueAction::Clear => {
          edge.queue().clear()?;
          println!("queue cleared");
        }
      }
    }
    Command::Sync => {
      let edge = EdgeCache::open(&config)?;
      let report = edge.resync().await;
      println!("{}", serde_json::to_string(&report)?);
    }
    Command::Install => {
      let edge = EdgeCache::open(&config)?;
      let stored = edge.install().await?;
      println!("{}: precached {}/{}", config.version, stored, config.precache.len());
    }
    Command::Activate => {
      let edge = EdgeCache::open(&config)?;
      let removed = edge.activate()?;
      println!("{} is live, removed {} old namespace(s)", config.version, removed);
    }
    Command::Namespaces => {
      let edge = EdgeCache::open(&config)?;
      for name in edge.namespaces()? {
        println!("{}", name);
      }
    }
    Command::Watch => {
      let edge = EdgeCache::open(&config)?;
      let probe = edge.resolve(config.probe_url())?;
      let trigger = PollingTrigger::new(edge.transport(), probe, config.poll_interval());
      let Some(mut replay) = spawn_background_replay(&trigger, edge.orchestrator()) else {
        println!("background replay unavailable; run `edgecache sync` manually");
        return Ok(());
      };

      info!("Watching connectivity, Ctrl-C to stop");
      loop {
        tokio::select! {
          signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
            break;
          }
          report = replay.reports.recv() => match report {
            Some(report) => println!("{}", serde_json::to_string(&report)?),
            None => {
              warn!("Background replay worker stopped");
              break;
            }
          },
        }
      }
      trigger.stop();
      replay.handle.abort();
    }
    Command::Records { action } => {
      let db = Database::open(&config.data_dir()?)?;
      match action {
        RecordsAction::Cleanup { max_age_days } => {
          let max_age = chrono::Duration::days(max_age_days);
          for collection in Collection::ALL {
            let removed = RecordStore::new(db.clone(), collection).cleanup(max_age)?;
            println!("{:?}: removed {}", collection, removed);
          }
        }
        RecordsAction::Size => println!("{:.2} MB", db.estimate_size_mb()),
      }
    }
    Command::Push { payload } => {
      let message =
        notify::handle_push(&LogSink, payload.as_deref().map(str::as_bytes), "edgecache").await?;
      println!("{} - {} ({})", message.title, message.body, message.url);
    }
  }

  Ok(())
}
