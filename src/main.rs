mod config;
mod event;
mod gateway;
mod lifecycle;
mod net;
mod notify;
mod request;
mod response;
mod store;
mod strategy;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use event::{ControlMessage, GatewayEvent};
use gateway::{Dispatch, Gateway, Outcome};
use net::HttpFetcher;
use notify::HeadlessRegistry;
use request::{Method, RequestKey};
use store::SqliteStore;
use sync::SubmitOutcome;

#[derive(Parser, Debug)]
#[command(name = "offramp")]
#[command(about = "Offline-first request gateway for a browser application shell")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offramp/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-warm the configured version's cache generation from the manifest
  Install,
  /// Commit the configured version and delete superseded generations
  Activate,
  /// Show lifecycle state, generations, and queued mutations
  Status,
  /// Resolve one request through the gateway
  Fetch {
    /// Absolute URL or origin-relative path
    url: String,
    /// Send HEAD instead of GET
    #[arg(long)]
    head: bool,
  },
  /// Submit a mutation, queueing it if connectivity is out
  Submit {
    tag: String,
    /// Opaque payload delivered to the tag's target
    #[arg(long)]
    data: String,
  },
  /// Replay queued mutations for a tag (connectivity-restored trigger)
  Sync { tag: String },
  /// Render the alert for a push payload
  Push {
    /// Raw JSON payload; omitted or malformed fields default
    payload: Option<String>,
  },
  /// Deliver a control message (skip_waiting, cache_urls)
  Message { json: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let origin = config.origin_url()?;

  let store = Arc::new(match &config.cache_dir {
    Some(dir) => SqliteStore::open_at(&dir.join("cache.db"))?,
    None => SqliteStore::open()?,
  });
  let fetcher = Arc::new(HttpFetcher::new()?);
  let registry = Arc::new(HeadlessRegistry);
  let mut gateway = Gateway::new(&config, store, fetcher, registry)?;

  match args.command {
    Command::Install => {
      gateway.dispatch(GatewayEvent::Install).await?;
      println!("installed version {}", config.version);
    }

    Command::Activate => {
      gateway.dispatch(GatewayEvent::Activate).await?;
      println!("activated version {}", config.version);
    }

    Command::Status => {
      let status = gateway.status()?;
      println!("state:      {}", status.state);
      println!("generation: {}", status.generation);
      for (name, entries) in &status.generations {
        println!("  {} ({} entries)", name, entries);
      }
      if status.queues.is_empty() {
        println!("queue:      empty");
      } else {
        for (tag, depth) in &status.queues {
          println!("queued:     {} ({} pending)", tag, depth);
        }
      }
    }

    Command::Fetch { url, head } => {
      let method = if head { Method::Head } else { Method::Get };
      let key = if url.starts_with('/') {
        RequestKey::for_path(&origin, &url, method)?
      } else {
        RequestKey::parse(&url, method)?
      };

      match gateway.dispatch(GatewayEvent::Fetch { key }).await? {
        Outcome::Fetch(Dispatch::Response(response)) => {
          println!("{} ({})", response.status, response.source);
          if !response.body.is_empty() {
            println!("{}", String::from_utf8_lossy(&response.body));
          }
        }
        Outcome::Fetch(Dispatch::Bypass) => {
          println!("bypass: cross-origin request is not intercepted");
        }
        _ => {}
      }
    }

    Command::Submit { tag, data } => match gateway.submit(&tag, data.as_bytes()).await? {
      SubmitOutcome::Delivered => println!("delivered"),
      SubmitOutcome::Queued(id) => println!("queued as #{} for replay", id),
    },

    Command::Sync { tag } => {
      if let Outcome::Sync(outcome) = gateway
        .dispatch(GatewayEvent::Sync { tag: tag.clone() })
        .await?
      {
        println!(
          "{}: {} replayed, {} remaining, {} dropped",
          tag, outcome.replayed, outcome.remaining, outcome.dropped
        );
      }
    }

    Command::Push { payload } => {
      let raw = payload.map(String::into_bytes);
      if let Outcome::Alert(alert) = gateway.dispatch(GatewayEvent::Push { payload: raw }).await? {
        println!("{}", alert.title);
        println!("{}", alert.body);
        println!("-> {}", alert.url);
        for action in &alert.actions {
          println!("  [{}] {}", action.action, action.title);
        }
      }
    }

    Command::Message { json } => match ControlMessage::parse(json.as_bytes()) {
      Some(message) => {
        gateway.dispatch(GatewayEvent::Message { message }).await?;
        println!("message handled");
      }
      None => println!("message ignored"),
    },
  }

  Ok(())
}
