use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use offline_proxy::cache::CacheStorage;
use offline_proxy::config::Config;
use offline_proxy::db::Database;
use offline_proxy::event::{Event, EventLoop, Outcome};
use offline_proxy::http::{HttpNetwork, Request};
use offline_proxy::worker::{ClientMessage, LogHost, OfflineWorker, SyncReport};

#[derive(Parser, Debug)]
#[command(name = "offline-proxy")]
#[command(about = "Offline cache proxy with versioned cache stores and background sync")]
#[command(version)]
struct Args {
  /// Path to config file
  /// (default: ./offline-proxy.yaml, then $XDG_CONFIG_HOME/offline-proxy/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also write logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the application shell, then activate and purge stale stores
  Install,
  /// Send a request through the proxy
  Fetch {
    /// Absolute URL or path on the configured origin
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a document navigation
    #[arg(long)]
    navigate: bool,
    /// Request header as `name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Post a JSON client message, e.g. '{"type":"SKIP_WAITING"}'
  Message { json: String },
  /// Replay queued requests (default: every registered tag)
  Sync {
    #[arg(long)]
    tag: Option<String>,
  },
  /// Show a push notification, optionally clicking one of its actions
  Push {
    payload: Option<String>,
    #[arg(long)]
    click: Option<String>,
  },
  /// List cache stores and their entry counts
  Caches,
  /// List queued requests
  Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let db = match &config.database {
    Some(path) => Database::open(path)?,
    None => Database::open_default()?,
  };
  let network = Arc::new(HttpNetwork::new(&config.network)?);
  let worker = OfflineWorker::with_database(config, db, network, Arc::new(LogHost))?;
  let events = EventLoop::new(worker.clone());

  match args.command {
    Command::Install => {
      if let Outcome::Installed { activate_now } = events.run(Event::Install).await? {
        if activate_now {
          if let Outcome::Activated { deleted } = events.run(Event::Activate).await? {
            for name in deleted {
              println!("deleted {}", name);
            }
          }
        }
      }
      println!("{:?}", worker.state()?);
    }
    Command::Fetch {
      target,
      method,
      navigate,
      headers,
      data,
    } => {
      let request = build_request(worker.config(), &target, &method, navigate, headers, data)?;
      if let Outcome::Responded { response, source } = events.run(Event::Fetch(request)).await? {
        println!("{} ({:?})", response.status, source);
        for (name, value) in &response.headers {
          println!("{}: {}", name, value);
        }
        println!();
        println!("{}", response.text_body());
      }
    }
    Command::Message { json } => {
      let message = ClientMessage::parse(&json)?;
      if let Outcome::Message(outcome) = events.run(Event::Message(message)).await? {
        println!("{:?}", outcome);
      }
    }
    Command::Sync { tag: Some(tag) } => {
      if let Outcome::Synced(report) = events.run(Event::Sync { tag: tag.clone() }).await? {
        print_report(&tag, &report);
      }
    }
    Command::Sync { tag: None } => {
      let reports = worker.sync_registered().await?;
      if reports.is_empty() {
        println!("no sync registrations");
      }
      for (tag, report) in reports {
        print_report(&tag, &report);
      }
    }
    Command::Push { payload, click } => {
      let Outcome::Notified(notification) = events.run(Event::Push { payload }).await? else {
        return Err(eyre!("Push event produced no notification"));
      };
      println!("{}", serde_json::to_string_pretty(&notification)?);
      if let Some(action) = click {
        let outcome = events
          .run(Event::NotificationClick {
            notification,
            action: Some(action),
          })
          .await?;
        println!("{:?}", outcome);
      }
    }
    Command::Caches => {
      for name in worker.storage().keys()? {
        println!("{}\t{}", name, worker.storage().len(&name)?);
      }
    }
    Command::Queue => {
      for tag in worker.queue().registrations()? {
        println!("registered\t{}", tag);
      }
      for entry in worker.queue().all()? {
        println!(
          "{}\t{}\t{}\t{} {}\tattempts={}\t{}",
          entry.id,
          entry.tag,
          entry.state.as_str(),
          entry.method,
          entry.url,
          entry.attempts,
          entry.last_error.as_deref().unwrap_or("-")
        );
      }
    }
  }

  Ok(())
}

fn print_report(tag: &str, report: &SyncReport) {
  println!(
    "{}: replayed {}, rejected {}, remaining {}",
    tag, report.replayed, report.rejected, report.remaining
  );
}

fn build_request(
  config: &Config,
  target: &str,
  method: &str,
  navigate: bool,
  headers: Vec<String>,
  data: Option<String>,
) -> Result<Request> {
  let url = match url::Url::parse(target) {
    Ok(url) => url,
    Err(_) => config.resolve(target)?,
  };
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::new(method, url)
  };
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}', expected 'name: value'", header))?;
    request = request.with_header(name.trim(), value.trim());
  }
  if let Some(body) = data {
    request = request.with_body(body);
  }
  Ok(request)
}

/// Log to a daily file in the data directory, and to stderr with `--verbose`.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let dir = Database::data_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {:?}: {}", dir, e))?;

  let appender = tracing_appender::rolling::daily(&dir, "offline-proxy.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    || EnvFilter::try_from_env("OFFLINE_PROXY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_filter(filter());
  let stderr_layer = verbose.then(|| {
    fmt::layer()
      .with_writer(std::io::stderr)
      .with_filter(filter())
  });

  tracing_subscriber::registry()
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
