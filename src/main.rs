use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use salon_offline::cache::{
  CacheEngine, CacheStorage, Destination, FetchOutcome, HttpNetwork, MemoryCacheStorage, Registration,
  Request, SqliteCacheStorage, SYNC_TAG,
};
use salon_offline::config::Config;
use salon_offline::db::Database;
use salon_offline::store::{
  KeyValueBackend, MemoryBackend, RecordStore, SchemaRegistry, SqliteBackend, StorageArea,
};

#[derive(Parser, Debug)]
#[command(name = "salon-offline")]
#[command(about = "Offline request cache and local record store for the salon manager")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/salon-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep everything in memory instead of the SQLite database
  #[arg(long)]
  ephemeral: bool,

  /// Log to stderr instead of the log file
  #[arg(long)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the configured version: precache the shell and activate
  Install,
  /// Fetch a URL through the cache engine
  Fetch {
    url: String,
    /// Request destination (document, script, style, image, font, manifest)
    #[arg(short, long, default_value = "empty")]
    destination: String,
    /// Treat the request as a page navigation
    #[arg(short, long)]
    navigate: bool,
    #[arg(short, long, default_value = "GET")]
    method: String,
  },
  /// Post a control message, e.g. '{"type":"CACHE_INVALIDATE"}'
  Message { json: String },
  /// Trigger background sync
  Sync {
    #[arg(default_value = SYNC_TAG)]
    tag: String,
  },
  /// Deliver a push payload
  Push { payload: Option<String> },
  /// List cache namespaces
  Namespaces,
  /// Inspect or edit record collections
  #[command(subcommand)]
  Store(StoreCommand),
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
  /// Print a collection
  Get { key: String },
  /// Replace a collection with a JSON array
  Set { key: String, json: String },
  /// Append a JSON record
  Add { key: String, json: String },
  /// Merge a JSON object into the record with this identity
  Update { key: String, id: String, json: String },
  /// Remove the record with this identity
  Remove { key: String, id: String },
  /// Remove the whole collection
  Clear { key: String },
  /// List persisted keys
  Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let db_path = config.storage.resolved_path()?;

  let log_dir = if args.log_stderr {
    None
  } else {
    db_path.parent().map(|p| p.join("logs"))
  };
  let _guard = salon_offline::logging::init(log_dir.as_deref())?;

  if args.ephemeral {
    run(
      args.command,
      &config,
      Arc::new(MemoryCacheStorage::new()),
      MemoryBackend::new(),
    )
    .await
  } else {
    let cache = SqliteCacheStorage::new(Database::open(&db_path)?.into_connection());
    let records = SqliteBackend::new(Database::open(&db_path)?.into_connection());
    run(args.command, &config, Arc::new(cache), records).await
  }
}

async fn run<S, B>(command: Command, config: &Config, cache: Arc<S>, records: B) -> Result<()>
where
  S: CacheStorage + 'static,
  B: KeyValueBackend + 'static,
{
  let network = Arc::new(HttpNetwork::new()?);
  let engine = || {
    CacheEngine::new(config.cache.clone(), network.clone(), cache.clone())
      .map(|e| e.with_app_name(config.app_name.clone()))
  };

  match command {
    Command::Install => {
      let mut registration = Registration::new();
      registration.register(engine()?).await?;
      println!(
        "installed and activated {}",
        config.cache.static_namespace()
      );
    }
    Command::Fetch {
      url,
      destination,
      navigate,
      method,
    } => {
      let url = config.cache.resolve(&url)?;
      let request = if navigate {
        Request::navigate(url)
      } else {
        Request::new(&method, url).with_destination(destination.parse::<Destination>()?)
      };

      match engine()?.fetch(&request).await? {
        FetchOutcome::Passthrough => println!("passthrough: not handled by the cache"),
        FetchOutcome::Served(served) => {
          println!("{} ({:?})", served.response.status, served.source);
          for (name, value) in &served.response.headers {
            println!("{}: {}", name, value);
          }
          println!();
          println!("{}", String::from_utf8_lossy(&served.response.body));
        }
      }
    }
    Command::Message { json } => {
      let mut registration = Registration::resume(engine()?)?;
      registration.message(&json)?;
    }
    Command::Sync { tag } => engine()?.sync(&tag).await?,
    Command::Push { payload } => {
      let notification = engine()?.push(payload.as_deref().map(str::as_bytes))?;
      println!("{}", serde_json::to_string_pretty(&notification)?);
    }
    Command::Namespaces => {
      let current = [
        config.cache.static_namespace(),
        config.cache.dynamic_namespace(),
      ];
      for name in cache.namespaces()? {
        let marker = if current.contains(&name) { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Store(cmd) => run_store(cmd, records)?,
  }

  Ok(())
}

fn run_store(command: StoreCommand, backend: impl KeyValueBackend + 'static) -> Result<()> {
  let area = Arc::new(StorageArea::new(backend));
  let store = RecordStore::new(area.clone(), SchemaRegistry::salon());
  let mut events = store.subscribe();

  match command {
    StoreCommand::Get { key } => {
      println!("{}", serde_json::to_string_pretty(&store.get(&key))?);
    }
    StoreCommand::Set { key, json } => {
      let data: Vec<Value> =
        serde_json::from_str(&json).map_err(|e| eyre!("Expected a JSON array: {}", e))?;
      store.set(&key, &data)?;
    }
    StoreCommand::Add { key, json } => {
      let record: Value =
        serde_json::from_str(&json).map_err(|e| eyre!("Invalid JSON record: {}", e))?;
      store.add(&key, record)?;
    }
    StoreCommand::Update { key, id, json } => {
      let patch: Map<String, Value> =
        serde_json::from_str(&json).map_err(|e| eyre!("Expected a JSON object: {}", e))?;
      store.update(&key, &id, &patch)?;
    }
    StoreCommand::Remove { key, id } => store.remove(&key, &id)?,
    StoreCommand::Clear { key } => store.clear(&key)?,
    StoreCommand::Keys => {
      for key in area.keys()? {
        println!("{}", key);
      }
    }
  }

  while let Some(event) = events.try_next() {
    println!("{} {}", event.name(), event.payload());
  }
  Ok(())
}
