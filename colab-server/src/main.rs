//! colablists editor server.
//!
//! Serves the live list editor over WebSocket. Lists are persisted in
//! RocksDB unless `--in-memory` is given.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colab_core::{Group, Item, List, ListRepository, RepositoryError, User};
use colab_live::{ListServer, ServerConfig};
use log::info;

#[derive(Parser, Debug)]
#[command(name = "colab-server")]
#[command(about = "Live collaborative list editor server", long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// RocksDB directory
    #[arg(long, default_value = "colablists_data")]
    data_dir: PathBuf,

    /// Keep lists in memory only
    #[arg(long)]
    in_memory: bool,

    /// Create demo lists 1 and 2 when missing
    #[arg(long)]
    seed_demo: bool,

    /// Ping interval for idle connections, in seconds
    #[arg(long, default_value_t = 30)]
    heartbeat: u64,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.listen.clone(),
            heartbeat_interval_secs: self.heartbeat,
            storage_path: (!self.in_memory).then(|| self.data_dir.clone()),
            ..ServerConfig::default()
        }
    }
}

fn demo_lists() -> Vec<List> {
    let demo = User::new(1, "Demo");

    let mut groceries = List::new(1, "Groceries");
    groceries.description = "Weekly shop".to_string();
    groceries.creator = Some(demo.clone());
    let mut produce = Group::new(1, "Produce");
    produce.items.push(Item::new(1, "Apples", 0));
    produce.items.push(Item::new(2, "Spinach", 1));
    let mut dairy = Group::new(2, "Dairy");
    dairy.items.push(Item::new(3, "Milk", 0));
    groceries.groups.push(produce);
    groceries.groups.push(dairy);

    let mut chores = List::new(2, "Chores");
    chores.creator = Some(demo);
    let mut group = Group::new(1, "default");
    group.items.push(Item::new(1, "default", 0));
    chores.groups.push(group);

    vec![groceries, chores]
}

fn seed_demo(repository: &dyn ListRepository) -> Result<(), RepositoryError> {
    for list in demo_lists() {
        match repository.load(list.id) {
            Ok(_) => info!("Demo list {} already present", list.id),
            Err(RepositoryError::NotFound(_)) => {
                repository.save(&list)?;
                info!("Seeded demo list {} \"{}\"", list.id, list.title);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let server = match ListServer::open(args.server_config()) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to open list storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.seed_demo {
        if let Err(e) = seed_demo(server.coordinator().repository().as_ref()) {
            log::error!("Failed to seed demo lists: {e}");
            return ExitCode::FAILURE;
        }
    }

    info!("Starting colablists editor on {}", server.bind_addr());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                log::error!("Server stopped: {e}");
                return ExitCode::FAILURE;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    ExitCode::SUCCESS
}
