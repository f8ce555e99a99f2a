//! veil_log - inspect the blocked-access audit log.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use veil_kernel::{BlockLogStore, FileLogStore};

#[derive(Parser, Debug)]
#[command(name = "veil_log", about = "Inspect the Veil Kernel blocked-access log")]
struct Args {
    /// Path to the blocked-access log
    #[arg(long, env = "VEIL_LOG_PATH", default_value = "/var/lib/veil/blocked.json")]
    log_path: PathBuf,

    /// Show only the most recent N entries
    #[arg(long)]
    latest: Option<usize>,

    /// Emit raw JSON instead of one line per entry
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store = FileLogStore::new(&args.log_path);
    let mut entries = store.load();
    if let Some(latest) = args.latest {
        entries.truncate(latest);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("no blocked accesses recorded at {}", args.log_path.display());
        return Ok(());
    }

    // Entries are persisted newest-first.
    for entry in &entries {
        println!(
            "{:>16.3}  {:<12}  {}",
            entry.timestamp, entry.kind, entry.bundle_id
        );
    }
    Ok(())
}
