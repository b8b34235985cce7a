use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde::Serialize;
use std::path::PathBuf;

use envcache::config::Config;
use envcache::logging;
use envcache::remote::CachedEnvClient;
use envcache::search::SearchFilter;

#[derive(Parser, Debug)]
#[command(name = "envcache")]
#[command(about = "Cached access to district environmental metrics, with offline support")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/envcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Oxygen metrics for a district and parameter pair
  Metric {
    district: String,
    param1: f64,
    param2: f64,
  },
  /// District detail, served locally while offline
  Detail {
    slug: String,
    /// Try the network even when offline
    #[arg(long)]
    force_refresh: bool,
  },
  /// Filter the district list
  Search {
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    min_population: Option<u64>,
    #[arg(long)]
    name_contains: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
  },
  /// Offline mirror statistics
  Stats,
  /// Remove offline records past the retention window
  Cleanup,
  /// Remove every offline record
  Clear,
  /// Request metrics and connectivity
  Health,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let _logging = logging::init(&logging::log_dir(&config.data_dir()?))?;

  let client = CachedEnvClient::open(&config)?;
  let outcome = run(&client, args.command).await;
  client.shutdown().await;
  outcome
}

async fn run(client: &CachedEnvClient, command: Command) -> Result<()> {
  match command {
    Command::Metric {
      district,
      param1,
      param2,
    } => {
      let cached = client.metric(&district, param1, param2).await?;
      print_json(&cached.value)?;
      eprintln!("source: {:?}", cached.source);
    }
    Command::Detail {
      slug,
      force_refresh,
    } => {
      let fetched = client.detail(&slug, force_refresh).await?;
      print_json(&fetched)?;
    }
    Command::Search {
      state,
      min_population,
      name_contains,
      limit,
    } => {
      let filter = SearchFilter {
        state,
        name_contains,
        min_population,
        limit,
      };
      print_json(&client.search(&filter).await?)?;
    }
    Command::Stats => print_json(&client.stats().await?)?,
    Command::Cleanup => println!("Removed {} expired records", client.cleanup().await?),
    Command::Clear => println!("Removed {} records", client.clear().await?),
    Command::Health => print_json(&client.health())?,
  }
  Ok(())
}
