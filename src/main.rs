use clap::{Parser, Subcommand};
use masjid_finder::config::{self, Config};
use masjid_finder::entity::{EntityResolver, EntityStore, Lookup, MemoryStore, RestStore};
use masjid_finder::geo::{format_distance, Location};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Masjid Finder — nearest-first mosque directory lookups
///
/// Lists venues ranked by distance from a reference point, or resolves a
/// single venue by numeric id or slug. Falls back from the search service to
/// a direct table read when the service is down.
///
/// Examples:
///   masjid list --lat -31.95 --lng 115.86
///   masjid list --page 2 --page-size 50
///   masjid get grand-mosque
///   masjid get 42 --fixture ./mosques.json
///   masjid serve --bind 0.0.0.0:8787
#[derive(Parser)]
#[command(name = "masjid", version, about, long_about = None)]
struct Cli {
    /// JSON config file. Defaults to <config dir>/masjid/config.json when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve from a local JSON fixture instead of the hosted backend.
    #[arg(long, global = true)]
    fixture: Option<PathBuf>,

    /// Override the list result cap.
    #[arg(long, global = true)]
    result_cap: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List venues, nearest first when a location is given.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,

        /// Latitude (-90 to 90).
        #[arg(long, allow_hyphen_values = true, requires = "lng")]
        lat: Option<f64>,

        /// Longitude (-180 to 180).
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lng: Option<f64>,
    },
    /// Look up one venue by id or slug.
    Get { identifier: String },
    /// Run the HTTP API.
    Serve {
        /// Listen address, e.g. 127.0.0.1:8787.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref()).unwrap_or_else(|e| fail(e));
    if let Some(cap) = cli.result_cap {
        config.result_cap = cap;
    }

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(?config, "configuration loaded");

    let store = open_store(&cli, &config);
    let resolver = Arc::new(
        EntityResolver::new(store, config.chain_settings()).with_result_cap(config.result_cap),
    );

    match cli.command {
        Command::List {
            page,
            page_size,
            lat,
            lng,
        } => {
            let location = lat.zip(lng).map(|(lat, lng)| Location::new(lat, lng));
            let results = resolver
                .get_list(page, page_size, location.as_ref())
                .await
                .unwrap_or_else(|e| fail(e));

            if results.is_empty() {
                eprintln!("  No venues found.");
            }
            for (i, r) in results.iter().enumerate() {
                let distance = r
                    .distance_km
                    .map(|km| format!(" ({})", format_distance(km)))
                    .unwrap_or_default();
                let city = r.record.city.as_deref().unwrap_or("");
                eprintln!("  {:>3}. {} {}{}", i + 1, r.record.name, city, distance);
            }
            print_json(&results);
        }
        Command::Get { identifier } => match resolver.get_by_id(&identifier).await {
            Ok(Lookup::Found(record)) => {
                eprintln!("  \u{1F54C} {} [{}]", record.name, record.id);
                print_json(&record);
            }
            Ok(Lookup::NotFound) => {
                eprintln!("Not found: '{}'", identifier);
                std::process::exit(2);
            }
            Err(e) => fail(e),
        },
        Command::Serve { bind } => {
            let addr = bind.unwrap_or(config.bind_addr);
            eprintln!("  Masjid Finder API on http://{}", addr);
            eprintln!("  Press Ctrl+C to stop.");
            if let Err(e) = masjid_finder::server::start(resolver, addr).await {
                fail(e);
            }
        }
    }
}

fn open_store(cli: &Cli, config: &Config) -> Arc<dyn EntityStore> {
    if let Some(path) = &cli.fixture {
        let store = MemoryStore::from_fixture(path).unwrap_or_else(|e| fail(e));
        return Arc::new(store);
    }
    let url = config.require_store_url().unwrap_or_else(|e| fail(e));
    Arc::new(RestStore::new(
        url,
        config.store_key.clone(),
        config.service_fn.clone(),
        config.timeout(),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => fail(e),
    }
}

fn fail(err: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(1);
}
