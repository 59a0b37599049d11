//! Fencewatch Replay
//!
//! Replays a recorded location feed against a set of regions and prints every
//! alert as a JSON line on stdout. Logs go to stderr (`RUST_LOG`, default `info`).

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fencewatch::{
    AlertEmitter, EngineConfig, FeedLine, FenceError, FenceResult, Geofence, GeofenceEngine,
    InMemoryRegionStore, JsonLinesSink, RegionStore, ValidationError,
};

#[derive(Default)]
struct Args {
    regions: Option<PathBuf>,
    locations: Option<PathBuf>,
    config: Option<PathBuf>,
    shards: Option<usize>,
    stale_after_ms: Option<u64>,
    #[cfg(feature = "persistent")]
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct ReplaySummary {
    ticks: u64,
    rejected: u64,
}

fn print_help() {
    println!("fencewatch-replay - replay a location feed against geofences");
    println!();
    println!("USAGE:");
    println!("    fencewatch-replay --locations <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -l, --locations <FILE>       JSON lines: one location, or one array (= one tick), per line");
    println!("    -r, --regions <FILE>         JSON array of geofences");
    println!("    -c, --config <FILE>          Engine config (JSON)");
    println!("    -s, --shards <N>             Worker shards [default: 4]");
    println!("        --stale-after-ms <MS>    Evict devices silent for this long");
    #[cfg(feature = "persistent")]
    println!("    -d, --data-dir <DIR>         Keep regions in a durable store under DIR");
    println!("    -h, --help                   Print help information");
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args() -> Result<Option<Args>, String> {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args::default();

    let mut i = 1;
    while i < argv.len() {
        let flag = argv[i].as_str();
        match flag {
            "--locations" | "-l" => args.locations = Some(PathBuf::from(value(&argv, i, flag)?)),
            "--regions" | "-r" => args.regions = Some(PathBuf::from(value(&argv, i, flag)?)),
            "--config" | "-c" => args.config = Some(PathBuf::from(value(&argv, i, flag)?)),
            "--shards" | "-s" => {
                let raw = value(&argv, i, flag)?;
                args.shards = Some(raw.parse().map_err(|_| format!("invalid shard count: {raw}"))?);
            }
            "--stale-after-ms" => {
                let raw = value(&argv, i, flag)?;
                args.stale_after_ms = Some(raw.parse().map_err(|_| format!("invalid duration: {raw}"))?);
            }
            #[cfg(feature = "persistent")]
            "--data-dir" | "-d" => args.data_dir = Some(PathBuf::from(value(&argv, i, flag)?)),
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 2;
    }

    if args.locations.is_none() {
        return Err("--locations is required".to_string());
    }
    Ok(Some(args))
}

fn load_config(args: &Args) -> FenceResult<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    if let Some(shards) = args.shards {
        config.shards = shards;
    }
    if args.stale_after_ms.is_some() {
        config.stale_after_ms = args.stale_after_ms;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(args: &Args) -> FenceResult<Arc<dyn RegionStore>> {
    #[cfg(feature = "persistent")]
    if let Some(dir) = &args.data_dir {
        let store = fencewatch::PersistentRegionStore::open(dir, None)?;
        return Ok(Arc::new(store));
    }
    let _ = args;
    Ok(Arc::new(InMemoryRegionStore::new()))
}

fn load_regions(engine: &GeofenceEngine, path: &Path) -> FenceResult<usize> {
    let raw = fs::read_to_string(path)?;
    let regions: Vec<Geofence> = serde_json::from_str(&raw).map_err(|e| ValidationError::InvalidConfig {
        reason: format!("{}: {e}", path.display()),
    })?;

    let mut loaded = 0;
    for geofence in regions {
        let id = geofence.geofence_id.clone();
        let existing = engine.regions().get(&id)?.is_some();
        let result = if existing {
            engine.update_region(geofence)
        } else {
            engine.add_region(geofence)
        };
        match result {
            Ok(_) => loaded += 1,
            Err(e) => warn!(region = %id, error = %e, "region rejected"),
        }
    }
    Ok(loaded)
}

fn replay(engine: &GeofenceEngine, path: &Path) -> FenceResult<ReplaySummary> {
    let reader = BufReader::new(File::open(path)?);
    let mut summary = ReplaySummary::default();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let decoded = match FeedLine::parse(line) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(line = number + 1, error = %e, "unreadable feed line skipped");
                continue;
            }
        };
        for rejected in &decoded.rejected {
            warn!(
                line = number + 1,
                index = rejected.index,
                device = rejected.device.as_ref().map_or("?", |d| d.as_str()),
                reason = %rejected.reason,
                "malformed location skipped"
            );
        }
        summary.rejected += decoded.rejected.len() as u64;
        engine.submit(decoded.records)?;
        summary.ticks += 1;
    }

    engine.flush()?;
    Ok(summary)
}

fn run(args: &Args) -> FenceResult<()> {
    let config = load_config(args)?;
    let emitter = AlertEmitter::new(config.stream_capacity).with_sink(JsonLinesSink::new("stdout", io::stdout()));
    let engine = GeofenceEngine::start(config, open_store(args)?, emitter)?;

    if let Some(path) = &args.regions {
        let loaded = load_regions(&engine, path)?;
        info!(path = %path.display(), loaded, "regions loaded");
    }

    let Some(locations) = &args.locations else {
        return Err(FenceError::internal("locations path missing"));
    };
    let summary = replay(&engine, locations)?;

    let stats = engine.stats();
    info!(
        ticks = summary.ticks,
        accepted = stats.records_accepted,
        stale = stats.records_stale,
        malformed = stats.records_malformed + summary.rejected,
        alerts = stats.alerts.emitted,
        publish_failures = stats.alerts.publish_failures,
        "replay finished"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            eprintln!("run with --help for usage");
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "replay failed");
            ExitCode::FAILURE
        }
    }
}
