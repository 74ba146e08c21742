// src/main.rs
//
// CLI entrypoint: load the configuration document, wire adapters, run
// the reactor until a shutdown signal. Exit code 0 on clean shutdown,
// non-zero on a configuration error at startup.

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;

use mirrormaker::adapter::ExchangeAdapter;
use mirrormaker::config::EngineConfig;
use mirrormaker::mock_exchange::MockExchange;
use mirrormaker::reactor::Reactor;
use mirrormaker::telemetry::{EventSink, FileSink, NoopSink};

#[derive(Debug, Parser)]
#[command(
    name = "mirrormaker",
    about = "Mirror source-exchange liquidity onto a target exchange, hedging fills back",
    version
)]
struct Args {
    /// Path to the JSON configuration document.
    #[arg(long, default_value = "mirrormaker.json")]
    config: String,

    /// Compute plans each tick but never send an order.
    #[arg(long)]
    dry_run: bool,

    /// Write per-tick telemetry as JSONL to this path.
    #[arg(long)]
    telemetry: Option<String>,
}

fn fnv1a64(s: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut h = FNV_OFFSET;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Adapter registry. Only the deterministic mock driver ships with the
/// core crate; real venue drivers register here from their own crates.
fn builtin_adapters() -> HashMap<String, Arc<dyn ExchangeAdapter>> {
    let mut adapters: HashMap<String, Arc<dyn ExchangeAdapter>> = HashMap::new();
    adapters.insert("mock".to_string(), Arc::new(MockExchange::new("mock")));
    adapters
}

fn main() {
    let args = Args::parse();

    let mut config = match EngineConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {err}");
            std::process::exit(2);
        }
    };
    if args.dry_run {
        config.dry_run = true;
    }

    let sink: Box<dyn EventSink> = match &args.telemetry {
        Some(path) => match FileSink::create(path) {
            Ok(sink) => Box::new(sink),
            Err(err) => {
                eprintln!("ERROR: cannot open telemetry file {path}: {err}");
                std::process::exit(2);
            }
        },
        None => Box::new(NoopSink),
    };

    let cfg_hash = fnv1a64(&format!("{config:?}"));
    eprintln!(
        "mirrormaker | cfg_hash=0x{cfg_hash:016x} | accounts={} | markets={} | strategies={} | dry_run={}",
        config.accounts.len(),
        config.markets.len(),
        config.strategies.len(),
        config.dry_run,
    );

    let mut reactor = match Reactor::new(&config, builtin_adapters(), sink) {
        Ok(reactor) => reactor,
        Err(err) => {
            eprintln!("ERROR: {err}");
            std::process::exit(2);
        }
    };

    // Single-threaded runtime: all strategy logic, scheduling, and book
    // mutation run cooperatively on one thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");
    let result = runtime.block_on(reactor.run());
    if let Err(err) = result {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}
