//! Market replay entry point: CLI wiring, logging and config-driven engine construction.

use std::path::Path;
use std::process;

use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use transactive_asset::config::NodeConfig;
use transactive_asset::io::export::export_csv;
use transactive_asset::sim::engine::Engine;

/// Parsed CLI arguments.
struct CliArgs {
    config_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    intervals_override: Option<usize>,
    telemetry_out: Option<String>,
}

fn print_help() {
    eprintln!("transactive-asset: replay markets against building assets");
    eprintln!();
    eprintln!("Usage: transactive-asset [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --config <path>          Load node configuration from a TOML file");
    eprintln!("  --preset <name>          Use a built-in preset ({})", NodeConfig::PRESETS.join(", "));
    eprintln!("  --seed <u64>             Override random seed");
    eprintln!("  --intervals <n>          Override number of markets to replay");
    eprintln!("  --telemetry-out <path>   Export results to CSV");
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --config or --preset is given, the demo preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: info).");
}

/// Returns the value following flag `args[*i]`, exiting if it is missing.
fn flag_value<'a>(args: &'a [String], i: &mut usize, what: &str) -> &'a str {
    let flag = &args[*i];
    *i += 1;
    match args.get(*i) {
        Some(v) => v,
        None => {
            eprintln!("error: {flag} requires {what}");
            process::exit(1);
        }
    }
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: None,
        preset: None,
        seed_override: None,
        intervals_override: None,
        telemetry_out: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--config" => {
                cli.config_path = Some(flag_value(&args, &mut i, "a path argument").to_string());
            }
            "--preset" => {
                cli.preset = Some(flag_value(&args, &mut i, "a name argument").to_string());
            }
            "--seed" => {
                let v = flag_value(&args, &mut i, "a u64 argument");
                if let Ok(s) = v.parse::<u64>() {
                    cli.seed_override = Some(s);
                } else {
                    eprintln!("error: --seed value \"{v}\" is not a valid u64");
                    process::exit(1);
                }
            }
            "--intervals" => {
                let v = flag_value(&args, &mut i, "a count argument");
                match v.parse::<usize>() {
                    Ok(n) if n > 0 => cli.intervals_override = Some(n),
                    _ => {
                        eprintln!("error: --intervals value \"{v}\" is not a positive integer");
                        process::exit(1);
                    }
                }
            }
            "--telemetry-out" => {
                cli.telemetry_out = Some(flag_value(&args, &mut i, "a path argument").to_string());
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("warning: logging disabled: {e}");
    }
}

fn main() {
    let cli = parse_args();
    init_logging();

    // --config takes priority, then --preset, then the demo default
    let mut node = if let Some(ref path) = cli.config_path {
        match NodeConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match NodeConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        NodeConfig::demo()
    };

    if let Some(seed) = cli.seed_override {
        node.simulation.seed = seed;
    }
    if let Some(n) = cli.intervals_override {
        node.simulation.intervals = n;
    }

    let errors = node.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });

    let results = runtime.block_on(async {
        let mut engine = Engine::from_config(&node).unwrap_or_else(|e| {
            eprintln!("{e}");
            process::exit(1);
        });
        engine.run().await
    });

    for r in &results {
        println!("{r}");
    }
    info!("{} results from node \"{}\"", results.len(), node.node.name);

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&results, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }
}
