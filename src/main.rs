//! SalsaG CLI
//!
//! Entry point for the `salsag` command-line tool.

use clap::{Parser, Subcommand};
use salsag::config::{Config, LoadedConfig, DEFAULT_CONFIG_FILE};
use salsag::context::Runtime;
use salsag::telemetry::{self, TelemetryError};
use salsag::TrustError;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "salsag")]
#[command(about = "Trust ledger and verification gate for build artifacts", version)]
struct Cli {
    /// Config file (default: ./salsag.toml when present)
    #[arg(long, short = 'c', global = true, env = "SALSAG_CONFIG")]
    config: Option<PathBuf>,

    /// Override storage.bucket
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Override storage.table
    #[arg(long, global = true)]
    table: Option<String>,

    /// Override storage.root
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package, sign, upload and record an artifact
    Start {
        /// File or directory to package
        path: PathBuf,

        /// Object key (default: <name>.tar)
        #[arg(long, short = 'k')]
        key: Option<String>,

        /// Package and digest only; no signing, upload or ledger write
        #[arg(long)]
        dry_run: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Verify an artifact against the ledger
    Verify {
        /// Object key to verify
        key: String,

        /// Local copy to check (default: the stored copy)
        #[arg(long, short = 'f')]
        file: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Summarize the ledger
    Status {
        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// List every record
        #[arg(long)]
        records: bool,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        run_init(cli.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)), force);
        return;
    }

    let runtime = match open_runtime(&cli) {
        Ok(r) => r,
        Err(e) => fail(e),
    };

    match cli.command {
        Commands::Start {
            path,
            key,
            dry_run,
            json,
        } => run_start(&runtime, path, key, dry_run, json),
        Commands::Verify { key, file, json } => run_verify(&runtime, &key, file, json),
        Commands::Status { json, records } => run_status(&runtime, json, records),
        Commands::Init { .. } => unreachable!("handled above"),
    }
}

fn open_runtime(cli: &Cli) -> Result<Runtime, TrustError> {
    let loaded = LoadedConfig::load(cli.config.as_deref(), cli_overrides(cli))?;

    match telemetry::init(&loaded.config.logging) {
        Ok(()) | Err(TelemetryError::AlreadyInitialized) => {}
        Err(e) => return Err(TrustError::config(e.to_string())),
    }
    tracing::debug!(sources = ?loaded.sources, "configuration loaded");

    Runtime::open(loaded.config)
}

fn cli_overrides(cli: &Cli) -> Option<Value> {
    let mut storage = Map::new();
    if let Some(bucket) = &cli.bucket {
        storage.insert("bucket".to_string(), json!(bucket));
    }
    if let Some(table) = &cli.table {
        storage.insert("table".to_string(), json!(table));
    }
    if let Some(root) = &cli.root {
        storage.insert("root".to_string(), json!(root.display().to_string()));
    }
    (!storage.is_empty()).then(|| json!({ "storage": storage }))
}

fn run_start(runtime: &Runtime, path: PathBuf, key: Option<String>, dry_run: bool, json: bool) {
    let orchestrator = match runtime.orchestrator() {
        Ok(o) => o,
        Err(e) => fail(e),
    };

    if dry_run {
        match orchestrator.plan(&path, key.as_deref()) {
            Ok(plan) if json => print_json(&plan),
            Ok(plan) => {
                println!("Dry run: {}", plan.object_key);
                println!("  Digest: {}", plan.digest);
                println!("  Size: {} bytes ({} entries)", plan.size_bytes, plan.entry_count);
                println!("  Signer: {}", plan.signer_backend);
                println!("  Artifact: {}", plan.artifact_key);
                println!("  Signing evidence: {}/", plan.signing_dir);
                if let Some(sbom) = &plan.sbom_key {
                    println!("  SBOM: {}", sbom);
                }
                if let Some(provenance) = &plan.provenance_key {
                    println!("  Provenance: {}", provenance);
                }
            }
            Err(e) => fail(e),
        }
        return;
    }

    match orchestrator.record_path(&path, key.as_deref()) {
        Ok(report) if json => print_json(&report),
        Ok(report) => {
            println!("Recorded {} ({})", report.object_key, report.outcome);
            println!("  Digest: {}", report.digest);
            println!("  Signer: {}", report.signer_identity);
            println!("  Signature: {}", report.signature_ref);
            match &report.transparency_log_ref {
                Some(log_ref) => println!("  Transparency log: {}", log_ref),
                None => println!("  Transparency log: not recorded"),
            }
        }
        Err(e) => fail(e),
    }
}

fn run_verify(runtime: &Runtime, key: &str, file: Option<PathBuf>, json: bool) {
    let verifier = runtime.verifier();
    let result = match file {
        Some(path) => verifier.verify_file(key, &path),
        None => verifier.verify_stored(key),
    };

    match result {
        Ok(verdict) => {
            if json {
                print_json(&verdict);
            } else {
                println!("{}", verdict.summary());
            }
            process::exit(if verdict.passed() { 0 } else { 1 });
        }
        Err(e) => fail(e),
    }
}

fn run_status(runtime: &Runtime, json: bool, list: bool) {
    let reporter = runtime.status();
    let summary = match reporter.summarize() {
        Ok(s) => s,
        Err(e) => fail(e),
    };
    let records = if list {
        match reporter.records() {
            Ok(r) => Some(r),
            Err(e) => fail(e),
        }
    } else {
        None
    };

    if json {
        match records {
            Some(records) => print_json(&json!({ "summary": summary, "records": records })),
            None => print_json(&summary),
        }
        return;
    }

    println!("Ledger: {}", runtime.config.storage.table);
    println!("  Total: {}", summary.total);
    println!("  Verified: {}", summary.verified_count);
    println!("  Failed: {}", summary.failed_count);
    println!("  Recorded only: {}", summary.recorded_only_count);
    for record in records.unwrap_or_default() {
        println!("  {}  {}  {}", record.status, record.digest, record.object_key);
    }
}

fn run_init(path: PathBuf, force: bool) {
    if path.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        process::exit(2);
    }
    let template = match Config::template() {
        Ok(t) => t,
        Err(e) => fail(e.into()),
    };
    if let Err(e) = fs::write(&path, template) {
        eprintln!("Error writing {}: {}", path.display(), e);
        process::exit(2);
    }
    println!("Wrote {}", path.display());
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

fn fail(err: TrustError) -> ! {
    eprintln!("error: {}", err);
    process::exit(err.kind.exit_code());
}
