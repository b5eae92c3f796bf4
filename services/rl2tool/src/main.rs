//! Command-line front end for raster coverage stores.
//!
//! Every subcommand prints a JSON report on stdout; logs go to stderr.
//! The exit status follows the store outcome: 0 on success, 1 on failure,
//! 2 on invalid arguments.

mod commands;
mod parse;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use coverage_store::{EngineConfig, Outcome, StoreError};
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "rl2tool")]
#[command(about = "Manage and read tiled raster coverages stored in SQLite")]
struct Args {
    /// Store file (created if missing)
    #[arg(long, global = true, env = "RL2_DB", default_value = "coverages.sqlite")]
    db: PathBuf,

    /// Tiles decoded concurrently (1-64, overrides RL2_MAX_THREADS)
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new coverage
    Create(commands::CreateArgs),

    /// Remove a coverage with all its tables
    Drop { coverage: String },

    /// List every coverage
    List,

    /// Describe one coverage and its sections
    Info { coverage: String },

    /// Import a raw band-interleaved pixel file as a new section
    Import(commands::ImportArgs),

    /// Delete one section and its tiles
    DeleteSection { coverage: String, section_id: i64 },

    /// Show or set the default red/green/blue/NIR bands
    DefaultBands(commands::DefaultBandsArgs),

    /// Turn automatic NDVI output on or off
    AutoNdvi {
        coverage: String,
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },

    /// Copy a coverage from another store file
    Copy {
        coverage: String,
        /// Source store file
        #[arg(long)]
        from: PathBuf,
    },

    /// Build pyramid levels for one section or the whole coverage
    Pyramidize(commands::PyramidizeArgs),

    /// Read a window as raw pixels
    Export(commands::ExportArgs),
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn run(args: Args) -> Result<serde_json::Value> {
    let mut config = EngineConfig::from_env();
    if let Some(threads) = args.threads {
        config.set_max_threads(threads);
    }
    debug!(db = %args.db.display(), threads = config.max_threads(), "Starting");

    let mut db = coverage_store::RasterDb::open(&args.db)?;
    match args.command {
        Command::Create(create) => commands::create(&mut db, &create),
        Command::Drop { coverage } => commands::drop(&mut db, &coverage),
        Command::List => commands::list(&db),
        Command::Info { coverage } => commands::info(&db, &coverage),
        Command::Import(import) => commands::import(&mut db, &import),
        Command::DeleteSection {
            coverage,
            section_id,
        } => commands::delete_section(&mut db, &coverage, section_id),
        Command::DefaultBands(bands) => commands::default_bands(&mut db, &bands),
        Command::AutoNdvi { coverage, enabled } => commands::auto_ndvi(&db, &coverage, enabled),
        Command::Copy { coverage, from } => commands::copy(&mut db, &coverage, &from),
        Command::Pyramidize(pyramid) => commands::pyramidize(&mut db, &mut config, &pyramid),
        Command::Export(export) => commands::export(&db, &config, &export),
    }
}

/// Exit status for a failed run: store outcomes map to 1 (failure) or
/// 2 (invalid arguments); anything else is a failure.
fn exit_status(err: &anyhow::Error) -> u8 {
    let outcome = err
        .downcast_ref::<StoreError>()
        .map_or(Outcome::Failure, StoreError::outcome);
    match outcome {
        Outcome::InvalidArguments => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level, args.log_json) {
        eprintln!("failed to initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_follows_outcome() {
        let invalid = anyhow::Error::new(StoreError::invalid_argument("bad bbox"));
        assert_eq!(exit_status(&invalid), 2);

        let missing = anyhow::Error::new(StoreError::CoverageNotFound("dem".into()));
        assert_eq!(exit_status(&missing), 1);

        let other = anyhow::anyhow!("cannot read input");
        assert_eq!(exit_status(&other), 1);
    }

    #[test]
    fn test_parse_export_command() {
        let args = Args::parse_from([
            "rl2tool",
            "--db",
            "/tmp/store.sqlite",
            "--threads",
            "4",
            "export",
            "ortho",
            "--bbox",
            "0,0,1.5,1",
            "--size",
            "300x200",
            "--out",
            "/tmp/out.raw",
        ]);
        assert_eq!(args.threads, Some(4));
        match args.command {
            Command::Export(export) => {
                assert_eq!(export.coverage, "ortho");
                assert_eq!(export.size, (300, 200));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_auto_ndvi() {
        let args = Args::parse_from(["rl2tool", "auto-ndvi", "bands", "false"]);
        assert!(matches!(
            args.command,
            Command::AutoNdvi { enabled: false, .. }
        ));
    }

    #[test]
    fn test_parse_pyramidize_method() {
        let args = Args::parse_from(["rl2tool", "pyramidize", "ortho", "--method", "Nearest"]);
        match args.command {
            Command::Pyramidize(p) => {
                assert_eq!(p.method, Some(raster_common::DownsampleMethod::Nearest));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(Args::try_parse_from(["rl2tool", "pyramidize", "ortho", "--method", "cubic"]).is_err());
    }
}
