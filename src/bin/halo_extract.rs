use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use halopix::{config::HaloConfig, halo_errors::HaloError, pipeline::HaloPipeline};
use log::{error, info};

#[derive(Parser)]
#[command(name = "halo_extract")]
#[command(about = "Extract central halos from HEALPix-partitioned sky catalogs")]
struct Cli {
    /// JSON run configuration; the flags below override its values
    #[arg(short, long)]
    config: Option<Utf8PathBuf>,

    /// Directory holding the catalogs
    #[arg(long)]
    base_path: Option<Utf8PathBuf>,

    /// HEALPix resolution (power of two)
    #[arg(long)]
    nside: Option<u32>,

    /// Worker threads, -1 for every core
    #[arg(short, long, allow_hyphen_values = true)]
    jobs: Option<i32>,

    /// Output file (`.fits` writes a FITS table, anything else Parquet)
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// Also load the populated neighbours of every cell
    #[arg(long)]
    neighbours: bool,

    /// Ignore the cached cell membership and rebuild it
    #[arg(long)]
    rebuild_membership: bool,

    /// Log specification, e.g. "info" or "halopix=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn setup_logging(spec: &str) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    Logger::try_with_env_or_str(spec)?.log_to_stderr().start()
}

fn resolve_config(cli: &Cli) -> Result<HaloConfig, HaloError> {
    let mut config = match &cli.config {
        Some(path) => HaloConfig::from_json_file(path)?,
        None => HaloConfig::default(),
    };
    if let Some(base_path) = &cli.base_path {
        config.base_path = base_path.clone();
    }
    if let Some(nside) = cli.nside {
        config.nside = nside;
        if cli.config.is_none() {
            config.membership_cache = Utf8PathBuf::from(format!("gold_pixels_nside{nside}.parquet"));
        }
    }
    if let Some(jobs) = cli.jobs {
        config.n_jobs = jobs;
    }
    if let Some(output) = &cli.output {
        config.output = output.clone();
    }
    config.include_neighbours |= cli.neighbours;
    if cli.rebuild_membership {
        config.reuse_membership = false;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), HaloError> {
    let config = resolve_config(cli)?;
    let summary = HaloPipeline::from_config(config)?.execute()?;
    info!(
        "{} halos from {} cells written to {}",
        summary.rows, summary.cells, summary.output
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logger = match setup_logging(&cli.log_level) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Logger initialization failed with {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
