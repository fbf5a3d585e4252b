//! graysim CLI
//!
//! Run scenario files, analyze OBS logs and sweep attack rates.
//!
//! # Example
//!
//! ```bash
//! # Run a scenario, writing the OBS log and a JSON summary
//! graysim run scenario.toml --log run.log --summary run.json
//!
//! # Analyze a log captured from hardware
//! graysim analyze serial.log --window-secs 300
//!
//! # Sweep attack rates over three seeds
//! graysim matrix scenario.toml --rates 0,0.3,0.6,1 --seeds 1,2,3
//! ```

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use graysim::analysis::{analyze, parse_reader, DEFAULT_WINDOW};
use graysim::{run_matrix, ScenarioFile};
use grayhole::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Deterministic experiment runner for selective-forwarding studies.
#[derive(Parser, Debug)]
#[command(name = "graysim")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one scenario file and emit its OBS log
    Run {
        /// Scenario TOML file
        scenario: PathBuf,

        /// Write the log here instead of stdout
        #[arg(long)]
        log: Option<PathBuf>,

        /// Also write a JSON summary of the log
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Override the scenario seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the attack rate
        #[arg(long)]
        rate: Option<f64>,
    },

    /// Summarize an OBS log as JSON
    Analyze {
        /// Log file, `-` for stdin
        log: PathBuf,

        /// Analysis window in seconds
        #[arg(long, default_value_t = DEFAULT_WINDOW.as_secs())]
        window_secs: u64,
    },

    /// Run a scenario for every attack rate and seed, one JSON line per run
    Matrix {
        /// Scenario TOML file
        scenario: PathBuf,

        /// Attack rates to sweep
        #[arg(long, value_delimiter = ',', default_value = "0,0.1,0.3,0.5")]
        rates: Vec<f64>,

        /// Seeds to repeat each rate with
        #[arg(long, value_delimiter = ',', default_value = "1")]
        seeds: Vec<u64>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,graysim=info")),
        )
        .with_writer(io::stderr)
        .init();

    match Args::parse().command {
        Command::Run {
            scenario,
            log,
            summary,
            seed,
            rate,
        } => {
            let mut file = ScenarioFile::load(&scenario)
                .with_context(|| format!("loading {}", scenario.display()))?;
            if let Some(seed) = seed {
                file.seed = seed;
            }
            if rate.is_some() {
                file.experiment.attack_rate = rate;
            }
            info!(
                scenario = %scenario.display(),
                seed = file.seed,
                duration_secs = file.duration_secs,
                "starting run"
            );

            let result = file.run()?;
            let mut out: Box<dyn Write> = match &log {
                Some(path) => Box::new(BufWriter::new(
                    File::create(path).with_context(|| format!("creating {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(io::stdout().lock())),
            };
            for line in result.log_lines() {
                writeln!(out, "{line}")?;
            }
            out.flush()?;

            if let Some(path) = summary {
                let json = analyze(&result.log, DEFAULT_WINDOW).to_json()?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }

        Command::Analyze { log, window_secs } => {
            let records = if log.as_os_str() == "-" {
                parse_reader(io::stdin().lock())?
            } else {
                let file =
                    File::open(&log).with_context(|| format!("opening {}", log.display()))?;
                parse_reader(BufReader::new(file))?
            };
            info!(records = records.len(), "parsed log");
            let window = Duration::from_secs(window_secs.max(1));
            println!("{}", analyze(&records, window).to_json()?);
        }

        Command::Matrix {
            scenario,
            rates,
            seeds,
        } => {
            let file = ScenarioFile::load(&scenario)
                .with_context(|| format!("loading {}", scenario.display()))?;
            let rows = run_matrix(&file, &rates, &seeds)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for row in rows {
                writeln!(out, "{}", serde_json::to_string(&row)?)?;
            }
        }
    }

    Ok(())
}
