//! KQ CLI - Command-line interface for the KQ engine
//!
//! Commands:
//! - analyze: Run the full analysis for one subject and write results
//! - doctor: Check which recordings and event tables a subject has
//! - schema: Print the time-series column contract

use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use kq_engine::config::{subject_eeg_dir, DEFAULT_OVERLAP_PERCENT, DEFAULT_WINDOW_SEC};
use kq_engine::encoder::{timeseries_columns, EVENTS_FILE, METADATA_FILE, TIMESERIES_FILE};
use kq_engine::{AnalysisConfig, KqEncoder, KqError, KqProcessor, KQ_VERSION, PRODUCER_NAME};

/// KQ - composite anesthetic-depth index from multi-channel EEG
#[derive(Parser)]
#[command(name = "kq")]
#[command(version = KQ_VERSION)]
#[command(about = "Compute the KQ index from sedation EEG recordings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one subject and write the time series, events and metadata
    Analyze {
        /// Dataset root (contains sub-<id>/eeg/)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Subject identifier without the sub- prefix
        #[arg(short, long)]
        subject: String,

        /// Sliding window length in seconds
        #[arg(long, default_value_t = DEFAULT_WINDOW_SEC)]
        window_sec: f64,

        /// Sliding window overlap in percent
        #[arg(long, default_value_t = DEFAULT_OVERLAP_PERCENT)]
        overlap: f64,

        /// Output directory (default: <dataset>/kq_results_<timestamp>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a JSON summary of the analysis to stdout
        #[arg(long)]
        stdout_summary: bool,
    },

    /// Check which recordings and event tables exist for a subject
    Doctor {
        /// Dataset root
        #[arg(short, long)]
        dataset: PathBuf,

        /// Subject identifier
        #[arg(short, long)]
        subject: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the time-series CSV columns
    Schema,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kq_engine=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), KqCliError> {
    match cli.command {
        Commands::Analyze {
            dataset,
            subject,
            window_sec,
            overlap,
            output,
            stdout_summary,
        } => cmd_analyze(dataset, subject, window_sec, overlap, output, stdout_summary),

        Commands::Doctor {
            dataset,
            subject,
            json,
        } => cmd_doctor(&dataset, &subject, json),

        Commands::Schema => {
            cmd_schema();
            Ok(())
        }
    }
}

fn cmd_analyze(
    dataset: PathBuf,
    subject: String,
    window_sec: f64,
    overlap: f64,
    output: Option<PathBuf>,
    stdout_summary: bool,
) -> Result<(), KqCliError> {
    let config = AnalysisConfig::new(dataset, subject).with_window(window_sec, overlap);
    let analysis = KqProcessor::new().analyze(&config)?;

    let encoder = KqEncoder::new();
    let directory = output.unwrap_or_else(|| encoder.default_output_dir(&config.dataset_root));
    let paths = encoder.write_all(&directory, &config, &analysis)?;

    eprintln!("Results written to {}", paths.directory.display());
    if stdout_summary {
        println!("{}", serde_json::to_string_pretty(&analysis.summary())?);
    }
    Ok(())
}

fn cmd_doctor(dataset: &Path, subject: &str, json: bool) -> Result<(), KqCliError> {
    let processor = KqProcessor::new();
    let phases = processor.phase_table();
    let eeg_dir = subject_eeg_dir(dataset, subject);
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(if eeg_dir.is_dir() {
        DoctorCheck {
            name: "eeg_dir".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} exists", eeg_dir.display()),
        }
    } else {
        DoctorCheck {
            name: "eeg_dir".to_string(),
            status: CheckStatus::Error,
            message: format!("{} does not exist", eeg_dir.display()),
        }
    });

    let mut recordings = 0;
    for phase in &phases.phases {
        let file = phase.header_file_name(subject);
        let found = eeg_dir.join(&file).exists();
        if found {
            recordings += 1;
        }
        checks.push(DoctorCheck {
            name: phase.name.clone(),
            status: if found { CheckStatus::Ok } else { CheckStatus::Warning },
            message: if found {
                file
            } else {
                format!("{file} not found, phase will be skipped")
            },
        });
    }
    if recordings == 0 {
        checks.push(DoctorCheck {
            name: "recordings".to_string(),
            status: CheckStatus::Error,
            message: "No phase recordings found".to_string(),
        });
    }

    for task in &phases.event_tasks {
        for &run in &phases.event_runs {
            let file = phases.event_file_name(subject, task, run);
            let found = eeg_dir.join(&file).exists();
            checks.push(DoctorCheck {
                name: format!("events_{task}_run{run}"),
                status: if found { CheckStatus::Ok } else { CheckStatus::Warning },
                message: if found { file } else { format!("{file} not found") },
            });
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: KQ_VERSION.to_string(),
        subject: subject.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("KQ Doctor Report");
        println!("================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("Subject:  {}", report.subject);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(KqCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema() {
    println!("{TIMESERIES_FILE} columns:");
    for column in timeseries_columns() {
        println!("  {column}");
    }
    println!();
    println!("{EVENTS_FILE}: source event columns, then task, run, onset_global");
    println!("{METADATA_FILE}: run id, subject, window settings, filter band, phases, baseline");
    println!();
    println!("Empty fields mark values that are undefined for a window.");
}

// Error types

#[derive(Debug)]
enum KqCliError {
    Analysis(KqError),
    Json(serde_json::Error),
    DoctorFailed,
}

impl From<KqError> for KqCliError {
    fn from(e: KqError) -> Self {
        KqCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for KqCliError {
    fn from(e: serde_json::Error) -> Self {
        KqCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<KqCliError> for CliError {
    fn from(e: KqCliError) -> Self {
        match e {
            KqCliError::Analysis(e) => {
                let (code, hint) = match &e {
                    KqError::MissingData { .. } => {
                        ("MISSING_DATA", Some("Run 'kq doctor' to list the expected recordings"))
                    }
                    KqError::InsufficientChannels { .. } => (
                        "INSUFFICIENT_CHANNELS",
                        Some("Recordings must share at least 2 good EEG channels"),
                    ),
                    KqError::InvalidConfig(_) => (
                        "INVALID_CONFIG",
                        Some("Window length must be positive and overlap in [0, 100)"),
                    ),
                    KqError::Header(_) | KqError::UnsupportedFormat(_) => {
                        ("RECORDING_ERROR", Some("Check the BrainVision header and data files"))
                    }
                    KqError::Io(_) => ("IO_ERROR", Some("Check file paths and permissions")),
                    KqError::Csv(_) | KqError::EventTable(_) => ("TABLE_ERROR", None),
                    _ if !e.is_fatal() => (
                        "LOCAL_ERROR",
                        Some("Rerun with RUST_LOG=kq_engine=debug to see the affected window or table"),
                    ),
                    _ => ("ANALYSIS_ERROR", None),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: hint.map(str::to_string),
                }
            }
            KqCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            KqCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    subject: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
