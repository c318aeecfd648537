//! Radiocal CLI - Command-line interface
//!
//! Runs radio calibrations against the simulated vehicle, classifies status
//! lines and manages the configuration file.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use radiocal_core::cli::{exit_code_description, format_classification, format_update, print_exit_codes};
use radiocal_core::config::{self, AppConfig, ConfigError};
use radiocal_core::core::simulator::{AckBehavior, ScriptOutcome};
use radiocal_core::core::transcript::{SharedTranscript, TranscribingLink};
use radiocal_core::{
    init_logging, CalibrationSession, CliResult, CommandResult, ExitCodes, FirmwareGeneration, OutputFormat,
    ProgressReport, RawDiagnosticLine, SessionResult, SimulatedVehicle, SimulatorConfig, StatustextClassifier,
    Transcript, TranscriptFormat, VehicleLink,
};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Progress reporting style of the simulated vehicle
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Firmware {
    /// Ack once, then status lines only
    Legacy,
    /// In-progress acks carrying a fraction
    ProgressAck,
}

impl From<Firmware> for FirmwareGeneration {
    fn from(firmware: Firmware) -> Self {
        match firmware {
            Firmware::Legacy => FirmwareGeneration::Legacy,
            Firmware::ProgressAck => FirmwareGeneration::ProgressAck,
        }
    }
}

/// Forced answer to the calibration command
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Ack {
    /// Accept and run the calibration
    Accept,
    /// Never answer
    Silent,
    Busy,
    Denied,
    Unsupported,
    Timeout,
    NoDevice,
    ConnectionError,
    Unknown,
}

impl From<Ack> for AckBehavior {
    fn from(ack: Ack) -> Self {
        match ack {
            Ack::Accept => AckBehavior::Accept,
            Ack::Silent => AckBehavior::Silent,
            Ack::Busy => AckBehavior::Respond(CommandResult::Busy),
            Ack::Denied => AckBehavior::Respond(CommandResult::CommandDenied),
            Ack::Unsupported => AckBehavior::Respond(CommandResult::Unsupported),
            Ack::Timeout => AckBehavior::Respond(CommandResult::Timeout),
            Ack::NoDevice => AckBehavior::Respond(CommandResult::NoDevice),
            Ack::ConnectionError => AckBehavior::Respond(CommandResult::ConnectionError),
            Ack::Unknown => AckBehavior::Respond(CommandResult::UnknownError),
        }
    }
}

/// Transcript file format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum TranscriptKind {
    /// Plain text
    Text,
    /// JSON lines
    Jsonl,
}

impl From<TranscriptKind> for TranscriptFormat {
    fn from(kind: TranscriptKind) -> Self {
        match kind {
            TranscriptKind::Text => TranscriptFormat::Text,
            TranscriptKind::Jsonl => TranscriptFormat::JsonLines,
        }
    }
}

/// Radiocal CLI
#[derive(Parser, Debug)]
#[command(
    name = "radiocal",
    version,
    about = "Radio controller calibration for MAVLink autopilots",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors and final outcome only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "RADIOCAL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Calibrate the radio controller of the simulated vehicle
    Calibrate(CalibrateArgs),

    /// Classify calibration status lines (arguments, or stdin when none)
    Classify {
        /// Lines to classify
        lines: Vec<String>,

        /// Marker tag
        #[arg(short, long)]
        marker: Option<String>,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List exit codes
    ExitCodes,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Vehicle is armed
    #[arg(long)]
    armed: bool,

    /// Progress reporting style
    #[arg(long, value_enum)]
    firmware: Option<Firmware>,

    /// Forced answer to the calibration command
    #[arg(long, value_enum)]
    ack: Option<Ack>,

    /// Make the calibration fail with this reason
    #[arg(long, conflicts_with = "stall")]
    fail: Option<String>,

    /// Stop the calibration without a final status line
    #[arg(long)]
    stall: bool,

    /// Probability of losing a status line (0.0 - 1.0)
    #[arg(long)]
    drop_rate: Option<f32>,

    /// Base latency of every answer (ms)
    #[arg(long)]
    latency: Option<u64>,

    /// Pause between status lines (ms)
    #[arg(long)]
    step: Option<u64>,

    /// No unrelated status lines
    #[arg(long)]
    no_chatter: bool,

    /// Give up after this many seconds (cancels the calibration)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Request cancellation after this many milliseconds
    #[arg(long)]
    cancel_after: Option<u64>,

    /// Write a transcript to this file
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Transcript format
    #[arg(long, value_enum, default_value_t = TranscriptKind::Text)]
    transcript_format: TranscriptKind,
}

impl CalibrateArgs {
    fn simulator_config(&self, base: &SimulatorConfig) -> Result<SimulatorConfig, CliResult> {
        let mut config = base.clone();

        if self.armed {
            config.armed = true;
        }
        if let Some(firmware) = self.firmware {
            config.firmware = firmware.into();
        }
        if let Some(ack) = self.ack {
            config.ack = ack.into();
        }
        if let Some(reason) = &self.fail {
            config.outcome = ScriptOutcome::Failure(reason.clone());
        } else if self.stall {
            config.outcome = ScriptOutcome::Stall;
        }
        if let Some(rate) = self.drop_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(CliResult::invalid_args(format!("Drop rate out of range: {}", rate)));
            }
            config.drop_probability = rate;
        }
        if let Some(latency) = self.latency {
            config.latency.base_ms = latency;
        }
        if let Some(step) = self.step {
            config.step_interval_ms = step;
        }
        if self.no_chatter {
            config.chatter = false;
        }

        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            let result = CliResult::from(e);
            report(&cli, &result);
            return Ok(result.to_exit_code());
        }
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    } else if cli.quiet {
        logging.level = "error".to_string();
    }
    let _guard = init_logging(&logging).context("Failed to initialize logging")?;

    tracing::debug!("Starting radiocal v{}", radiocal_core::VERSION);

    let result = match &cli.command {
        Commands::Calibrate(args) => calibrate(&cli, &config, args).await?,
        Commands::Classify { lines, marker } => classify_lines(&cli, &config, lines, marker.as_deref())?,
        Commands::Config { action } => handle_config(&cli, &config, action)?,
        Commands::ExitCodes => show_exit_codes(&cli)?,
    };

    report(&cli, &result);
    Ok(result.to_exit_code())
}

fn config_path(cli: &Cli) -> Result<PathBuf, ConfigError> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::config_path().ok_or(ConfigError::NoConfigDir),
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    match config_path(cli) {
        Ok(path) => AppConfig::load_from(&path),
        Err(ConfigError::NoConfigDir) => Ok(AppConfig::default()),
        Err(e) => Err(e),
    }
}

fn report(cli: &Cli, result: &CliResult) {
    if let CliResult::Error(code, msg) = result {
        match cli.format {
            OutputFormat::Json => eprintln!(
                "{}",
                serde_json::json!({ "error": msg, "exit_code": code, "description": exit_code_description(*code) })
            ),
            OutputFormat::Text => eprintln!("Error: {}", msg),
        }
    }
}

fn print_update(cli: &Cli, result: &SessionResult, report: &ProgressReport) {
    if cli.quiet && !result.is_terminal() {
        return;
    }
    println!("{}", format_update(result, report, cli.format));
}

async fn calibrate(cli: &Cli, config: &AppConfig, args: &CalibrateArgs) -> anyhow::Result<CliResult> {
    let sim_config = match args.simulator_config(&config.simulator) {
        Ok(sim_config) => sim_config,
        Err(result) => return Ok(result),
    };

    let vehicle = Arc::new(SimulatedVehicle::new(sim_config)?);

    let transcript: Option<SharedTranscript> = match &args.transcript {
        Some(path) => Some(
            Transcript::create(path, args.transcript_format.into())
                .with_context(|| format!("Failed to create transcript {}", path.display()))?
                .shared(),
        ),
        None => None,
    };

    let link: Arc<dyn VehicleLink> = match &transcript {
        Some(transcript) => Arc::new(TranscribingLink::new(vehicle.clone(), transcript.clone())),
        None => vehicle.clone(),
    };
    let session = Arc::new(CalibrationSession::with_settings(link, config.calibration_settings()));

    let interrupted = Arc::downgrade(&session);
    ctrlc::set_handler(move || {
        if let Some(session) = interrupted.upgrade() {
            tracing::info!("Interrupted, cancelling calibration");
            session.cancel();
        }
    })?;

    if !cli.quiet && cli.format == OutputFormat::Text {
        eprintln!("Calibrating radio controller. Press Ctrl+C to cancel.");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let recorder = transcript.clone();
    session.start(move |result: SessionResult, report: ProgressReport| {
        if let Some(transcript) = &recorder {
            transcript.lock().record_update(&result, &report);
        }
        let _ = tx.send((result, report));
    });

    let deadline = sleep_or_pending(args.timeout.map(Duration::from_secs));
    let cancel_timer = sleep_or_pending(args.cancel_after.map(Duration::from_millis));
    tokio::pin!(deadline);
    tokio::pin!(cancel_timer);
    let mut cancel_requested = false;

    let result = loop {
        tokio::select! {
            update = rx.recv() => match update {
                Some((result, report)) => {
                    print_update(cli, &result, &report);
                    if result.is_terminal() {
                        break CliResult::from(&result);
                    }
                }
                None => break CliResult::error(ExitCodes::INTERNAL_ERROR, "Calibration ended without an outcome"),
            },
            _ = &mut cancel_timer, if !cancel_requested => {
                cancel_requested = true;
                tracing::info!("Requesting cancellation");
                session.cancel();
            }
            _ = &mut deadline => {
                tracing::warn!("No outcome before the deadline, cancelling calibration");
                session.cancel();
                break CliResult::timeout("Calibration did not finish in time");
            }
        }
    };

    if let Some(transcript) = &transcript {
        transcript.lock().flush()?;
    }

    Ok(result)
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

fn classify_lines(
    cli: &Cli,
    config: &AppConfig,
    lines: &[String],
    marker: Option<&str>,
) -> anyhow::Result<CliResult> {
    let classifier = StatustextClassifier::new(marker.unwrap_or(&config.calibration.marker));
    let print = |text: &str| {
        let line = RawDiagnosticLine::new(text);
        let event = classifier.classify(&line);
        println!("{}", format_classification(line.as_str(), &event, cli.format));
    };

    if lines.is_empty() {
        for line in io::stdin().lock().lines() {
            print(&line?);
        }
    } else {
        for line in lines {
            print(line);
        }
    }

    Ok(CliResult::success())
}

fn handle_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> anyhow::Result<CliResult> {
    match action {
        ConfigAction::Show => {
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
                OutputFormat::Text => print!("{}", toml::to_string_pretty(config)?),
            }
            Ok(CliResult::success())
        }
        ConfigAction::Path => match config_path(cli) {
            Ok(path) => {
                println!("{}", path.display());
                Ok(CliResult::success())
            }
            Err(e) => Ok(CliResult::from(e)),
        },
        ConfigAction::Init { force } => {
            let path = match config_path(cli) {
                Ok(path) => path,
                Err(e) => return Ok(CliResult::from(e)),
            };
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists (use --force to overwrite)", path.display()),
                ));
            }
            if let Err(e) = AppConfig::default().save_to(&path) {
                return Ok(CliResult::from(e));
            }
            if !cli.quiet {
                println!("Wrote {}", path.display());
            }
            Ok(CliResult::success_with_message(path.display().to_string()))
        }
    }
}

fn show_exit_codes(cli: &Cli) -> anyhow::Result<CliResult> {
    match cli.format {
        OutputFormat::Json => {
            let codes: Vec<serde_json::Value> = ExitCodes::ALL
                .iter()
                .map(|code| serde_json::json!({ "code": code, "description": exit_code_description(*code) }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&codes)?);
        }
        OutputFormat::Text => print_exit_codes(),
    }
    Ok(CliResult::success())
}
