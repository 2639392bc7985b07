//! BulkMailer CLI - send personalized emails from a CSV or Excel file via Gmail.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use bulkmailer::{exit_code, run_batch, BatchRequest, Config, TracingEvents};

#[derive(Parser)]
#[command(name = "bulkmailer", about = "Local Gmail bulk mailer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send personalized bulk emails via Gmail
    Send(SendArgs),
}

#[derive(clap::Args)]
struct SendArgs {
    /// Path to CSV or Excel file
    #[arg(long)]
    file: PathBuf,

    /// Email subject with {placeholders}
    #[arg(long)]
    subject: String,

    /// Path to email body template file
    #[arg(long)]
    body: PathBuf,

    /// Optional log file path (JSON lines, appended)
    #[arg(long)]
    log: Option<PathBuf>,

    /// For Excel files, overwrite original instead of creating new file
    #[arg(long)]
    inplace: bool,

    /// Limit number of emails to send (for testing)
    #[arg(long)]
    limit: Option<usize>,

    /// Preview rendered emails without sending
    #[arg(long)]
    dry_run: bool,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "BULKMAILER_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_code::MISSING_INPUT
            } else {
                exit_code::SUCCESS
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let Commands::Send(args) = cli.command;
    init_logging(args.log_format, args.log.as_ref());

    ExitCode::from(send(args).await)
}

async fn send(args: SendArgs) -> u8 {
    for (flag, path) in [("--file", &args.file), ("--body", &args.body)] {
        if !path.exists() {
            error!(flag = flag, path = %path.display(), "input_path_missing");
            return exit_code::FILE_ERROR;
        }
    }

    let config = Config::from_env();
    info!(
        credentials_file = %config.credentials_file.display(),
        token_file = %config.token_file.display(),
        max_attempts = config.max_attempts,
        backoff_base_ms = config.backoff_base_ms,
        "config_loaded"
    );

    let request = BatchRequest {
        file: args.file,
        subject: args.subject,
        body_path: args.body,
        limit: args.limit,
        dry_run: args.dry_run,
        in_place: args.inplace,
    };

    match run_batch(&request, &config, &TracingEvents).await {
        Ok(result) => {
            if let Some(path) = &result.saved_path {
                println!("File saved: {}", path.display());
            }
            print!("{}", result.summary);
            result.exit_code()
        }
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "run_failed");
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

/// Console layer on stderr, plus an optional JSON file layer.
fn init_logging(format: LogFormat, log_file: Option<&PathBuf>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console = match format {
        LogFormat::Text => fmt::layer().with_writer(std::io::stderr).boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let mut file_error = None;
    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(Mutex::new(file))
                    .boxed(),
            ),
            Err(e) => {
                file_error = Some((path.clone(), e));
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();

    if let Some((path, e)) = file_error {
        warn!(path = %path.display(), error = %e, "log_file_unavailable");
    }
}
