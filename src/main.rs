//! acme-converge
//!
//! Converges acme.sh and the certificates it manages toward the state
//! described in the configuration file. Results are printed to stdout as
//! JSON; logs go to stderr or to files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use acme_converge::config::{self, AppConfig, LogFormat};
use acme_converge::models::{CertificateAction, InstallContext, ToolRequest};
use acme_converge::services::{
    decide, AcmeShClient, CertificateOperator, CertificateReconciler, HostSystem,
    TokioProcessRunner, ToolReconciler,
};
use acme_converge::utils::{ConvergeError, ErrorResponse};

#[derive(Parser)]
#[command(name = "acme-converge", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Configuration file
    #[arg(long, short, global = true, env = "ACME_CONVERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Report what would change without changing anything
    #[arg(long = "test", global = true)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Make sure acme.sh is installed
    Install {
        /// Reinstall even if acme.sh is present
        #[arg(long)]
        force: bool,
        /// Upgrade an existing installation
        #[arg(long)]
        upgrade: bool,
        /// Owning user
        #[arg(long)]
        user: Option<String>,
        /// Account email
        #[arg(long)]
        email: Option<String>,
        /// Install to /opt/acme.sh
        #[arg(long)]
        system: bool,
        /// Custom acme.sh home
        #[arg(long)]
        home: Option<PathBuf>,
    },

    /// Register the ACME account
    Register {
        #[arg(long)]
        email: Option<String>,
        /// ACME server (letsencrypt, zerossl, or a directory URL)
        #[arg(long)]
        server: Option<String>,
        #[arg(long)]
        user: Option<String>,
    },

    /// Converge every configured certificate
    Apply {
        /// Only converge this common name
        #[arg(long)]
        only: Option<String>,
        /// Reissue regardless of renewal time
        #[arg(long)]
        force: bool,
    },

    /// Show the state of a configured certificate
    Status {
        common_name: String,
    },
}

/// Per-certificate entry of `apply` output
#[derive(Serialize)]
#[serde(untagged)]
enum ApplyEntry {
    Result(acme_converge::models::ConvergenceResult),
    Error {
        name: String,
        #[serde(flatten)]
        error: ErrorResponse,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration first (before logging, so we know log format)
    let mut config =
        AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.dry_run {
        config.dry_run = true;
    }

    // The guard must be kept alive for the duration of the program
    let _guard = init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dry_run = config.dry_run,
        "Starting acme-converge"
    );

    let runner = Arc::new(TokioProcessRunner::new(config.acme_sh.timeout()));
    let system = Arc::new(HostSystem::new());

    let dry_run = config.dry_run;
    match args.command {
        Command::Install {
            force,
            upgrade,
            user,
            email,
            system: system_wide,
            home,
        } => {
            let mut acme_config = config.acme_sh.clone();
            if let Some(user) = user {
                acme_config.user = user;
            }
            if let Some(email) = email {
                acme_config.email = email;
            }
            if system_wide {
                acme_config.system = true;
            }
            if home.is_some() {
                acme_config.home = home;
            }

            let client = Arc::new(AcmeShClient::new(acme_config, runner, system));
            let request = ToolRequest {
                context: client.install_context(),
                force,
                upgrade,
            };

            match ToolReconciler::new(client).reconcile(&request, dry_run).await {
                Ok(report) => print_json(&report),
                Err(err) => print_error(&err),
            }
        }

        Command::Register {
            email,
            server,
            user,
        } => {
            let client = AcmeShClient::new(config.acme_sh.clone(), runner, system);
            let mut context: InstallContext = client.install_context();
            if let Some(email) = email {
                context.email = email;
            }
            if let Some(user) = user {
                context.user = user;
            }

            if dry_run {
                print_json(&serde_json::json!({
                    "name": context.user,
                    "result": "indeterminate",
                    "message": format!("ACME account for {} would be registered", context.email),
                }))
            } else {
                match client.register_account(&context, server.as_deref()).await {
                    Ok(registration) => print_json(&registration),
                    Err(err) => print_error(&err),
                }
            }
        }

        Command::Apply { only, force } => {
            let client = Arc::new(AcmeShClient::new(config.acme_sh.clone(), runner, system));
            let reconciler = CertificateReconciler::new(client);

            let specs: Vec<_> = config
                .certificates
                .iter()
                .filter(|spec| only.as_deref().map_or(true, |cn| spec.common_name == cn))
                .cloned()
                .collect();
            if let Some(cn) = &only {
                if specs.is_empty() {
                    anyhow::bail!("No certificate named {} in the configuration", cn);
                }
            }

            let mut failed = false;
            let mut entries = Vec::with_capacity(specs.len());
            for mut spec in specs {
                spec.force |= force;
                debug!(domain = %spec.common_name, "Converging certificate");
                match reconciler.converge(&spec, dry_run).await {
                    Ok(result) => {
                        failed |= result.is_failure();
                        entries.push(ApplyEntry::Result(result));
                    }
                    Err(err) => {
                        failed = true;
                        entries.push(ApplyEntry::Error {
                            name: spec.common_name.clone(),
                            error: ErrorResponse::from(&err),
                        });
                    }
                }
            }

            print_json(&entries)?;
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Status { common_name } => {
            let spec = config
                .certificate(&common_name)
                .with_context(|| format!("No certificate named {} in the configuration", common_name))?;
            let client = AcmeShClient::new(config.acme_sh.clone(), runner, system);

            let status = match client.locate_binary(&spec.user) {
                Ok(_) => client.get_status(&spec.target()).await,
                Err(err) => Err(err),
            };
            match status {
                Ok(status) => {
                    let action: CertificateAction = decide(spec, &status, chrono::Utc::now());
                    print_json(&serde_json::json!({
                        "name": common_name,
                        "status": status,
                        "action": action,
                    }))
                }
                Err(err) => print_error(&err),
            }
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(ExitCode::SUCCESS)
}

fn print_error(err: &ConvergeError) -> Result<ExitCode> {
    print_json(&ErrorResponse::from(err))?;
    Ok(ExitCode::FAILURE)
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Initialize the logging/tracing infrastructure
///
/// Console output goes to stderr; stdout carries the JSON results.
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let log_config = &config.logging;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(log_config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(fmt_layer(&log_config.format, std::io::stderr, true));
    }
    if matches!(log_config.target, LogTarget::File | LogTarget::Both) {
        let (writer, file_guard) = create_file_writer(log_config);
        layers.push(fmt_layer(&log_config.format, writer, false));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    guard
}

/// One formatting layer writing to `writer`
fn fmt_layer<W>(format: &LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, Layer};

    let layer = fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Json => layer.json().with_target(true).boxed(),
        LogFormat::Compact => layer.compact().with_target(false).boxed(),
        LogFormat::Pretty => layer
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}
