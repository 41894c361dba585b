//! # nfe CLI entry point
//!
//! Parses command-line arguments, sets up logging and dispatches to the
//! subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use nfe_cli::access_key::{run_access_key, AccessKeyArgs};
use nfe_cli::cert::{run_cert_info, CertInfoArgs};
use nfe_cli::document::{run_build, run_sign, run_verify, BuildArgs, SignArgs, VerifyArgs};
use nfe_cli::remote::{
    run_consult, run_status, run_sync, run_transmit, ConsultArgs, RemoteContext, StatusArgs,
    SyncArgs, TransmitArgs,
};

/// NF-e stack CLI
///
/// Builds, signs and transmits electronic fiscal documents, and pulls the
/// documents the authorities distribute to a tenant.
#[derive(Parser, Debug)]
#[command(name = "nfe", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log line format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Directory holding credentials, documents, records and cursors.
    #[arg(long, env = "NFE_DATA_DIR", default_value = ".nfe", global = true)]
    data_dir: PathBuf,

    /// YAML tenant file.
    #[arg(long = "tenants", env = "NFE_TENANTS_FILE", global = true)]
    tenants_file: Option<PathBuf>,

    /// Talk to the production environment instead of homologation.
    #[arg(long, global = true)]
    production: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compose or check a 44-digit access key.
    AccessKey(AccessKeyArgs),

    /// Render a fiscal document JSON into unsigned NF-e XML.
    Build(BuildArgs),

    /// Sign an XML document with an A1 certificate.
    Sign(SignArgs),

    /// Verify the enveloped signature of a document.
    Verify(VerifyArgs),

    /// Show the metadata of an A1 certificate.
    CertInfo(CertInfoArgs),

    /// Build, sign and submit a document for a tenant.
    Transmit(TransmitArgs),

    /// Consult a receipt or the protocol of a document.
    Consult(ConsultArgs),

    /// Pull distributed documents for a tenant.
    Sync(SyncArgs),

    /// Query the status of the authorization service.
    Status(StatusArgs),
}

fn init_tracing(verbose: u8, format: LogFormat) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "nfe CLI starting");

    let ctx = RemoteContext {
        data_dir: cli.data_dir,
        tenants_file: cli.tenants_file,
        production: cli.production,
    };

    let result = match cli.command {
        Commands::AccessKey(args) => run_access_key(&args),
        Commands::Build(args) => run_build(&args),
        Commands::Sign(args) => run_sign(&args),
        Commands::Verify(args) => run_verify(&args),
        Commands::CertInfo(args) => run_cert_info(&args),
        Commands::Transmit(args) => match ctx.open() {
            Ok(stack) => run_transmit(&args, &ctx, stack).await,
            Err(e) => Err(e),
        },
        Commands::Consult(args) => match ctx.open() {
            Ok(stack) => run_consult(&args, &ctx, stack).await,
            Err(e) => Err(e),
        },
        Commands::Sync(args) => match ctx.open() {
            Ok(stack) => run_sync(&args, &ctx, stack).await,
            Err(e) => Err(e),
        },
        Commands::Status(args) => match ctx.open() {
            Ok(stack) => run_status(&args, &ctx, stack).await,
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
