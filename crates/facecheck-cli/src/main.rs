use anyhow::{Context, Result};
use clap::Parser;
use facecheck_cli::{Config, DispatchError, Dispatcher, Response};
use facecheck_core::SelectionPolicy;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(
    name = "facecheck",
    version,
    about = "Extract and compare face embeddings; prints one JSON response to stdout"
)]
struct Cli {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Face to keep when an image has several: first, largest or confidence
    #[arg(long)]
    policy: Option<SelectionPolicy>,

    /// Distance tolerance for compare_faces
    #[arg(long)]
    tolerance: Option<f32>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// save_face, verify_face, verify_image or compare_faces
    operation: String,

    /// Image paths ("-" reads stdin) and embeddings (inline JSON or @file)
    operands: Vec<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                err.exit();
            }
            let _ = err.print();
            let reason = err.kind().as_str().unwrap_or("invalid command line");
            let response = Response::error(&DispatchError::InvalidArguments(reason.to_string()));
            return emit(&response);
        }
    };

    init_tracing(cli.verbose);
    emit(&run(cli))
}

fn emit(response: &Response) -> ExitCode {
    let (json, code) = response.render();
    println!("{json}");
    code
}

fn run(cli: Cli) -> Response {
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            let err = DispatchError::InvalidArguments(format!("{e:#}"));
            tracing::warn!(error = %err, "configuration rejected");
            return Response::error(&err);
        }
    };
    tracing::debug!(?config, operation = %cli.operation, "configuration resolved");
    Dispatcher::run(&config, &cli.operation, &cli.operands, cli.tolerance)
}

/// Defaults, file and environment, then command-line flags on top.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    if let Some(policy) = cli.policy {
        config.selection_policy = policy;
    }
    Ok(config)
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // Already initialised when embedded in tests.
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}
