use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use attachment_inspector::{
    server, validate::mime_from_path, Config, GeminiDescriber, IntakeController, Phase,
    UploadCandidate,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "attachment-inspector", version, about = "Inspect uploaded images and describe them with Gemini")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web UI (default)
    Serve {
        /// Listen address, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run one image through the pipeline and print the result
    Inspect {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("attachment_inspector=info,tower_http=info")),
        )
        .with(fmt::layer().with_target(true))
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            server::serve(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Inspect { file } => inspect(config, &file).await,
    }
}

async fn inspect(config: Config, path: &Path) -> Result<ExitCode> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open {}", path.display()))?;
    let len = file
        .metadata()
        .await
        .with_context(|| format!("cannot stat {}", path.display()))?
        .len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let describer = GeminiDescriber::from_config(&config.gemini);
    let controller = IntakeController::new(Arc::new(describer), config.intake);
    let candidate = UploadCandidate::new(name, mime_from_path(path), len, file);
    controller.submit(candidate).settled().await;

    let snapshot = controller.snapshot();
    if let Some(details) = &snapshot.file_details {
        println!("Name:       {}", details.name);
        println!("Size:       {}", details.size);
        println!("Type:       {}", details.mime_type);
        println!("Dimensions: {}", details.dimensions);
    }
    if let Some(analysis) = &snapshot.analysis {
        println!("\nAI Analysis ({}):\n{}", controller.model_name(), analysis);
    }
    if let Some(error) = &snapshot.error {
        eprintln!("Error: {error}");
    }

    Ok(match snapshot.phase {
        Phase::Ready => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
