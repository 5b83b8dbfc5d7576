use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use upqueue::config::Config;
use upqueue::utils::format_bytes;
use upqueue::{FileCandidate, HttpTransport, UploadManager, UploadStatus};

#[derive(Parser)]
#[command(name = "upqueue", version, about = "Upload files in bounded concurrent chunks")]
struct Cli {
    /// Path to the TOML config
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Remote directory, overrides `settings.target_path`
    #[arg(short, long)]
    target: Option<String>,

    /// Create this folder under the target and upload into it
    #[arg(short, long)]
    folder: Option<String>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    versioning: bool,

    #[arg(long)]
    notify: bool,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing::info!(endpoint = %config.endpoint, max_concurrent = config.max_concurrent, "configuration loaded");

    let mut settings = config.settings.clone();
    if let Some(target) = cli.target {
        settings.target_path = target;
    }
    if let Some(folder) = cli.folder {
        settings.create_folder = true;
        settings.folder_name = folder;
    }
    settings.overwrite_existing |= cli.overwrite;
    settings.enable_versioning |= cli.versioning;
    settings.notify_users |= cli.notify;

    let mut candidates = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let candidate = FileCandidate::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        candidates.push(candidate);
    }

    let transport = Arc::new(HttpTransport::from_config(&config));
    let handle = UploadManager::new(config.manager_config(), transport);

    let report = handle.manager.enqueue(candidates).await?;
    for rejection in &report.rejected {
        eprintln!("skipped {}: {}", rejection.name, rejection.error);
    }

    let items = if report.accepted.is_empty() {
        handle.manager.items().await?
    } else {
        handle.manager.run_batch(settings).await?
    };
    handle.shutdown().await?;

    let mut failed = 0;
    for item in &items {
        match item.status {
            UploadStatus::Completed => {
                let location = item.remote_result.as_ref().map(|r| r.location.as_str()).unwrap_or("");
                println!("ok      {} ({}) -> {}", item.name, format_bytes(item.size_bytes), location);
            }
            UploadStatus::Error => {
                failed += 1;
                println!("error   {}: {}", item.name, item.error_message.as_deref().unwrap_or("unknown error"));
            }
            status => println!("{:<7} {}", status.as_str(), item.name),
        }
    }

    Ok(if failed > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
