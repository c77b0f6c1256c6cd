use anyhow::{bail, Context};
use bucket_mirror_lib::commands::sync::SyncOverrides;
use bucket_mirror_lib::commands::{credentials, file, log, sync, test};
use bucket_mirror_lib::core::{ProgressEvent, RunState};
use bucket_mirror_lib::logging::init_logging;
use bucket_mirror_lib::{dirs, AppState, FailurePolicy, ProviderKind};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "bucket-mirror")]
#[command(about = "Mirror a local media folder into an S3-compatible bucket")]
#[command(version)]
struct Cli {
    /// Directory holding config.json and app.log
    #[arg(long, env = "BUCKET_MIRROR_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Also log to the terminal
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SyncArgs {
    /// Local folder to mirror (defaults to syncFolder)
    #[arg(short, long)]
    folder: Option<PathBuf>,
    /// Target bucket (defaults to bucketName)
    #[arg(short, long)]
    bucket: Option<String>,
    /// Parallel uploads, 1-4
    #[arg(short, long)]
    concurrency: Option<usize>,
    /// Keep uploading remaining files after a failure
    #[arg(long)]
    continue_on_error: bool,
    /// Delete remote objects that no longer exist locally
    #[arg(long)]
    delete: bool,
    /// Print progress as JSON records
    #[arg(long)]
    json: bool,
}

impl SyncArgs {
    fn overrides(&self) -> SyncOverrides {
        SyncOverrides {
            folder: self.folder.clone(),
            bucket: self.bucket.clone(),
            max_concurrent_uploads: self.concurrency,
            failure_policy: self.continue_on_error.then_some(FailurePolicy::Continue),
            allow_delete: self.delete.then_some(true),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync and exit
    Sync(SyncArgs),
    /// Sync every refreshFrequencySeconds until interrupted
    Watch(SyncArgs),
    /// Show what a sync would upload or delete
    Analyze(SyncArgs),
    /// Check that the bucket is reachable with the current credentials
    Test {
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Print a presigned streaming URL for an object
    Url {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
        /// Expiry in seconds
        #[arg(short, long, default_value_t = file::DEFAULT_URL_EXPIRY_SECS)]
        expires: u64,
    },
    /// List folders and files one level under a path
    Ls {
        #[arg(default_value = "")]
        path: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Show object metadata
    Info {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Total size and object count under a prefix
    Stats {
        #[arg(default_value = "")]
        prefix: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Delete a single object
    Delete {
        key: String,
        #[arg(short, long)]
        bucket: Option<String>,
    },
    /// Check whether a key exists in the sync folder
    LocalExists { key: String },
    /// Delete a file from the sync folder
    DeleteLocal { key: String },
    /// Set the storage provider (primary or secondary)
    Provider { provider: ProviderKind },
    /// Prefer credentials from environment variables
    PreferEnv {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Show where credentials come from
    CredentialSource,
    /// Show or change the log configuration
    Log {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        max_size_mb: Option<u32>,
        #[arg(long)]
        level: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_sync(state: &AppState, args: &SyncArgs) -> anyhow::Result<()> {
    let handle = sync::start_sync(state, &args.overrides())?;
    let mut reader = handle.subscribe();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut last_percent = None;
    let mut stop_requested = false;
    loop {
        let event = tokio::select! {
            event = reader.recv() => event,
            _ = cancel.cancelled(), if !stop_requested => {
                eprintln!("Stopping after the current chunk...");
                stop_requested = true;
                handle.stop();
                continue;
            }
        };
        let Some(event) = event else { break };

        if args.json {
            println!("{}", serde_json::to_string(&event.to_record())?);
            continue;
        }
        match &event {
            ProgressEvent::Progress(update) => {
                let percent = update.percent as u32;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    println!(
                        "[{:>3}%] {}/{} {}",
                        percent, update.file_index, update.total_files, update.current_file
                    );
                }
            }
            other => println!("{}", other.to_record().message),
        }
    }

    let report = handle.wait().await?;
    if !args.json {
        println!(
            "{} file(s) uploaded, {} deleted, {} failed in {}s",
            report.files_uploaded,
            report.files_deleted,
            report.files_failed,
            report.duration().num_seconds()
        );
    }
    match report.state {
        RunState::Completed => Ok(()),
        RunState::Stopped => bail!("sync stopped"),
        _ => bail!("sync failed: {}", report.errors.join("; ")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_dir = cli.config_dir.clone().unwrap_or_else(dirs::app_config_dir);

    init_logging(&config_dir, cli.verbose);
    let state = AppState::new(&config_dir)
        .with_context(|| format!("failed to initialize {:?}", config_dir))?;

    let result = match cli.command {
        Commands::Sync(args) => run_sync(&state, &args).await,
        Commands::Watch(args) => {
            let shutdown = CancellationToken::new();
            let on_interrupt = shutdown.clone();
            let engine = state.engine.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    engine.stop_all();
                    on_interrupt.cancel();
                }
            });
            let rounds = sync::watch(&state, &args.overrides(), shutdown).await?;
            println!("stopped after {} round(s)", rounds);
            Ok(())
        }
        Commands::Analyze(args) => {
            let analysis = sync::analyze(&state, &args.overrides()).await?;
            print_json(&analysis)
        }
        Commands::Test { bucket } => {
            let result = test::test_connection(&state, bucket.as_deref()).await?;
            print_json(&result)?;
            if !result.success {
                bail!("{}", result.message);
            }
            Ok(())
        }
        Commands::Url {
            key,
            bucket,
            expires,
        } => match file::streaming_url(&state, bucket.as_deref(), &key, expires).await? {
            Some(url) => {
                println!("{}", url);
                Ok(())
            }
            None => bail!("could not generate a URL for {}", key),
        },
        Commands::Ls { path, bucket } => {
            let listing = file::list_files(&state, bucket.as_deref(), &path).await?;
            print_json(&listing)
        }
        Commands::Info { key, bucket } => {
            match file::object_info(&state, bucket.as_deref(), &key).await? {
                Some(info) => print_json(&info),
                None => bail!("object not found: {}", key),
            }
        }
        Commands::Stats { prefix, bucket } => {
            let stats = file::folder_stats(&state, bucket.as_deref(), &prefix).await?;
            print_json(&stats)
        }
        Commands::Delete { key, bucket } => {
            file::delete_object(&state, bucket.as_deref(), &key).await?;
            println!("deleted {}", key);
            Ok(())
        }
        Commands::LocalExists { key } => {
            println!("{}", file::check_local_file(&state, &key)?);
            Ok(())
        }
        Commands::DeleteLocal { key } => {
            file::delete_local_file(&state, &key)?;
            println!("deleted local {}", key);
            Ok(())
        }
        Commands::Provider { provider } => {
            credentials::set_provider(&state, provider)?;
            println!("storage provider set to {}", provider);
            Ok(())
        }
        Commands::PreferEnv { enabled } => {
            credentials::set_prefer_env_vars(&state, enabled)?;
            println!("preferEnvVars = {}", enabled);
            Ok(())
        }
        Commands::CredentialSource => print_json(&credentials::credential_source(&state)?),
        Commands::Log {
            enabled,
            max_size_mb,
            level,
        } => {
            let config = if enabled.is_none() && max_size_mb.is_none() && level.is_none() {
                log::get_log_config(&state)
            } else {
                log::set_log_config(&state, enabled, max_size_mb, level.as_deref())?
            };
            print_json(&config)
        }
    };

    state.cleanup();
    result
}
