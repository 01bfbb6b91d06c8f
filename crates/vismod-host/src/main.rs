use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vismod_host::{
    DirectorySourceProvider, FsAssetService, HostConfig, HostError, ModuleSourceProvider,
    SessionManager,
};
use vismod_protocol::Track;
use vismod_sandbox::{InProcessIsolation, RuntimeConfig, WasmEngine};

#[derive(Debug, Parser)]
#[command(name = "vismod")]
#[command(about = "Run untrusted visual modules in an isolated sandbox")]
struct Cli {
    /// Directory holding `<ModuleType>.wat` sources.
    #[arg(long, env = "VISMOD_MODULES_DIR")]
    modules_dir: Option<PathBuf>,

    /// Directory served to modules as assets.
    #[arg(long, env = "VISMOD_ASSETS_DIR")]
    assets_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a track, run invocations against it, then tear it down.
    Run {
        /// Track JSON file.
        #[arg(long)]
        track: PathBuf,

        /// `instanceId:method` or `instanceId:method=<json>`; repeatable.
        #[arg(long)]
        invoke: Vec<Invocation>,

        /// Keep the track alive this long before tearing it down.
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
    },
    /// Print a module's metadata and callable methods.
    Introspect {
        /// Module type, e.g. `Glow`.
        module: String,
    },
}

#[derive(Debug, Clone)]
struct Invocation {
    instance_id: String,
    method: String,
    options: Value,
}

impl FromStr for Invocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (target, options) = match s.split_once('=') {
            Some((target, raw)) => (
                target,
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
            ),
            None => (s, Value::Null),
        };
        let (instance_id, method) = target
            .split_once(':')
            .filter(|(id, method)| !id.is_empty() && !method.is_empty())
            .ok_or_else(|| format!("expected instanceId:method, got '{target}'"))?;
        Ok(Self {
            instance_id: instance_id.to_string(),
            method: method.to_string(),
            options,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = e.kind().as_str(), "{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), HostError> {
    let mut config = HostConfig::from_env();
    if let Some(dir) = cli.modules_dir {
        config.modules_dir = dir;
    }
    if let Some(dir) = cli.assets_dir {
        config.assets_dir = dir;
    }
    tracing::info!(
        modules_dir = %config.modules_dir.display(),
        assets_dir = %config.assets_dir.display(),
        "starting vismod host"
    );

    let engine = Arc::new(WasmEngine::from_env());
    let isolation = Arc::new(InProcessIsolation::new(engine, RuntimeConfig::from_env()));
    let assets = Arc::new(FsAssetService::new(&config.assets_dir));
    let sources = DirectorySourceProvider::new(&config.modules_dir);
    let manager = SessionManager::new(isolation, assets, &config);

    let outcome = execute(&manager, &sources, cli.command).await;
    manager.destroy().await;
    outcome
}

async fn execute(
    manager: &SessionManager,
    sources: &DirectorySourceProvider,
    command: Command,
) -> Result<(), HostError> {
    match command {
        Command::Run {
            track,
            invoke,
            hold_ms,
        } => {
            let text = tokio::fs::read_to_string(&track).await?;
            let track: Track = serde_json::from_str(&text)?;
            manager.load_track(&track, sources).await?;

            for invocation in invoke {
                let result = manager
                    .invoke_on_instance(&invocation.instance_id, &invocation.method, invocation.options)
                    .await?;
                tracing::info!(
                    instance_id = %invocation.instance_id,
                    method = %invocation.method,
                    result = %result,
                    "invocation complete"
                );
            }

            if hold_ms > 0 {
                tokio::time::sleep(Duration::from_millis(hold_ms)).await;
            }
            manager.destroy_track().await
        }
        Command::Introspect { module } => {
            let source = sources.fetch(&module).await?;
            let reply = manager.introspect_module(&module, &source.text).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
    }
}
