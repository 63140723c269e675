use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{fmt, EnvFilter};

use lifehook_core::{HookSet, InstanceId, PluginRegistry};

/// Package version, followed by the build stamp when one was recorded.
fn version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        stamped_version(env!("CARGO_PKG_VERSION"), option_env!("LIFEHOOK_BUILD"))
    })
}

fn stamped_version(package: &str, build: Option<&str>) -> String {
    match build.map(str::trim) {
        Some(build) if !build.is_empty() => format!("{package}+{build}"),
        _ => package.to_owned(),
    }
}

/// Lifecycle webhooks: check hook configuration and fire test events.
#[derive(Parser)]
#[command(name = "lifehook", version = version(), about)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum EventArg {
    Spawned,
    Stopped,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, merge and prepare hook declarations, then print a summary.
    Check {
        /// Config files, merged in the order given.
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,
    },
    /// Send one synthetic lifecycle event through the configured hooks.
    Fire {
        /// Config files, merged in the order given.
        #[arg(short, long = "config", required = true)]
        configs: Vec<PathBuf>,

        /// Service label of the event.
        #[arg(short, long)]
        label: String,

        #[arg(short, long, value_enum, default_value_t = EventArg::Spawned)]
        event: EventArg,

        /// Instance identifier (random when omitted).
        #[arg(long)]
        id: Option<String>,

        /// Failure message attached to a `stopped` event.
        #[arg(long)]
        error: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let registry = PluginRegistry::builtin();

    match cli.command {
        Commands::Check { configs } => {
            let Some(hooks) = load(&registry, &configs) else {
                return ExitCode::FAILURE;
            };
            print_summary(&hooks);
            ExitCode::SUCCESS
        }
        Commands::Fire {
            configs,
            label,
            event,
            id,
            error,
        } => {
            let Some(hooks) = load(&registry, &configs) else {
                return ExitCode::FAILURE;
            };
            let instance =
                InstanceId::new(id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));

            match event {
                EventArg::Spawned => {
                    if error.is_some() {
                        tracing::warn!("--error is ignored for spawned events");
                    }
                    hooks.spawned(&instance, &label).await;
                }
                EventArg::Stopped => {
                    let failure = error.map(std::io::Error::other);
                    hooks
                        .stopped(
                            &instance,
                            &label,
                            failure.as_ref().map(|e| e as &(dyn std::error::Error + Send + Sync)),
                        )
                        .await;
                }
            }
            tracing::info!(%instance, %label, "Event fired");
            ExitCode::SUCCESS
        }
    }
}

fn load(registry: &PluginRegistry, configs: &[PathBuf]) -> Option<HookSet> {
    match registry.load(configs) {
        Ok(hooks) => {
            tracing::info!(files = configs.len(), hooks = hooks.len(), "Loaded hook configuration");
            Some(hooks)
        }
        Err(e) => {
            tracing::error!("{}", e);
            None
        }
    }
}

fn print_summary(hooks: &HookSet) {
    println!(
        "{} {}",
        style("lifehook").bold(),
        style(version()).dim()
    );
    if hooks.is_empty() {
        println!("  {}", style("no hooks declared").dim());
        return;
    }
    for (name, hook) in hooks.iter() {
        println!("  {} {}", style(format!("{name:<6}")).green().bold(), hook.describe());
    }
}

fn init_tracing(log_format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        LogFormat::Json => {
            fmt().with_env_filter(filter).json().init();
        }
        LogFormat::Pretty => {
            fmt().with_env_filter(filter).init();
        }
    }
}
