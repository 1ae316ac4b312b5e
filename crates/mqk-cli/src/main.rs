use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::plugins::{self, ListFilter};

#[derive(Parser)]
#[command(name = "mqk")]
#[command(about = "MiniQuantDesk plugin validation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate plugin submissions and inspect the verdict registry
    Plugins {
        #[command(subcommand)]
        cmd: PluginsCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> overrides...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Sandbox worker mode: one request on stdin, one result frame on stdout.
    #[command(hide = true)]
    SandboxWorker,
}

#[derive(Subcommand)]
enum PluginsCmd {
    /// Validate one submission (--kind + --id) or every submission (--all)
    /// and write verdicts to the registry.
    Validate {
        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<String>,

        /// Plugin kind (indicator | strategy)
        #[arg(long, requires = "id", conflicts_with = "all")]
        kind: Option<String>,

        /// Plugin id
        #[arg(long, requires = "kind", conflicts_with = "all")]
        id: Option<String>,

        /// Validate every submission under the submissions root
        #[arg(long, default_value_t = false)]
        all: bool,

        /// Re-run even when a verdict for identical content exists
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Submissions validated concurrently (each runs two workers)
        #[arg(long, default_value_t = 2)]
        jobs: usize,
    },

    /// Print every registry entry (fail-closed)
    Status {
        #[arg(long = "config")]
        config_paths: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print plugins currently VALID
    Active {
        #[arg(long = "config")]
        config_paths: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print plugins that are INVALID or whose verdict cannot be trusted
    Failed {
        #[arg(long = "config")]
        config_paths: Vec<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        // Runs under the sandbox rlimits: no runtime, no logging, stdout is
        // the result channel.
        Commands::SandboxWorker => std::process::exit(mqk_sandbox::worker_main()),

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mqk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Plugins { cmd } => {
            // Load .env.local if present (dev convenience).
            let _ = dotenvy::from_filename(".env.local");
            init_tracing();

            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("build tokio runtime failed")?;

            match cmd {
                PluginsCmd::Validate {
                    config_paths,
                    kind,
                    id,
                    all,
                    force,
                    jobs,
                } => {
                    let target = plugins::Target::from_args(kind.as_deref(), id.as_deref(), all)?;
                    let cfg = commands::load_engine_config(&config_paths)?;
                    rt.block_on(plugins::validate(&cfg, target, force, jobs))?;
                }
                PluginsCmd::Status { config_paths, json } => {
                    let cfg = commands::load_engine_config(&config_paths)?;
                    plugins::list(&cfg, ListFilter::All, json)?;
                }
                PluginsCmd::Active { config_paths, json } => {
                    let cfg = commands::load_engine_config(&config_paths)?;
                    plugins::list(&cfg, ListFilter::Active, json)?;
                }
                PluginsCmd::Failed { config_paths, json } => {
                    let cfg = commands::load_engine_config(&config_paths)?;
                    plugins::list(&cfg, ListFilter::Failed, json)?;
                }
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
