mod auth_commands;
mod tool_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "toolmesh", about = "toolmesh: one tool catalog over several MCP endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to toolmesh.toml (defaults to ./toolmesh.toml, then next to the binary).
    #[arg(long, global = true, env = "TOOLMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in through the browser and verify the primary endpoint.
    Login {
        /// Run the browser flow even if stored credentials are still valid.
        #[arg(long)]
        force: bool,
    },
    /// Remove stored tokens and client registration.
    Logout,
    /// Show credential state.
    Status,
    /// Connect to every endpoint and list the merged tool catalog.
    Tools {
        /// Print the catalog as JSON, schemas included.
        #[arg(long)]
        json: bool,
    },
    /// Invoke one tool and print its result as JSON.
    Call {
        /// Tool name as listed by `toolmesh tools`.
        name: String,
        /// Arguments as a JSON object.
        #[arg(default_value = "{}")]
        args: String,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays machine-readable.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "toolmesh starting");

    let config = toolmesh_mcp::discover_and_load(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { force } => auth_commands::login(&config, force).await,
        Commands::Logout => auth_commands::logout(&config),
        Commands::Status => auth_commands::status(&config),
        Commands::Tools { json } => tool_commands::list(&config, json).await,
        Commands::Call { name, args } => tool_commands::call(&config, &name, &args).await,
    }
}
