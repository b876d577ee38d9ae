mod serve;

use std::path::PathBuf;

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    tracing::error,
    tracing_subscriber::EnvFilter,
};

/// bulkwa - WhatsApp sessions and paced bulk campaigns behind an HTTP API
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Cli {
    /// Path to a config file (TOML or YAML)
    #[arg(short, long, global = true, env = "BULKWA_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(flatten)]
    serve: serve::ServeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine (default)
    Serve(serve::ServeArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print where the config file is looked up
    Path,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = bulkwa_config::load(cli.config.as_deref())?;
    match cli.command {
        None => serve::run(config, cli.serve).await,
        Some(Commands::Serve(args)) => serve::run(config, args).await,
        Some(Commands::Config { action }) => {
            match action {
                ConfigAction::Show => print!("{}", toml::to_string_pretty(&config)?),
                ConfigAction::Path => {
                    let path = cli
                        .config
                        .or_else(bulkwa_config::default_config_path)
                        .unwrap_or_else(|| bulkwa_config::config_dir().join("bulkwa.toml"));
                    println!("{}", path.display());
                },
            }
            Ok(())
        },
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
}
