//! # mcptester-cli
//!
//! Command-line interface for mcp-tester.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcptester_core::error::format_error_with_suggestion;
use mcptester_core::Config;

mod commands;
mod panel;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    /// Where saved-server changes are written
    pub config_path: PathBuf,
}

/// mcp-tester - connect to and exercise MCP servers
#[derive(Parser)]
#[command(name = "mcp-tester")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default locations
    #[arg(short, long, global = true, value_name = "FILE", env = "MCP_TESTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Saved server management
    Servers {
        #[command(subcommand)]
        action: ServersAction,
    },
    /// Connect to a saved server, run one operation and print the result
    Run(RunArgs),
    /// Bridge panel messages over stdin/stdout as JSON lines
    Panel,
    /// Check configuration and saved servers
    Doctor,
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ServersAction {
    /// List saved servers
    List,
    /// Show one saved server
    Show {
        /// Server name
        name: String,
    },
    /// Save a server
    Add(AddServerArgs),
    /// Remove a saved server
    Remove {
        /// Server name
        name: String,
    },
    /// Merge servers from an `mcpServers` JSON file
    Import {
        /// File to read
        file: PathBuf,
    },
    /// Write all saved servers to an `mcpServers` JSON file
    Export {
        /// File to write
        file: PathBuf,
    },
}

#[derive(Args)]
pub struct AddServerArgs {
    /// Server name
    pub name: String,
    /// Transport: stdio, sse or streamable-http
    #[arg(short = 't', long = "type", default_value = "stdio")]
    pub transport: String,
    /// Command to run (stdio)
    #[arg(long)]
    pub command: Option<String>,
    /// Command argument (stdio, repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
    pub args: Vec<String>,
    /// Server URL (sse, streamable-http)
    #[arg(long)]
    pub url: Option<String>,
    /// Environment variable KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = commands::parse_key_val)]
    pub env: Vec<(String, String)>,
    /// HTTP header NAME=VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE", value_parser = commands::parse_key_val)]
    pub headers: Vec<(String, String)>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Saved server name
    pub server: String,
    /// Print the request history after the operation
    #[arg(long)]
    pub history: bool,
    #[command(subcommand)]
    pub operation: Operation,
}

#[derive(Subcommand)]
pub enum Operation {
    /// Ping the server
    Ping,
    /// Show the server's capabilities and identity
    Capabilities,
    /// List tools
    Tools {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Call a tool
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// List resources
    Resources {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// List resource templates
    Templates {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Read a resource
    Read {
        uri: String,
    },
    /// Subscribe to resource updates
    Subscribe {
        uri: String,
    },
    /// Unsubscribe from resource updates
    Unsubscribe {
        uri: String,
    },
    /// List prompts
    Prompts {
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Render a prompt
    Prompt {
        /// Prompt name
        name: String,
        /// Prompt argument KEY=VALUE (repeatable)
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = commands::parse_key_val)]
        args: Vec<(String, String)>,
    },
    /// Ask for completions of a prompt or resource-template argument
    Complete {
        /// Complete an argument of this prompt
        #[arg(long, conflicts_with = "resource", required_unless_present = "resource")]
        prompt: Option<String>,
        /// Complete a variable of this resource template URI
        #[arg(long)]
        resource: Option<String>,
        /// Argument name
        argument: String,
        /// Partial value
        #[arg(default_value = "")]
        value: String,
    },
    /// Set the server's log level
    SetLevel {
        /// debug, info, notice, warning, error, critical, alert or emergency
        level: String,
    },
    /// Send any request
    Raw {
        /// JSON-RPC method
        method: String,
        /// Params as JSON
        #[arg(long)]
        params: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results only.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::config_file);

    match cli.command {
        Commands::Version => {
            println!("mcp-tester {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Doctor => {
            commands::doctor::run(cli.config.as_deref(), &config_path)?;
        }
        command => {
            let config = Config::load_validated(cli.config.as_deref())
                .map_err(|e| anyhow::anyhow!(format_error_with_suggestion(&e)))?;
            let mut ctx = AppContext {
                config,
                config_path,
            };

            match command {
                Commands::Servers { action } => commands::servers::handle(action, &mut ctx)?,
                Commands::Run(args) => commands::run::handle(args, &ctx).await?,
                Commands::Panel => panel::run(ctx).await?,
                Commands::Version | Commands::Doctor => {}
            }
        }
    }

    Ok(())
}
