//! PiTunnel Manager - list, start and stop PiTunnel tunnels

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pitunnel_cli::config::{ConfigManager, ManagerConfig};
use pitunnel_cli::menu::{
    describe_create, describe_create_timeout, describe_remove, render_registrations,
    render_tunnels, Menu,
};
use pitunnel_core::{
    Orchestrator, SessionContext, TerminationRequest, TunnelError, TunnelRequest,
};

/// PiTunnel Manager - manage running PiTunnel tunnels from the terminal
#[derive(Parser, Debug)]
#[command(name = "pitunnel-manager")]
#[command(about = "Manage PiTunnel tunnel processes", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// PiTunnel binary to run (overrides the config file)
    #[arg(long, global = true, env = "PITUNNEL_BIN")]
    tool: Option<String>,

    /// Seconds to wait for a single PiTunnel invocation
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List running tunnels
    List,
    /// Start a new tunnel
    Create {
        /// Local port to expose
        #[arg(short, long)]
        port: u16,
        /// Raw TCP tunnel instead of HTTP
        #[arg(long)]
        tcp: bool,
        /// Tunnel name (subdomain)
        #[arg(short, long)]
        name: Option<String>,
        /// Re-establish the tunnel on boot
        #[arg(long)]
        persist: bool,
    },
    /// Stop a running tunnel by PID
    Remove {
        /// Process ID from `list`
        pid: u32,
    },
    /// Show tunnels registered to start on boot
    Registrations,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the current configuration
    Show,
    /// Set the PiTunnel binary
    SetTool {
        /// Binary name or path
        tool: String,
    },
    /// Set the invocation timeout
    SetTimeout {
        /// Seconds
        secs: u64,
    },
    /// Restore default settings
    Reset,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config_manager = ConfigManager::new()?;

    if let Some(Commands::Config { command }) = &cli.command {
        return handle_config_command(&config_manager, command);
    }

    let mut config = config_manager.load()?;
    if let Some(tool) = cli.tool {
        config.tool_binary = tool;
    }
    if let Some(timeout) = cli.timeout {
        config.invocation_timeout_secs = timeout;
    }
    debug!("Effective configuration: {:?}", config);

    let orchestrator = Orchestrator::new(config.orchestrator_config());

    match cli.command {
        None => run_menu(orchestrator).await,
        Some(Commands::List) => handle_list(&orchestrator),
        Some(Commands::Create {
            port,
            tcp,
            name,
            persist,
        }) => handle_create(&orchestrator, port, !tcp, name, persist).await,
        Some(Commands::Remove { pid }) => handle_remove(&orchestrator, pid).await,
        Some(Commands::Registrations) => handle_registrations(&orchestrator).await,
        Some(Commands::Config { .. }) => Ok(()),
    }
}

async fn run_menu(orchestrator: Orchestrator) -> Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let interactive = stdout.is_terminal();

    Menu::new(orchestrator, stdin.lock(), stdout.lock())
        .with_clear_screen(interactive)
        .run()
        .await
        .context("Terminal I/O failed")
}

fn handle_list(orchestrator: &Orchestrator) -> Result<()> {
    let mut ctx = SessionContext::new();
    let tunnels = orchestrator.list_tunnels(&mut ctx)?;
    print!("{}", render_tunnels(&tunnels));
    Ok(())
}

async fn handle_create(
    orchestrator: &Orchestrator,
    port: u16,
    is_http: bool,
    name: Option<String>,
    persistent: bool,
) -> Result<()> {
    let request = TunnelRequest::new(port, is_http, name, persistent)?;
    println!("Running: {}", orchestrator.preview_create(&request).join(" "));

    let mut ctx = SessionContext::new();
    let result = orchestrator.create_tunnel(&mut ctx, &request).await;
    match result {
        Ok(outcome) => println!("{}", describe_create(&outcome)),
        Err(e @ TunnelError::InvocationTimedOut { .. }) => {
            let tunnels = orchestrator.list_tunnels(&mut ctx)?;
            let started = tunnels.iter().find(|tunnel| request.matches(tunnel));
            println!("{}", describe_create_timeout(&e, started));
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn handle_remove(orchestrator: &Orchestrator, pid: u32) -> Result<()> {
    let mut ctx = SessionContext::new();
    orchestrator.list_tunnels(&mut ctx)?;

    let outcome = orchestrator
        .remove_tunnel(&mut ctx, &TerminationRequest::new(pid))
        .await?;
    println!("{}", describe_remove(&outcome));
    Ok(())
}

async fn handle_registrations(orchestrator: &Orchestrator) -> Result<()> {
    let registrations = orchestrator.persistent_tunnels().await?;
    print!("{}", render_registrations(&registrations));
    Ok(())
}

fn handle_config_command(manager: &ConfigManager, command: &ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = manager.load()?;
            println!("Config file: {}", manager.path().display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommands::SetTool { tool } => {
            manager.set_tool(tool.clone())?;
            println!("✅ PiTunnel binary set to {}", tool);
            Ok(())
        }
        ConfigCommands::SetTimeout { secs } => {
            manager.set_timeout(*secs)?;
            println!("✅ Invocation timeout set to {}s", secs);
            Ok(())
        }
        ConfigCommands::Reset => {
            manager.reset()?;
            let defaults = ManagerConfig::default();
            println!(
                "✅ Configuration reset (tool: {}, timeout: {}s)",
                defaults.tool_binary, defaults.invocation_timeout_secs
            );
            Ok(())
        }
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    // stderr keeps log lines out of the menu and command output
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
