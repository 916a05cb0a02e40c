use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use eosbridge_core::config::{BridgeConfig, LaunchArgs};
use eosbridge_core::logging::{LogError, LogFormat, init_logging};
use eosbridge_core::sdk_guard::SdkGuard;
use eosbridge_core::simulator::{SimulatedSdk, SimulatorConfig};
use eosbridge_core::ContextEnv;
use eosbridge_lua::{LuaHost, PluginSettings, install_plugin};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "eosbridge",
    version,
    about = "Run Lua scripts against plugin.eos on a simulated SDK"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Lua script with `plugin.eos` available to `require`.
    Run(RunArgs),

    /// Validate a configuration file.
    CheckConfig {
        /// Path to the TOML configuration.
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Lua script to execute.
    script: PathBuf,

    /// TOML configuration file.
    #[arg(long, env = "EOSBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of frames to pump after the script has run.
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Log level filter; overrides the configuration file.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (pretty or json); overrides the configuration file.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// TOML describing the simulated SDK (account, offers, result codes).
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Launcher arguments, e.g. `-- -AUTH_TYPE=exchangecode -AUTH_PASSWORD=<code>`.
    #[arg(last = true, allow_hyphen_values = true)]
    launch_args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run(args),
        Command::CheckConfig { path } => check_config(&path),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(BridgeConfig::default()),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<SimulatorConfig> {
    let Some(path) = path else {
        return Ok(SimulatorConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading catalog {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing catalog {}", path.display()))
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    match init_logging(&config.logging) {
        Ok(()) | Err(LogError::AlreadyInitialized) => {}
        Err(err) => return Err(err).context("initializing logging"),
    }

    let sdk = SimulatedSdk::new(load_catalog(args.catalog.as_deref())?);
    let env = ContextEnv::with_global_registry(SdkGuard::new(sdk.clone()));
    let host = LuaHost::new();
    let settings = PluginSettings {
        config,
        launch_args: LaunchArgs::parse(&args.launch_args),
    };
    install_plugin(&host, env, settings).context("installing plugin.eos")?;

    host.exec_file(&args.script)?;

    let mut pumped = 0u32;
    for _ in 0..args.frames {
        if host.enter_frame() {
            pumped += 1;
        }
    }
    host.close();

    let stats = sdk.stats();
    info!(
        frames = pumped,
        callbacks = stats.callbacks_fired,
        "script finished"
    );
    println!(
        "{}: {pumped} frames, {} SDK callbacks",
        args.script.display(),
        stats.callbacks_fired
    );
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    println!(
        "{}: ok ({} {})",
        path.display(),
        config.sdk.product_name,
        config.sdk.product_version
    );
    Ok(())
}
