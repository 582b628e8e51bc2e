use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use devmirror::config::{self, Config};
use devmirror::device::MirrorOptions;
use devmirror::protocol::{ControlRequest, Reply};
use devmirror::service::ControlService;
use devmirror::{client, daemon};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "devmirror", version, about = "Mirror and control attached Android and iOS devices")]
struct Cli {
    /// Config file (default: ~/.devmirror/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print raw JSON replies
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control daemon in the foreground
    Daemon {
        /// Port to listen on (loopback only)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List connected and known devices
    Devices,
    /// Re-scan for devices
    Refresh,
    /// Start mirroring a device
    Connect {
        device_id: String,
        #[command(flatten)]
        options: ConnectArgs,
    },
    /// Stop mirroring a device
    Disconnect { device_id: String },
    /// Send an action (home, back, recent, volume_up, screenshot, mirror_screen_off, ...)
    Action {
        device_id: String,
        action: String,
        /// JSON payload, e.g. '{"keycode": "KEYCODE_CAMERA"}' or '{"filename": "login"}'
        #[arg(long)]
        payload: Option<String>,
    },
    /// Show connection and mirroring state of a device
    Status { device_id: String },
    /// Rename a device
    Alias { device_id: String, alias: String },
    /// List running mirroring sessions
    Sessions,
    /// Check which platform tools can be found
    Deps,
    /// Write the effective configuration to the config file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct ConnectArgs {
    /// Forward device audio
    #[arg(long)]
    audio: bool,
    /// Let the device sleep while mirrored
    #[arg(long)]
    allow_sleep: bool,
    #[arg(long)]
    show_touches: bool,
    #[arg(long)]
    turn_screen_off: bool,
    #[arg(long)]
    fullscreen: bool,
    /// Keep the mirror window above other windows
    #[arg(long)]
    always_on_top: bool,
    #[arg(long)]
    max_size: Option<u32>,
    #[arg(long)]
    max_fps: Option<u32>,
    #[arg(long)]
    bit_rate: Option<String>,
    /// Record the mirrored screen to a file
    #[arg(long)]
    record: Option<PathBuf>,
    /// Preferred stream port (iOS)
    #[arg(long)]
    port: Option<u16>,
    /// Network interface for the stream (iOS)
    #[arg(long)]
    interface: Option<String>,
    #[arg(long)]
    verbose: bool,
}

impl From<ConnectArgs> for MirrorOptions {
    fn from(args: ConnectArgs) -> Self {
        MirrorOptions {
            no_audio: !args.audio,
            stay_awake: !args.allow_sleep,
            show_touches: args.show_touches,
            turn_screen_off: args.turn_screen_off,
            fullscreen: args.fullscreen,
            always_on_top: args.always_on_top,
            max_size: args.max_size,
            max_fps: args.max_fps,
            bit_rate: args.bit_rate,
            record: args.record,
            port: args.port,
            interface: args.interface,
            stream: true,
            verbose: args.verbose,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devmirror=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn init_config(path: PathBuf, config: &Config, force: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if path.exists() && !force {
        return Err(format!("{} exists; pass --force to overwrite", path.display()).into());
    }
    config::save_config(&path, config)?;
    println!("{} Wrote {}", "✓".green(), path.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "✗".red(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config_path = cli.config.unwrap_or_else(config::config_file);
    let config = config::load_config(&config_path).unwrap_or_default();

    let request = match cli.command {
        Command::Daemon { port } => {
            if let Some(pid) = daemon::get_pid() {
                return Err(format!("daemon already running (pid {})", pid).into());
            }
            let port = port.unwrap_or(config.daemon_port);
            daemon::run(config, port).await?;
            return Ok(());
        }
        Command::Devices => ControlRequest::Devices,
        Command::Refresh => ControlRequest::Refresh,
        Command::Connect { device_id, options } => ControlRequest::Connect {
            device_id,
            options: options.into(),
        },
        Command::Disconnect { device_id } => ControlRequest::Disconnect { device_id },
        Command::Action {
            device_id,
            action,
            payload,
        } => ControlRequest::Action {
            device_id,
            action,
            payload: payload.as_deref().map(parse_payload).transpose()?,
        },
        Command::Status { device_id } => ControlRequest::Status { device_id },
        Command::Alias { device_id, alias } => ControlRequest::Alias { device_id, alias },
        Command::Sessions => ControlRequest::Sessions,
        Command::Deps => ControlRequest::Dependencies,
        Command::InitConfig { force } => return init_config(config_path, &config, force),
    };

    let listing = matches!(request, ControlRequest::Devices);
    let deps = matches!(request, ControlRequest::Dependencies);
    let reply = match client::daemon_port() {
        Some(port) => client::send(port, &request).await?,
        // Tool checks do not need a running daemon.
        None if deps => ControlService::from_config(&config).handle(request).await,
        None => return Err("daemon not running; start it with `devmirror daemon`".into()),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reply)?);
    } else if listing && reply.success {
        print_devices(&reply);
    } else if deps {
        print_dependencies(&reply);
    } else {
        print_reply(&reply);
    }

    if reply.success {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// A bare word is taken as a keycode for convenience.
fn parse_payload(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw).or_else(|_| Ok(Value::String(raw.to_string())))
}

fn print_reply(reply: &Reply) {
    if reply.success {
        println!("{} {}", "✓".green(), reply.message);
        if let Some(data) = &reply.data {
            if let Some(url) = data.get("stream_url").and_then(Value::as_str) {
                println!("  Stream: {}", url.cyan());
            }
            if let Some(path) = data.get("artifact").and_then(Value::as_str) {
                println!("  File: {}", path.dimmed());
            }
        }
    } else {
        let kind = reply.error_kind.as_deref().unwrap_or("error");
        eprintln!("{} {} {}", "✗".red(), reply.message, format!("[{}]", kind).dimmed());
    }
}

fn print_dependencies(reply: &Reply) {
    let platforms = reply
        .data
        .as_ref()
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for platform in platforms {
        let name = platform.get("platform").and_then(Value::as_str).unwrap_or("");
        let ready = platform.get("ready").and_then(Value::as_bool).unwrap_or(false);
        let marker = if ready { "✓".green() } else { "✗".red() };
        println!("{} {}", marker, name.bold());

        let tools = platform.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
        for tool in tools {
            let tool_name = tool.get("tool").and_then(Value::as_str).unwrap_or("");
            let optional = tool.get("optional").and_then(Value::as_bool).unwrap_or(false);
            match tool.get("path").and_then(Value::as_str) {
                Some(path) => println!("    {:<20} {}", tool_name, path.dimmed()),
                None if optional => println!("    {:<20} {}", tool_name, "not found (optional)".yellow()),
                None => println!("    {:<20} {}", tool_name, "not found".red()),
            }
        }
    }
}

fn print_devices(reply: &Reply) {
    let devices = reply
        .data
        .as_ref()
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if devices.is_empty() {
        println!("{} No devices", "○".dimmed());
        return;
    }

    for device in devices {
        let field = |key: &str| device.get(key).and_then(Value::as_str).unwrap_or("").to_string();
        let connected = device.get("connected").and_then(Value::as_bool).unwrap_or(false);
        let active = device.get("active").and_then(Value::as_bool).unwrap_or(false);

        let marker = if connected { "●".green() } else { "○".dimmed() };
        let state = if active { "mirroring".cyan() } else { "".normal() };
        println!(
            "{} {:<16} {:<28} {:<8} {} {}",
            marker,
            field("alias"),
            field("name"),
            field("platform"),
            field("id").dimmed(),
            state
        );
    }
}
