// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher  —  flash OpenShock hubs as they are plugged in
//
//  Background colour shows the status:
//    blue = waiting   yellow = flashing   green = done   red = error
//
//  USAGE
//  ─────
//    openshock-autoflasher --board Wemos-D1-Mini-ESP32
//    openshock-autoflasher -c beta -b Pishock-2023 --erase -p "rftxpin 15"
//    openshock-autoflasher --firmware-version 1.4.0 -b Seeed-Xiao-ESP32S3
//    openshock-autoflasher --list-boards -c develop
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use colored::Colorize;

use openshock_autoflasher::config::{self, CliOverrides, FileConfig};
use openshock_autoflasher::constants::BASE_URL;
use openshock_autoflasher::{AutoFlasher, Backends, Channel, FirmwareCatalog, Timing, UreqClient, VersionSource};

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "openshock-autoflasher",
    version = env!("CARGO_PKG_VERSION"),
    about   = "OpenShock Auto-Flasher — flashes hubs automatically when plugged in",
    long_about = None,
)]
struct Cli {
    /// Firmware channel  [default: stable]
    #[arg(long, short = 'c', value_enum)]
    channel: Option<Channel>,

    /// Flash this exact firmware version instead of the channel's latest
    #[arg(long, short = 'f')]
    firmware_version: Option<String>,

    /// Board type  (see --list-boards)
    #[arg(long, short = 'b')]
    board: Option<String>,

    /// Erase flash before flashing
    #[arg(long, short = 'e')]
    erase: bool,

    /// Disable auto-flash (just detect devices)
    #[arg(long, short = 'n')]
    no_auto: bool,

    /// Serial command to send after flashing  (repeatable, executed in order)
    #[arg(long = "post-flash", short = 'p', value_name = "CMD")]
    post_flash: Vec<String>,

    /// Firmware server
    #[arg(long, env = "OPENSHOCK_FIRMWARE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Directory for the temporary firmware image  [default: system temp dir]
    #[arg(long, value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// TOML file with defaults for any of the options above
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the boards available for the channel / version and exit
    #[arg(long)]
    list_boards: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    // Bare invocation is a request for help, not a usage error.
    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        std::process::exit(0);
    }

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = if cli.list_boards { cmd_list_boards(cli) } else { cmd_run(cli) };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_run(cli: Cli) -> anyhow::Result<()> {
    let file = load_file_config(cli.config.as_deref())?;

    if cli.board.is_none() && file.board.is_none() {
        Cli::command()
            .error(ErrorKind::MissingRequiredArgument, "the following required arguments were not provided:\n  --board <BOARD>")
            .exit();
    }

    let overrides = CliOverrides {
        channel:          cli.channel,
        firmware_version: cli.firmware_version,
        board:            cli.board,
        erase:            cli.erase,
        no_auto:          cli.no_auto,
        post_flash:       cli.post_flash,
        base_url:         cli.base_url,
        temp_dir:         cli.temp_dir,
    };
    let run_config = config::merge(overrides, file)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl+C handler")?;

    let mut flasher = AutoFlasher::new(run_config, Backends::system(), Timing::default());
    flasher.run(&shutdown)?;
    Ok(())
}

fn cmd_list_boards(cli: Cli) -> anyhow::Result<()> {
    let file = load_file_config(cli.config.as_deref())?;

    let channel = cli.channel.or(file.channel).unwrap_or_default();
    let source  = VersionSource::new(channel, cli.firmware_version.or(file.firmware_version));
    let base    = cli.base_url.or(file.base_url).unwrap_or_else(|| BASE_URL.to_owned());

    let mut catalog = FirmwareCatalog::new(&base, Box::new(UreqClient::new()));
    let boards = catalog
        .resolve_version(&source)
        .and_then(|v| catalog.list_boards(&v).map(|b| (v, b)));

    match boards {
        Ok((version, boards)) => {
            println!("{} {}", "Available boards".cyan().bold(), format!("[{} → {}]", source, version).dimmed());
            println!("{}", "─".repeat(60).dimmed());
            for b in boards {
                println!("  {}", b);
            }
            Ok(())
        }
        Err(e) => {
            println!("  (Unable to fetch boards list - check network connection)");
            Err(e.into())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_file_config(path: Option<&std::path::Path>) -> anyhow::Result<FileConfig> {
    match path {
        Some(p) => FileConfig::load(p).with_context(|| format!("Failed to load config {}", p.display())),
        None    => Ok(FileConfig::default()),
    }
}
