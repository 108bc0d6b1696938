// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use qr_scanner::constants::APP_DIR_NAME;
use std::path::PathBuf;
use std::sync::Mutex;

mod cli;

/// Log file used while the terminal UI owns the screen
const TERMINAL_LOG_FILE: &str = "terminal.log";

#[derive(Parser)]
#[command(name = "qr-scanner")]
#[command(about = "Scan QR codes with your camera")]
#[command(version)]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scanner in the terminal (default)
    Terminal {
        /// Camera index to use (from 'qr-scanner list')
        #[arg(short, long)]
        camera: Option<usize>,

        /// Keep scanning after a code was found
        #[arg(long)]
        continuous: bool,

        /// Scan an image file or directory instead of a camera
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// List available cameras
    List,

    /// Decode codes in image files
    Decode {
        /// Image files to decode
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Print one JSON object per code
        #[arg(long)]
        json: bool,
    },

    /// Scan from a camera without a UI and print the payloads
    Scan {
        /// Camera index to use (from 'qr-scanner list')
        #[arg(short, long)]
        camera: Option<usize>,

        /// Keep scanning and print every new code
        #[arg(long)]
        continuous: bool,

        /// Give up after this many seconds (0 = wait forever)
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Scan an image file or directory instead of a camera
        #[arg(long)]
        image: Option<PathBuf>,

        /// Print one JSON object per code
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=qr_scanner=debug, RUST_LOG=info
    let terminal_mode = matches!(cli.command, None | Some(Commands::Terminal { .. }));
    init_logging(terminal_mode);

    match cli.command {
        None => cli::run_terminal(None, false, None),
        Some(Commands::Terminal {
            camera,
            continuous,
            image,
        }) => cli::run_terminal(camera, continuous, image),
        Some(Commands::List) => cli::list_cameras(),
        Some(Commands::Decode { images, json }) => cli::decode_images(images, json),
        Some(Commands::Scan {
            camera,
            continuous,
            timeout,
            image,
            json,
        }) => cli::scan(cli::ScanArgs {
            camera,
            continuous,
            timeout,
            image,
            json,
        }),
    }
}

/// Initialize logging
///
/// The terminal UI draws on stdout, so its logs go to a file in the cache
/// directory instead of stderr.
fn init_logging(terminal_mode: bool) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    if terminal_mode && let Some(file) = open_terminal_log() {
        tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_level(true)
            .init();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

fn open_terminal_log() -> Option<std::fs::File> {
    let dir = dirs::cache_dir()?.join(APP_DIR_NAME);
    std::fs::create_dir_all(&dir).ok()?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(TERMINAL_LOG_FILE))
        .ok()
}
