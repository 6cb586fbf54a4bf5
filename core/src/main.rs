use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sdfs_core::{
	cli::{
		deck_info, discover_deck_directory, get_brightness, get_current_page, inspect, make_dirs,
		set_brightness, set_current_page,
	},
	device::FakeDevice,
	DeckService,
};
use sdfs_fs_watcher::{FsWatcher, WatcherConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sdfs")]
#[command(about = "Drive a key deck from a directory tree", long_about = None)]
struct Cli {
	/// Deck serial number (optional when unambiguous)
	#[arg(short, long, global = true)]
	serial: Option<String>,

	/// Raise log verbosity (-v debug, -vv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	verbose: u8,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Watch a configuration directory and drive the deck
	Run {
		/// Configuration directory (the deck dir or its parent)
		directory: PathBuf,
	},

	/// Dump the parsed configuration as JSON
	Inspect { directory: PathBuf },

	/// Create the page/key directory skeleton
	MakeDirs {
		directory: PathBuf,

		/// Number of pages to scaffold
		#[arg(short, long, default_value = "1")]
		pages: u16,
	},

	/// Print the current backlight level
	GetBrightness { directory: PathBuf },

	/// Set the backlight level (0-100)
	SetBrightness { directory: PathBuf, level: u8 },

	/// Print the current page state
	GetCurrentPage { directory: PathBuf },

	/// Ask a running deck to change page (number, name or pseudo token)
	SetCurrentPage { directory: PathBuf, page: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();

	let default_level = match cli.verbose {
		0 => "info",
		1 => "debug",
		_ => "trace",
	};
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new(format!("sdfs={default_level}"))),
		)
		.init();

	match cli.command {
		Commands::Run { directory } => run(&directory, cli.serial.as_deref()).await,

		Commands::Inspect { directory } => {
			let (deck_dir, serial) = discover_deck_directory(&directory, cli.serial.as_deref())?;
			let info = deck_info(&deck_dir, &serial)?;
			let report = inspect(&deck_dir, &info)?;
			println!("{}", serde_json::to_string_pretty(&report)?);
			Ok(())
		}

		Commands::MakeDirs { directory, pages } => {
			let (deck_dir, serial) = match discover_deck_directory(&directory, cli.serial.as_deref())
			{
				Ok(found) => found,
				// Scaffolding may target a directory that does not exist yet.
				Err(_) => {
					let serial = cli
						.serial
						.clone()
						.context("pass --serial when scaffolding a fresh directory")?;
					let deck_dir = directory.join(&serial);
					std::fs::create_dir_all(&deck_dir)?;
					(deck_dir, serial)
				}
			};
			let info = deck_info(&deck_dir, &serial)?;
			make_dirs(&deck_dir, &info, pages)?;
			info!("Scaffolded {} page(s) under '{}'", pages, deck_dir.display());
			Ok(())
		}

		Commands::GetBrightness { directory } => {
			let (deck_dir, _) = discover_deck_directory(&directory, cli.serial.as_deref())?;
			println!("{}", get_brightness(&deck_dir)?);
			Ok(())
		}

		Commands::SetBrightness { directory, level } => {
			let (deck_dir, _) = discover_deck_directory(&directory, cli.serial.as_deref())?;
			set_brightness(&deck_dir, level)?;
			Ok(())
		}

		Commands::GetCurrentPage { directory } => {
			let (deck_dir, _) = discover_deck_directory(&directory, cli.serial.as_deref())?;
			println!("{}", get_current_page(&deck_dir)?.trim());
			Ok(())
		}

		Commands::SetCurrentPage { directory, page } => {
			let (deck_dir, _) = discover_deck_directory(&directory, cli.serial.as_deref())?;
			set_current_page(&deck_dir, &page)?;
			Ok(())
		}
	}
}

async fn run(directory: &std::path::Path, serial: Option<&str>) -> anyhow::Result<()> {
	let (deck_dir, serial) = discover_deck_directory(directory, serial)?;
	let info = deck_info(&deck_dir, &serial)?;
	info!(
		"[DECK {serial}] Ready to run in '{}' ({}x{} keys)",
		deck_dir.display(),
		info.rows,
		info.cols
	);

	// The USB transport is a separate concern; the bundled device is the
	// in-memory one, which still exercises the full pipeline.
	let (device, input_rx) = FakeDevice::new(info);
	let device = Arc::new(device);

	let (mut watcher, watcher_rx) =
		FsWatcher::new(WatcherConfig::default()).context("starting the filesystem watcher")?;
	watcher.watch(&deck_dir).context("watching the deck directory")?;

	let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
	tokio::spawn(async move {
		tokio::signal::ctrl_c().await.ok();
		info!("Interrupted, shutting down");
		shutdown_tx.send(()).ok();
	});

	let service = DeckService::new(Arc::clone(&device), deck_dir);
	service.run(watcher_rx, input_rx, shutdown_rx).await?;

	drop(watcher);
	Ok(())
}
