// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use cinder_config::{BootOrder, EmuConfig};
use cinder_core::host::{IdleExecutor, ImageStorage};
use cinder_core::memory::{SDRAM_SIZE_DEFAULT, SDRAM_SIZE_LARGE};
use cinder_core::{Backends, Emulator, HardwareSettings, PRODUCT_DEFAULT};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BootOrderArg {
    Default,
    Boot2,
    Diags,
}

impl From<BootOrderArg> for BootOrder {
    fn from(v: BootOrderArg) -> Self {
        match v {
            BootOrderArg::Default => BootOrder::Default,
            BootOrderArg::Boot2 => BootOrder::Boot2,
            BootOrderArg::Diags => BootOrder::Diags,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "cinder", author, version, long_about = None)]
#[command(about = "Cinder handheld emulation core")]
struct Args {
    /// Path to a session config (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage (flash) image to boot from
    #[arg(short, long)]
    flash: Option<PathBuf>,

    /// Boot ROM image, loaded into the first 512 KiB
    #[arg(short, long)]
    boot_rom: Option<PathBuf>,

    /// Resume from a snapshot instead of cold booting
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Write a snapshot to this path when the run ends
    #[arg(long)]
    suspend_to: Option<PathBuf>,

    /// GDB remote protocol listener port (0 disables)
    #[arg(long)]
    gdb_port: Option<u16>,

    /// Proprietary remote-debug listener port (0 disables)
    #[arg(long)]
    rdbg_port: Option<u16>,

    /// Which image the boot loader chain should prefer
    #[arg(long, value_enum)]
    boot_order: Option<BootOrderArg>,

    /// Run unpaced, as fast as the host allows
    #[arg(long)]
    turbo: bool,

    /// Emulate the larger SDRAM fitment
    #[arg(long)]
    large_sdram: bool,

    /// Enter the debugger before the first instruction
    #[arg(long)]
    debug_on_start: bool,

    /// Enter the debugger on warnings and faults
    #[arg(long)]
    debug_on_warn: bool,

    /// Enable debug-level log output
    #[arg(short, long)]
    trace: bool,

    /// Stop the execution loop after this many milliseconds
    #[arg(long)]
    run_for_ms: Option<u64>,
}

/// Config file first, command line on top.
fn merged_config(args: &Args) -> anyhow::Result<EmuConfig> {
    let mut config = match &args.config {
        Some(path) => EmuConfig::from_file(path)?,
        None => EmuConfig::default(),
    };
    if let Some(path) = &args.flash {
        config.storage_image = Some(path.clone());
    }
    if let Some(path) = &args.boot_rom {
        config.boot_rom = Some(path.clone());
    }
    if let Some(port) = args.gdb_port {
        config.gdb_port = port;
    }
    if let Some(port) = args.rdbg_port {
        config.rdbg_port = port;
    }
    if let Some(order) = args.boot_order {
        config.boot_order = order.into();
    }
    config.turbo |= args.turbo;
    config.large_sdram |= args.large_sdram;
    config.debug_on_start |= args.debug_on_start;
    config.debug_on_warn |= args.debug_on_warn;
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    info!("Starting Cinder");

    let config = merged_config(&args)?;
    let settings = HardwareSettings {
        sdram_size: if config.large_sdram {
            SDRAM_SIZE_LARGE
        } else {
            SDRAM_SIZE_DEFAULT
        },
        product: PRODUCT_DEFAULT,
        features: 0,
    };
    let backends = Backends {
        executor: Box::new(IdleExecutor::default()),
        storage: Box::new(ImageStorage::with_settings(settings)),
        ..Default::default()
    };
    let mut emu = Emulator::new(config, backends);

    emu.start(args.resume.as_deref())?;

    if let Some(ms) = args.run_for_ms {
        let signal = emu.exit_signal();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(ms));
            signal.request();
        });
    }

    // A resume continues exactly where the snapshot left off; a cold boot
    // starts from power-on state.
    emu.run(args.resume.is_none());

    info!(
        "Execution loop finished, last measured speed {:.1}%",
        emu.speed() * 100.0
    );

    if let Some(path) = &args.suspend_to {
        emu.suspend(path)?;
        info!("Snapshot written to {}", path.display());
    }

    emu.cleanup();
    Ok(())
}
