pub mod cpu;
pub mod emu;
pub mod host;
pub mod memory;
pub mod sched;
pub mod snapshot;
pub mod throttle;

use std::path::Path;

use cinder_config::BootOrder;

use crate::cpu::{CpuState, ExceptionVector};
use crate::memory::Memory;
use crate::sched::Scheduler;
use crate::snapshot::{RegionReader, SnapshotWriter};


#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Unrecoverable CPU fault raised during dispatch. Funnels into the
    /// execution loop's recovery point, never out of it.
    #[error("{message}")]
    Fault { pc: u32, message: String },
}

impl CoreError {
    pub fn fault(pc: u32, message: impl Into<String>) -> Self {
        CoreError::Fault {
            pc,
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

pub const PRODUCT_DEFAULT: u32 = 0x0E0;

/// Hardware settings stored in the storage image's manufacturing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareSettings {
    pub sdram_size: u32,
    pub product: u32,
    pub features: u32,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            sdram_size: memory::SDRAM_SIZE_DEFAULT,
            product: PRODUCT_DEFAULT,
            features: 0,
        }
    }
}

/// Instruction execution backend (interpreter or dynamic translator).
///
/// Each `step_*` call dispatches exactly one instruction and consumes the
/// instruction's cost through `Scheduler::consume`. Unrecoverable faults are
/// reported as `CoreError::Fault` and unwind to the execution loop.
pub trait CpuExecutor {
    /// One-time backend setup (translation buffers, address cache).
    fn init(&mut self) {}
    fn deinit(&mut self) {}
    /// Drop cached translations and address mappings. Called on every loop
    /// entry and after each machine reset.
    fn invalidate(&mut self) {}
    fn step_arm(
        &mut self,
        cpu: &mut CpuState,
        mem: &mut Memory,
        sched: &mut Scheduler,
    ) -> CoreResult<()>;
    fn step_thumb(
        &mut self,
        cpu: &mut CpuState,
        mem: &mut Memory,
        sched: &mut Scheduler,
    ) -> CoreResult<()>;
    /// Exception entry for the given vector (mode switch, banked registers,
    /// vector fetch).
    fn enter_exception(&mut self, cpu: &mut CpuState, vector: ExceptionVector);
}

/// Persistent storage (flash) collaborator. Owns its own image format; the
/// core only sequences open/settings/suspend/resume at the boundary.
pub trait Storage {
    fn open(&mut self, path: &Path) -> CoreResult<()>;
    fn read_settings(&self) -> CoreResult<HardwareSettings>;
    fn set_boot_order(&mut self, _order: BootOrder) {}
    /// Size in bytes the storage state will occupy in a snapshot, used to
    /// pre-size the image and cross-checked after serialization.
    fn suspend_len(&self) -> usize;
    fn suspend(&mut self, w: &mut SnapshotWriter) -> CoreResult<()>;
    fn resume(&mut self, r: &mut RegionReader<'_>) -> CoreResult<()>;
    fn close(&mut self) {}
}

/// Host front end callbacks. All methods must be non-blocking.
pub trait FrontEnd {
    fn status(&mut self, _msg: &str) {}
    fn debug_text(&mut self, _msg: &str) {}
    /// Speed readout, 100.0 == native speed of the original hardware.
    fn show_speed(&mut self, _percent: f64) {}
    /// Non-blocking poll for one buffered input character.
    fn poll_char(&mut self) -> Option<u8> {
        None
    }
    /// Periodic "do pending UI work" pump.
    fn pump(&mut self) {}
    fn path_error(&mut self, _path: &Path) {}
    /// Interactive debugger entry, honored when a debug policy asks for it.
    fn debugger_break(&mut self, _cpu: &CpuState) {}
}

/// Remote debug protocol listeners (GDB + proprietary). Polled from the
/// throttle tick; never run as independent tasks.
pub trait DebugHost {
    fn listen(&mut self, _gdb_port: u16, _rdbg_port: u16) -> CoreResult<()> {
        Ok(())
    }
    fn poll(&mut self) {}
    fn reset(&mut self) {}
    fn shutdown(&mut self) {}
}

/// Peripheral link/queue collaborator plus the simulated serial input it
/// feeds.
pub trait LinkPort {
    fn service(&mut self) {}
    fn serial_byte_in(&mut self, _byte: u8) {}
}

pub use emu::{Backends, Emulator, ExitSignal};
