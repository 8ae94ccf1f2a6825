// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Emulator session: lifecycle orchestration, the event-scheduled
//! execution loop, fault recovery and snapshot suspend/resume. One
//! `Emulator` spans one `start`/`cleanup` pair; everything inside runs on a
//! single logical thread.

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cinder_config::EmuConfig;
use tracing::{debug, error, info, warn};

use crate::cpu::{CpuState, Events, ExceptionVector, REG_LR};
use crate::host::{IdleExecutor, ImageStorage, NullDebugHost, NullFrontEnd, NullLink};
use crate::memory::{Memory, FLASH_ERASED};
use crate::sched::{Clock, Scheduler, Slot};
use crate::snapshot::{Region, SnapshotImage, SnapshotWriter};
use crate::throttle::{Throttle, THROTTLE_PERIOD_TICKS};
use crate::{CoreError, CoreResult, CpuExecutor, DebugHost, FrontEnd, LinkPort, Storage};

/// BOOT2 entry that requires BOOT1 to have run; reaching it without a boot
/// ROM image means the hand-off must be faked and the user warned.
const BOOT2_HANDOFF_PC: u32 = 0x0001_0040;

/// Asynchronous "request exit" handle. Safe to clone into other threads;
/// the loop observes it only at its poll points.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal(Arc<AtomicBool>);

impl ExitSignal {
    pub fn request(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// External collaborators wired into a session. Defaults are the minimal
/// host adapters.
pub struct Backends {
    pub executor: Box<dyn CpuExecutor>,
    pub storage: Box<dyn Storage>,
    pub front_end: Box<dyn FrontEnd>,
    pub debug: Box<dyn DebugHost>,
    pub link: Box<dyn LinkPort>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            executor: Box::new(IdleExecutor::default()),
            storage: Box::new(ImageStorage::new()),
            front_end: Box::new(NullFrontEnd),
            debug: Box::new(NullDebugHost),
            link: Box::new(NullLink),
        }
    }
}

pub struct Emulator {
    pub config: EmuConfig,
    pub cpu: CpuState,
    pub sched: Scheduler,
    pub mem: Memory,
    throttle: Throttle,
    product: u32,
    features: u32,
    exiting: ExitSignal,
    executor: Box<dyn CpuExecutor>,
    storage: Box<dyn Storage>,
    front_end: Box<dyn FrontEnd>,
    debug: Box<dyn DebugHost>,
    link: Box<dyn LinkPort>,
}

impl Emulator {
    pub fn new(config: EmuConfig, backends: Backends) -> Self {
        let throttle = Throttle::new(config.turbo);
        Self {
            config,
            cpu: CpuState::new(),
            sched: Scheduler::new(),
            mem: Memory::empty(),
            throttle,
            product: crate::PRODUCT_DEFAULT,
            features: 0,
            exiting: ExitSignal::default(),
            executor: backends.executor,
            storage: backends.storage,
            front_end: backends.front_end,
            debug: backends.debug,
            link: backends.link,
        }
    }

    pub fn exit_signal(&self) -> ExitSignal {
        self.exiting.clone()
    }

    pub fn product(&self) -> u32 {
        self.product
    }

    pub fn features(&self) -> u32 {
        self.features
    }

    /// Measured speed ratio, 1.0 == native.
    pub fn speed(&self) -> f64 {
        self.throttle.speed()
    }

    /// Brings the session up, either resuming from a snapshot or cold
    /// booting from the storage image. On a resume failure the session is
    /// cleaned up before the error is returned; no partially-resumed
    /// machine is ever left standing.
    pub fn start(&mut self, snapshot: Option<&Path>) -> CoreResult<()> {
        if self.config.debug_on_start {
            self.cpu.events.insert(Events::DEBUG_STEP);
        }

        match snapshot {
            Some(path) => {
                info!("resuming from snapshot {}", path.display());
                if let Err(e) = self.resume_from(path) {
                    error!("resume failed: {e}");
                    self.cleanup();
                    return Err(e);
                }
            }
            None => {
                let path = self
                    .config
                    .storage_image
                    .clone()
                    .ok_or_else(|| CoreError::Config("storage image path is not set".into()))?;
                self.storage.open(&path)?;
                let settings = self.storage.read_settings()?;
                self.product = settings.product;
                self.features = settings.features;
                self.storage.set_boot_order(self.config.boot_order);
                self.mem = Memory::with_sdram(settings.sdram_size)?;
                info!(
                    sdram = settings.sdram_size,
                    product = format_args!("{:#x}", settings.product),
                    "cold boot"
                );
            }
        }

        self.init_boot_rom()?;
        self.executor.init();
        self.sched.set_clock(Slot::Throttle, Clock::Ref27M);
        self.throttle.enable_pacing();
        self.debug
            .listen(self.config.gdb_port, self.config.rdbg_port)?;
        Ok(())
    }

    /// Runs the execution loop until an exit is requested. The dispatch
    /// result match below is the fault recovery point: every unrecoverable
    /// CPU fault funnels into it and comes out as a forced reset.
    pub fn run(&mut self, reset_first: bool) {
        if reset_first {
            self.reset_machine();
        }
        self.exiting.clear();

        'outer: loop {
            self.debug.reset();
            self.executor.invalidate();
            self.sched.publish();

            while !self.exiting.is_requested() {
                self.sched.advance();
                while let Some(slot) = self.sched.next_due() {
                    self.dispatch_event(slot);
                }
                while !self.exiting.is_requested() && self.sched.cycles_remaining() < 0 {
                    if self.cpu.events.contains(Events::RESET) {
                        self.front_end.status("Reset");
                        self.reset_machine();
                        continue 'outer;
                    }

                    if self.cpu.events.intersects(Events::FIQ | Events::IRQ) {
                        self.deliver_interrupt();
                    }
                    self.cpu.events.remove(Events::WAITING);

                    if let Err(fault) = self.dispatch_one() {
                        self.recover(fault);
                    }
                }
            }
            break;
        }
    }

    /// Serializes the whole machine to `path`. The signature word is
    /// written last, so a crash mid-suspend leaves a file that fails
    /// validation rather than a silently corrupt snapshot.
    pub fn suspend(&mut self, path: &Path) -> CoreResult<()> {
        let mut file = File::create(path)?;
        let mut w = SnapshotWriter::new(
            self.product,
            self.features,
            self.config.boot_rom.as_deref(),
            self.config.storage_image.as_deref(),
        );
        let storage_len = self.storage.suspend_len();
        w.reserve(storage_len + self.mem.ram.len() + 256);

        w.begin(Region::Cpu);
        self.cpu.suspend(&mut w);
        w.end(Region::Cpu);

        w.begin(Region::Sched);
        self.sched.suspend(&mut w);
        w.end(Region::Sched);

        w.begin(Region::Mem);
        self.mem.suspend(&mut w);
        w.end(Region::Mem);

        w.begin(Region::Storage);
        self.storage.suspend(&mut w)?;
        w.end(Region::Storage);
        if w.region_len(Region::Storage) != storage_len {
            return Err(CoreError::Snapshot(format!(
                "storage serialized {} bytes but declared {storage_len}",
                w.region_len(Region::Storage)
            )));
        }

        info!(bytes = w.total_len(), "writing snapshot {}", path.display());
        w.commit(&mut file)
    }

    /// Tears the session down. Idempotent: safe to call again while
    /// unwinding from a failed `start`.
    pub fn cleanup(&mut self) {
        self.exiting.request();
        self.debug.shutdown();
        self.executor.deinit();
        self.mem.reset();
        self.mem = Memory::empty();
        self.storage.close();
        debug!("session cleaned up");
    }

    /// Recoverable anomaly: reported with the current pc, optionally
    /// promoted to a debugger break, execution continues.
    pub fn warn(&mut self, msg: &str) {
        let pc = self.cpu.pc();
        warn!("Warning ({pc:08x}): {msg}");
        self.front_end
            .debug_text(&format!("Warning ({pc:08x}): {msg}"));
        if self.config.debug_on_warn {
            self.front_end.debugger_break(&self.cpu);
        }
    }

    fn resume_from(&mut self, path: &Path) -> CoreResult<()> {
        let image = SnapshotImage::load(path)?;
        let header = image.header().clone();

        // The header remembers where the images lived at suspend time;
        // adopt them unless the configuration overrides.
        if self.config.boot_rom.is_none() {
            self.config.boot_rom = header.boot_rom_path.clone();
        }
        if self.config.storage_image.is_none() {
            self.config.storage_image = header.storage_path.clone();
        }

        // Dependency order: storage first (settings live in it), then CPU,
        // then memory sized from the image, then the scheduler.
        self.storage.resume(&mut image.region(Region::Storage))?;
        let settings = self.storage.read_settings()?;
        self.product = settings.product;
        self.features = settings.features;
        self.cpu = CpuState::resume(&mut image.region(Region::Cpu))?;
        self.mem = Memory::resume(&mut image.region(Region::Mem))?;
        self.sched = Scheduler::resume(&mut image.region(Region::Sched))?;
        Ok(())
    }

    /// Boot ROM setup, identical for cold boot and resume: erased-flash
    /// fill, optional image load, every word flagged read-only.
    fn init_boot_rom(&mut self) -> CoreResult<()> {
        self.mem.rom.fill(FLASH_ERASED);
        if let Some(path) = &self.config.boot_rom {
            match std::fs::read(path) {
                Ok(bytes) => self.mem.rom.load(0, &bytes),
                Err(e) => {
                    self.front_end.path_error(path);
                    return Err(CoreError::Config(format!(
                        "cannot load boot ROM {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        self.mem.rom.mark_read_only();
        Ok(())
    }

    /// Full machine reset to power-on state. The throttle slot is re-armed
    /// immediately; it is the one mandatory event.
    fn reset_machine(&mut self) {
        self.mem.reset();
        self.cpu.power_on_reset();
        self.sched.reset();
        self.sched.set_clock(Slot::Throttle, Clock::Ref27M);
        self.sched.schedule(Slot::Throttle, THROTTLE_PERIOD_TICKS);
        debug!("machine reset");
    }

    fn dispatch_event(&mut self, slot: Slot) {
        match slot {
            Slot::Throttle => self.throttle_tick(),
            // Remaining slots belong to peripheral collaborators; nothing
            // is registered on them in a bare session.
            other => debug!(?other, "unowned event slot fired"),
        }
    }

    /// The 100 Hz housekeeping tick: the only place the core is allowed to
    /// block wall-clock time.
    fn throttle_tick(&mut self) {
        self.sched.repeat(Slot::Throttle, THROTTLE_PERIOD_TICKS);

        self.link.service();
        if let Some(byte) = self.front_end.poll_char() {
            self.link.serial_byte_in(byte);
        }
        self.debug.poll();

        if let Some(speed) = self.throttle.on_tick(Instant::now()) {
            self.front_end.show_speed(speed * 100.0);
        }
        self.front_end.pump();

        if let Some(delay) = self.throttle.pace() {
            spin_sleep::sleep(delay);
        }
    }

    /// Interrupt delivery. The pc is aligned to the current instruction
    /// mode in case the interrupt landed right after a jump, stepped past a
    /// pending wait-for-interrupt instruction, then handed to the exception
    /// entry path. FIQ outranks IRQ.
    fn deliver_interrupt(&mut self) {
        let mask = if self.cpu.is_thumb() { !1u32 } else { !3u32 };
        let mut pc = self.cpu.pc() & mask;
        if self.cpu.events.contains(Events::WAITING) {
            pc = pc.wrapping_add(4);
        }
        pc = pc.wrapping_add(4);
        self.cpu.set_pc(pc);

        let vector = if self.cpu.events.contains(Events::FIQ) {
            ExceptionVector::Fiq
        } else {
            ExceptionVector::Irq
        };
        self.executor.enter_exception(&mut self.cpu, vector);
    }

    fn dispatch_one(&mut self) -> CoreResult<()> {
        if self.cpu.pc() == BOOT2_HANDOFF_PC {
            let lr = self.cpu.reg[REG_LR];
            self.cpu.set_pc(lr);
            self.warn("BOOT1 is required to run this version of BOOT2.");
            return Ok(());
        }
        if self.cpu.is_thumb() {
            self.executor
                .step_thumb(&mut self.cpu, &mut self.mem, &mut self.sched)
        } else {
            self.executor
                .step_arm(&mut self.cpu, &mut self.mem, &mut self.sched)
        }
    }

    /// Fault recovery: report, optionally break into the debugger, then
    /// force a reset. Faults never terminate the process and never escape
    /// the loop.
    fn recover(&mut self, fault: CoreError) {
        let pc = self.cpu.pc();
        error!("Error ({pc:08x}): {fault}");
        self.front_end
            .debug_text(&format!("Error ({pc:08x}): {fault}"));
        if self.config.debug_on_warn {
            self.front_end.debugger_break(&self.cpu);
        }
        self.cpu.events.insert(Events::RESET);
    }
}
