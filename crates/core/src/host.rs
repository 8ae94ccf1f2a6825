// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Minimal host-side collaborator adapters: enough to boot, pace and
//! snapshot a machine without the full product peripherals attached.

use std::path::Path;

use cinder_config::BootOrder;

use crate::cpu::{CpuState, Events, ExceptionVector, REG_PC};
use crate::memory::Memory;
use crate::sched::Scheduler;
use crate::snapshot::{RegionReader, SnapshotWriter};
use crate::{
    CoreError, CoreResult, CpuExecutor, DebugHost, FrontEnd, HardwareSettings, LinkPort, Storage,
};

/// Front end that routes status and debug text to the log and never has
/// input buffered.
#[derive(Debug, Default)]
pub struct NullFrontEnd;

impl FrontEnd for NullFrontEnd {
    fn status(&mut self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn debug_text(&mut self, msg: &str) {
        tracing::debug!("{msg}");
    }

    fn show_speed(&mut self, percent: f64) {
        tracing::trace!("speed {percent:.1}%");
    }

    fn path_error(&mut self, path: &Path) {
        tracing::error!("cannot open {}", path.display());
    }
}

#[derive(Debug, Default)]
pub struct NullLink;

impl LinkPort for NullLink {}

#[derive(Debug, Default)]
pub struct NullDebugHost;

impl DebugHost for NullDebugHost {}

/// Placeholder execution backend used until a translation backend is
/// attached: every step costs a fixed number of cycles and advances the pc
/// by one instruction width. Exception entry acknowledges the pending
/// event, standing in for the interrupt controller.
#[derive(Debug)]
pub struct IdleExecutor {
    pub cycles_per_step: u32,
}

impl Default for IdleExecutor {
    fn default() -> Self {
        Self { cycles_per_step: 8 }
    }
}

impl CpuExecutor for IdleExecutor {
    fn step_arm(
        &mut self,
        cpu: &mut CpuState,
        _mem: &mut Memory,
        sched: &mut Scheduler,
    ) -> CoreResult<()> {
        cpu.reg[REG_PC] = cpu.reg[REG_PC].wrapping_add(4);
        sched.consume(self.cycles_per_step);
        Ok(())
    }

    fn step_thumb(
        &mut self,
        cpu: &mut CpuState,
        _mem: &mut Memory,
        sched: &mut Scheduler,
    ) -> CoreResult<()> {
        cpu.reg[REG_PC] = cpu.reg[REG_PC].wrapping_add(2);
        sched.consume(self.cycles_per_step);
        Ok(())
    }

    fn enter_exception(&mut self, cpu: &mut CpuState, vector: ExceptionVector) {
        match vector {
            ExceptionVector::Fiq => cpu.events.remove(Events::FIQ),
            ExceptionVector::Irq => cpu.events.remove(Events::IRQ),
        }
    }
}

fn boot_order_as_u8(order: BootOrder) -> u8 {
    match order {
        BootOrder::Default => 0,
        BootOrder::Boot2 => 1,
        BootOrder::Diags => 2,
    }
}

fn boot_order_from_u8(v: u8) -> CoreResult<BootOrder> {
    match v {
        0 => Ok(BootOrder::Default),
        1 => Ok(BootOrder::Boot2),
        2 => Ok(BootOrder::Diags),
        _ => Err(CoreError::Snapshot(format!("unknown boot order {v}"))),
    }
}

/// Flat-file storage adapter: the raw image bytes plus fixed hardware
/// settings supplied at construction. The full flash model lives in the
/// storage collaborator; this adapter only honors the core's boundary.
#[derive(Debug, Default)]
pub struct ImageStorage {
    settings: HardwareSettings,
    boot_order: BootOrder,
    image: Vec<u8>,
}

impl ImageStorage {
    pub fn new() -> Self {
        Self::with_settings(HardwareSettings::default())
    }

    pub fn with_settings(settings: HardwareSettings) -> Self {
        Self {
            settings,
            boot_order: BootOrder::Default,
            image: Vec::new(),
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

impl Storage for ImageStorage {
    fn open(&mut self, path: &Path) -> CoreResult<()> {
        self.image = std::fs::read(path).map_err(|e| {
            CoreError::Storage(format!("cannot open storage image {}: {e}", path.display()))
        })?;
        Ok(())
    }

    fn read_settings(&self) -> CoreResult<HardwareSettings> {
        Ok(self.settings)
    }

    fn set_boot_order(&mut self, order: BootOrder) {
        self.boot_order = order;
    }

    fn suspend_len(&self) -> usize {
        // settings + boot order + image length prefix + image bytes
        4 * 3 + 1 + 4 + self.image.len()
    }

    fn suspend(&mut self, w: &mut SnapshotWriter) -> CoreResult<()> {
        w.put_u32(self.settings.sdram_size);
        w.put_u32(self.settings.product);
        w.put_u32(self.settings.features);
        w.put_u8(boot_order_as_u8(self.boot_order));
        w.put_u32(self.image.len() as u32);
        w.put_bytes(&self.image);
        Ok(())
    }

    fn resume(&mut self, r: &mut RegionReader<'_>) -> CoreResult<()> {
        self.settings = HardwareSettings {
            sdram_size: r.get_u32()?,
            product: r.get_u32()?,
            features: r.get_u32()?,
        };
        self.boot_order = boot_order_from_u8(r.get_u8()?)?;
        let len = r.get_u32()? as usize;
        self.image = r.get_bytes(len)?.to_vec();
        Ok(())
    }

    fn close(&mut self) {
        self.image = Vec::new();
    }
}
