// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use bitflags::bitflags;

use crate::snapshot::{RegionReader, SnapshotWriter};
use crate::{CoreError, CoreResult};

pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;

pub const MODE_SVC: u32 = 0x13;
/// Thumb state bit in the low CPSR word.
pub const CPSR_THUMB: u32 = 0x20;
/// IRQ + FIQ disable bits.
pub const CPSR_INT_DISABLE: u32 = 0xC0;
/// Coprocessor 15 control register value at power-on.
pub const CONTROL_POWER_ON: u32 = 0x0005_0078;

bitflags! {
    /// Pending asynchronous events, observed by the execution loop at its
    /// two poll points (top of outer and inner loop), never preemptively.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u32 {
        const RESET      = 1 << 0;
        /// Single-step request from the interactive debugger. The only bit
        /// that survives a machine reset.
        const DEBUG_STEP = 1 << 1;
        /// A wait-for-interrupt instruction is pending; it must be skipped
        /// rather than re-executed when the interrupt is delivered.
        const WAITING    = 1 << 2;
        const FIQ        = 1 << 3;
        const IRQ        = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionVector {
    Fiq,
    Irq,
}

/// Architectural CPU state owned by the execution loop. The instruction
/// executor and interrupt delivery mutate it; nothing else does.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuState {
    /// r0-r12, sp, lr, pc.
    pub reg: [u32; 16],
    /// Mode bits, interrupt-disable bits and the Thumb state bit.
    pub cpsr_low28: u32,
    /// CP15 control register.
    pub control: u32,
    pub events: Events,
}

impl CpuState {
    pub fn new() -> Self {
        let mut cpu = Self::default();
        cpu.power_on_reset();
        cpu
    }

    /// Documented power-on state: registers zeroed, supervisor mode with
    /// interrupts disabled, fixed control register value. Only a pending
    /// single-step request survives.
    pub fn power_on_reset(&mut self) {
        self.reg = [0; 16];
        self.control = CONTROL_POWER_ON;
        self.cpsr_low28 = MODE_SVC | CPSR_INT_DISABLE;
        self.events &= Events::DEBUG_STEP;
    }

    pub fn is_thumb(&self) -> bool {
        self.cpsr_low28 & CPSR_THUMB != 0
    }

    pub fn pc(&self) -> u32 {
        self.reg[REG_PC]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.reg[REG_PC] = pc;
    }

    pub fn suspend(&self, w: &mut SnapshotWriter) {
        for r in self.reg {
            w.put_u32(r);
        }
        w.put_u32(self.cpsr_low28);
        w.put_u32(self.control);
        w.put_u32(self.events.bits());
    }

    pub fn resume(r: &mut RegionReader<'_>) -> CoreResult<Self> {
        let mut reg = [0u32; 16];
        for slot in reg.iter_mut() {
            *slot = r.get_u32()?;
        }
        let cpsr_low28 = r.get_u32()?;
        let control = r.get_u32()?;
        let bits = r.get_u32()?;
        let events = Events::from_bits(bits)
            .ok_or_else(|| CoreError::Snapshot(format!("unknown event bits {bits:#x}")))?;
        Ok(Self {
            reg,
            cpsr_low28,
            control,
            events,
        })
    }
}
