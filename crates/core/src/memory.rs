// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Machine memory regions. Each region pairs a byte buffer with a parallel
//! per-word flags channel; the external MMU consults the flags on every
//! write path (ROM words are always read-only after initialization).

use bitflags::bitflags;

use crate::snapshot::{RegionReader, SnapshotWriter};
use crate::{CoreError, CoreResult};

pub const ROM_BASE: u32 = 0x0000_0000;
/// The boot ROM occupies the first 512 KiB of address space.
pub const ROM_SIZE: usize = 0x8_0000;
pub const SDRAM_BASE: u32 = 0x1000_0000;
pub const SDRAM_SIZE_DEFAULT: u32 = 0x0200_0000;
pub const SDRAM_SIZE_LARGE: u32 = 0x0400_0000;
const SDRAM_SIZE_MAX: u32 = 0x2000_0000;
/// Erased-flash sentinel the boot ROM region is filled with before load.
pub const FLASH_ERASED: u8 = 0xFF;

bitflags! {
    /// Per-32-bit-word flags colocated with a region's data. The
    /// translation backend adds its own bits at runtime; only READ_ONLY is
    /// persistent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WordFlags: u32 {
        const READ_ONLY = 1 << 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemRegion {
    pub base: u32,
    pub data: Vec<u8>,
    flags: Vec<u32>,
}

impl MemRegion {
    /// `size` must be a multiple of the 4-byte word the flags channel is
    /// indexed by.
    pub fn new(base: u32, size: usize) -> Self {
        debug_assert_eq!(size % 4, 0);
        Self {
            base,
            data: vec![0; size],
            flags: vec![0; size / 4],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }

    pub fn zero(&mut self) {
        self.data.fill(0);
        self.flags.fill(0);
    }

    pub fn word_flags(&self, offset: usize) -> WordFlags {
        WordFlags::from_bits_truncate(self.flags[offset / 4])
    }

    pub fn set_word_flags(&mut self, offset: usize, flags: WordFlags) {
        self.flags[offset / 4] = flags.bits();
    }

    /// Flags every word of the region read-only.
    pub fn mark_read_only(&mut self) {
        self.flags.fill(WordFlags::READ_ONLY.bits());
    }

    /// Copies `bytes` into the region at `offset`, truncating at the end of
    /// the region. Offsets past the end copy nothing.
    pub fn load(&mut self, offset: usize, bytes: &[u8]) {
        if offset >= self.data.len() {
            return;
        }
        let n = bytes.len().min(self.data.len() - offset);
        self.data[offset..offset + n].copy_from_slice(&bytes[..n]);
    }
}

/// The memory map the core initializes: boot ROM plus working SDRAM. The
/// MMU collaborator owns address translation over these buffers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Memory {
    pub rom: MemRegion,
    pub ram: MemRegion,
}

impl Memory {
    /// Placeholder before `start` sizes the map and after `cleanup`
    /// releases it.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_sdram(sdram_size: u32) -> CoreResult<Self> {
        if sdram_size == 0 || sdram_size % 4 != 0 || sdram_size > SDRAM_SIZE_MAX {
            return Err(CoreError::Config(format!(
                "invalid SDRAM size {sdram_size:#x}"
            )));
        }
        Ok(Self {
            rom: MemRegion::new(ROM_BASE, ROM_SIZE),
            ram: MemRegion::new(SDRAM_BASE, sdram_size as usize),
        })
    }

    /// Power-on reset: working RAM is zeroed, ROM contents and flags are
    /// preserved.
    pub fn reset(&mut self) {
        self.ram.zero();
    }

    /// RAM contents only. ROM is rebuilt from the boot ROM image on resume,
    /// which is why the snapshot header records the image path.
    pub fn suspend(&self, w: &mut SnapshotWriter) {
        w.put_u32(self.ram.len() as u32);
        w.put_bytes(&self.ram.data);
    }

    pub fn resume(r: &mut RegionReader<'_>) -> CoreResult<Self> {
        let sdram_size = r.get_u32()?;
        let mut mem = Self::with_sdram(sdram_size)
            .map_err(|e| CoreError::Snapshot(format!("memory region: {e}")))?;
        let bytes = r.get_bytes(sdram_size as usize)?;
        mem.ram.data.copy_from_slice(bytes);
        Ok(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_words_read_only_after_marking() {
        let mut mem = Memory::with_sdram(0x1000).unwrap();
        mem.rom.fill(FLASH_ERASED);
        mem.rom.mark_read_only();
        for offset in (0..mem.rom.len()).step_by(4) {
            assert!(mem.rom.word_flags(offset).contains(WordFlags::READ_ONLY));
        }
        assert!(!mem.ram.word_flags(0).contains(WordFlags::READ_ONLY));
    }

    #[test]
    fn reset_zeroes_ram_and_preserves_rom() {
        let mut mem = Memory::with_sdram(0x1000).unwrap();
        mem.rom.fill(FLASH_ERASED);
        mem.rom.mark_read_only();
        mem.ram.data[42] = 0xAB;
        mem.ram.set_word_flags(40, WordFlags::READ_ONLY);

        mem.reset();
        assert!(mem.ram.data.iter().all(|&b| b == 0));
        assert!(mem.ram.word_flags(40).is_empty());
        assert_eq!(mem.rom.data[0], FLASH_ERASED);
        assert!(mem.rom.word_flags(0).contains(WordFlags::READ_ONLY));
    }

    #[test]
    fn rejects_invalid_sdram_sizes() {
        assert!(Memory::with_sdram(0).is_err());
        assert!(Memory::with_sdram(0x1001).is_err());
        assert!(Memory::with_sdram(SDRAM_SIZE_MAX + 4).is_err());
        assert!(Memory::with_sdram(SDRAM_SIZE_DEFAULT).is_ok());
    }

    #[test]
    fn region_load_truncates_at_end() {
        let mut region = MemRegion::new(0, 8);
        region.load(4, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(region.data, vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn region_load_ignores_out_of_range_offset() {
        let mut region = MemRegion::new(0, 8);
        region.load(8, &[1, 2]);
        region.load(100, &[3]);
        assert_eq!(region.data, vec![0; 8]);
    }
}
