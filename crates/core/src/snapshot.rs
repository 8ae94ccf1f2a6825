// Cinder - Handheld Emulation Core
// Copyright (C) 2026 Cinder Team
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! On-disk snapshot image: a fixed header followed by four sized
//! sub-regions (CPU, scheduler, memory, storage). The signature word is
//! written last so a truncated or interrupted suspend is detectable on the
//! next load.
//!
//! Layout (little-endian):
//! ```text
//! 0    u32       signature (0xCAFEBEEF)
//! 4    u32       format version
//! 8    u32       product identifier
//! 12   u32       feature flags
//! 16   [u8;256]  boot ROM path, NUL-terminated
//! 272  [u8;256]  storage image path, NUL-terminated
//! 528  [u32;4]   sub-region lengths (cpu, sched, mem, storage)
//! 544  ...       sub-regions, in that order
//! ```

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{CoreError, CoreResult};

pub const SNAPSHOT_MAGIC: u32 = 0xCAFE_BEEF;
pub const SNAPSHOT_VERSION: u32 = 1;
pub const PATH_CAP: usize = 256;
pub const HEADER_LEN: usize = 544;

const OFF_SIG: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_PRODUCT: usize = 8;
const OFF_FEATURES: usize = 12;
const OFF_PATH_BOOT_ROM: usize = 16;
const OFF_PATH_STORAGE: usize = 272;
const OFF_REGION_LENS: usize = 528;

pub const REGION_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Cpu = 0,
    Sched = 1,
    Mem = 2,
    Storage = 3,
}

fn put_path(buf: &mut [u8], path: Option<&Path>) {
    if let Some(path) = path {
        let bytes = path.to_string_lossy().into_owned().into_bytes();
        let n = bytes.len().min(PATH_CAP - 1);
        buf[..n].copy_from_slice(&bytes[..n]);
        // Remainder is already zeroed, keeping the field NUL-terminated
        // even when the path was truncated.
    }
}

fn get_path(buf: &[u8]) -> Option<PathBuf> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    if end == 0 {
        return None;
    }
    Some(PathBuf::from(String::from_utf8_lossy(&buf[..end]).into_owned()))
}

fn read_u32_at(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Serializes a snapshot into a byte buffer, then writes it out with the
/// signature patched in last.
pub struct SnapshotWriter {
    buf: Vec<u8>,
    lens: [u32; REGION_COUNT],
    open: Option<(Region, usize)>,
}

impl SnapshotWriter {
    pub fn new(
        product: u32,
        features: u32,
        boot_rom: Option<&Path>,
        storage: Option<&Path>,
    ) -> Self {
        let mut buf = vec![0u8; HEADER_LEN];
        // Signature stays zero until commit.
        buf[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        buf[OFF_PRODUCT..OFF_PRODUCT + 4].copy_from_slice(&product.to_le_bytes());
        buf[OFF_FEATURES..OFF_FEATURES + 4].copy_from_slice(&features.to_le_bytes());
        put_path(&mut buf[OFF_PATH_BOOT_ROM..OFF_PATH_BOOT_ROM + PATH_CAP], boot_rom);
        put_path(&mut buf[OFF_PATH_STORAGE..OFF_PATH_STORAGE + PATH_CAP], storage);
        Self {
            buf,
            lens: [0; REGION_COUNT],
            open: None,
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        self.buf.reserve(additional);
    }

    pub fn begin(&mut self, region: Region) {
        debug_assert!(self.open.is_none(), "nested snapshot region");
        self.open = Some((region, self.buf.len()));
    }

    pub fn end(&mut self, region: Region) {
        let (open, start) = self.open.take().expect("no snapshot region open");
        debug_assert_eq!(open, region);
        self.lens[region as usize] = (self.buf.len() - start) as u32;
    }

    pub fn region_len(&self, region: Region) -> usize {
        self.lens[region as usize] as usize
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn total_len(&self) -> usize {
        self.buf.len()
    }

    /// Writes the image to `file`: the whole buffer with a zero signature
    /// first, synced, then the signature word, synced again. A crash at any
    /// point leaves a file that fails signature validation.
    pub fn commit(mut self, file: &mut File) -> CoreResult<()> {
        debug_assert!(self.open.is_none(), "unclosed snapshot region");
        let off = OFF_REGION_LENS;
        for (i, len) in self.lens.iter().enumerate() {
            self.buf[off + i * 4..off + i * 4 + 4].copy_from_slice(&len.to_le_bytes());
        }
        file.set_len(self.buf.len() as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.buf)?;
        file.sync_data()?;
        file.seek(SeekFrom::Start(OFF_SIG as u64))?;
        file.write_all(&SNAPSHOT_MAGIC.to_le_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotHeader {
    pub version: u32,
    pub product: u32,
    pub features: u32,
    pub boot_rom_path: Option<PathBuf>,
    pub storage_path: Option<PathBuf>,
    pub region_lens: [u32; REGION_COUNT],
}

/// A loaded and validated snapshot image. Validation rejects the file
/// before any state is applied; sub-region readers are bounds-checked.
#[derive(Debug)]
pub struct SnapshotImage {
    buf: Vec<u8>,
    header: SnapshotHeader,
    offsets: [usize; REGION_COUNT],
}

impl SnapshotImage {
    pub fn load(path: &Path) -> CoreResult<Self> {
        let buf = std::fs::read(path)?;
        Self::parse(buf)
    }

    pub fn parse(buf: Vec<u8>) -> CoreResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CoreError::Snapshot(format!(
                "file shorter than snapshot header ({} < {HEADER_LEN} bytes)",
                buf.len()
            )));
        }
        let sig = read_u32_at(&buf, OFF_SIG);
        if sig != SNAPSHOT_MAGIC {
            return Err(CoreError::Snapshot(format!(
                "bad signature {sig:#010x} (expected {SNAPSHOT_MAGIC:#010x})"
            )));
        }
        let version = read_u32_at(&buf, OFF_VERSION);
        if version != SNAPSHOT_VERSION {
            return Err(CoreError::Snapshot(format!(
                "unsupported snapshot version {version}"
            )));
        }

        let mut region_lens = [0u32; REGION_COUNT];
        let mut offsets = [0usize; REGION_COUNT];
        let mut off = HEADER_LEN as u64;
        for i in 0..REGION_COUNT {
            region_lens[i] = read_u32_at(&buf, OFF_REGION_LENS + i * 4);
            offsets[i] = off as usize;
            off += u64::from(region_lens[i]);
        }
        if off != buf.len() as u64 {
            return Err(CoreError::Snapshot(format!(
                "declared size {off} does not match file size {}",
                buf.len()
            )));
        }

        let header = SnapshotHeader {
            version,
            product: read_u32_at(&buf, OFF_PRODUCT),
            features: read_u32_at(&buf, OFF_FEATURES),
            boot_rom_path: get_path(&buf[OFF_PATH_BOOT_ROM..OFF_PATH_BOOT_ROM + PATH_CAP]),
            storage_path: get_path(&buf[OFF_PATH_STORAGE..OFF_PATH_STORAGE + PATH_CAP]),
            region_lens,
        };
        Ok(Self {
            buf,
            header,
            offsets,
        })
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn region(&self, region: Region) -> RegionReader<'_> {
        let start = self.offsets[region as usize];
        let len = self.header.region_lens[region as usize] as usize;
        RegionReader {
            buf: &self.buf[start..start + len],
            pos: 0,
        }
    }
}

/// Cursor over one sub-region. Every read is bounds-checked; running off
/// the end is a snapshot corruption error, never a panic.
pub struct RegionReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RegionReader<'a> {
    pub fn get_u8(&mut self) -> CoreResult<u8> {
        let b = self.get_bytes(1)?;
        Ok(b[0])
    }

    pub fn get_u32(&mut self) -> CoreResult<u32> {
        let b = self.get_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> CoreResult<u64> {
        let b = self.get_bytes(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn get_bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return Err(CoreError::Snapshot(format!(
                "sub-region underrun: wanted {len} bytes, {} left",
                self.buf.len() - self.pos
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}
