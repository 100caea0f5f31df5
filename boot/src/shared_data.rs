//! "Shared data" RAM region (spec §6: "image hash, build id placed in a
//! pre-agreed RAM region, format = TLV with a small header").
//!
//! Grounded on `original_source/boot/bootutil/include/bootutil/mcuboot_status.h`'s
//! boot status report: one writer (the bootloader, once per boot), one
//! reader (the booted application).

use crate::error::{Error, Result};
use crate::image::ImageVersion;

pub const SHARED_DATA_MAGIC: u16 = 0x2016;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BootStatusEvent {
    ImageHash = 0x10,
    ImageVersion = 0x11,
    BuildId = 0x12,
    SecurityCounter = 0x13,
}

/// Append-only writer over a fixed RAM buffer, emitting
/// `(type, len, value)` records behind a small fixed header, matching
/// the on-flash TLV shape for familiarity (spec §6).
pub struct SharedDataWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SharedDataWriter<'a> {
    /// Writes the header (`magic`, running total length placeholder)
    /// and positions the cursor to receive records.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < 4 {
            return Err(Error::NoMemory);
        }
        buf[0..2].copy_from_slice(&SHARED_DATA_MAGIC.to_le_bytes());
        buf[2..4].copy_from_slice(&0u16.to_le_bytes());
        Ok(SharedDataWriter { buf, pos: 4 })
    }

    fn push_record(&mut self, kind: BootStatusEvent, value: &[u8]) -> Result<()> {
        let total = 4 + value.len();
        if self.pos + total > self.buf.len() {
            return Err(Error::NoMemory);
        }
        self.buf[self.pos] = kind as u8;
        self.buf[self.pos + 1] = 0;
        self.buf[self.pos + 2..self.pos + 4].copy_from_slice(&(value.len() as u16).to_le_bytes());
        self.buf[self.pos + 4..self.pos + total].copy_from_slice(value);
        self.pos += total;

        let len_so_far = (self.pos - 4) as u16;
        self.buf[2..4].copy_from_slice(&len_so_far.to_le_bytes());
        Ok(())
    }

    pub fn push_image_hash(&mut self, hash: &[u8; 32]) -> Result<()> {
        self.push_record(BootStatusEvent::ImageHash, hash)
    }

    pub fn push_image_version(&mut self, version: &ImageVersion) -> Result<()> {
        let mut buf = [0u8; 8];
        buf[0] = version.major;
        buf[1] = version.minor;
        buf[2..4].copy_from_slice(&version.revision.to_le_bytes());
        buf[4..8].copy_from_slice(&version.build_num.to_le_bytes());
        self.push_record(BootStatusEvent::ImageVersion, &buf)
    }

    pub fn push_security_counter(&mut self, counter: u32) -> Result<()> {
        self.push_record(BootStatusEvent::SecurityCounter, &counter.to_le_bytes())
    }

    pub fn finish(self) -> usize {
        self.pos
    }
}
