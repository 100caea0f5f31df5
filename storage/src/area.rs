//! Flash area / flash map abstraction (spec §3 "FlashArea", §4.1
//! "FlashMap").

use crate::{Error, Flash, ReadFlash, Result};

/// Role a slot plays for a given image.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum SlotId {
    Primary,
    Secondary,
    Tertiary,
    Scratch,
}

/// One entry of the fixed `boot_area_descs[]` table (spec §6). Immutable
/// after bring-up.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootAreaDesc {
    pub id: u8,
    pub device_id: u8,
    pub offset: usize,
    pub size: usize,
}

/// A single named flash partition, as described in spec §3.
///
/// `FlashArea` carries no device reference of its own -- it is a
/// coordinate, resolved against a `FlashMap` at the point of use. That
/// keeps the engine's state an arena of indices rather than a pointer
/// graph, per spec §9 ("Implement as arena + index, not pointer
/// graphs.").
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FlashArea {
    pub id: u8,
    pub device_id: u8,
    pub offset: usize,
    pub size: usize,
}

impl From<BootAreaDesc> for FlashArea {
    fn from(d: BootAreaDesc) -> Self {
        FlashArea {
            id: d.id,
            device_id: d.device_id,
            offset: d.offset,
            size: d.size,
        }
    }
}

/// An iterator over the sectors of an open area, as
/// `(sector_offset, sector_size)` pairs, offsets relative to the start of
/// the area. Sector size is uniform within one area's backing device.
pub struct SectorIter {
    next_offset: usize,
    area_size: usize,
    sector_size: usize,
}

impl Iterator for SectorIter {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_offset >= self.area_size {
            return None;
        }
        let off = self.next_offset;
        self.next_offset += self.sector_size;
        Some((off, self.sector_size))
    }
}

/// Abstracts a fixed set of named flash areas, translating
/// `(image-index, slot)` to a physical area and physical device, per
/// spec §4.1.
///
/// Implementors provide the configuration lookup (`area`) and device
/// access (`device`); every other operation has a default
/// implementation in terms of those two plus the underlying `Flash`
/// trait, matching the operations listed in spec §4.1.
pub trait FlashMap {
    type Device: Flash;

    /// Look up the descriptor for an area id in the immutable
    /// configuration table.
    fn area(&self, area_id: u8) -> Result<FlashArea>;

    /// Borrow the device backing a given device id.
    fn device(&mut self, device_id: u8) -> Result<&mut Self::Device>;

    /// "Open" an area. `FlashArea` is `Copy`, so opening is just the
    /// configuration lookup; there is no separate handle to close.
    fn open(&self, area_id: u8) -> Result<FlashArea> {
        self.area(area_id)
    }

    fn align(&mut self, area: FlashArea) -> Result<usize> {
        Ok(self.device(area.device_id)?.write_size())
    }

    fn erase_size(&mut self, area: FlashArea) -> Result<usize> {
        Ok(self.device(area.device_id)?.erase_size())
    }

    fn erased_val(&mut self, area: FlashArea) -> Result<u8> {
        Ok(self.device(area.device_id)?.erased_val())
    }

    fn read(&mut self, area: FlashArea, offset: usize, buf: &mut [u8]) -> Result<()> {
        let end = offset.checked_add(buf.len()).ok_or(Error::OutOfBounds)?;
        if end > area.size {
            return Err(Error::OutOfBounds);
        }
        self.device(area.device_id)?.read(area.offset + offset, buf)
    }

    fn write(&mut self, area: FlashArea, offset: usize, buf: &[u8]) -> Result<()> {
        let end = offset.checked_add(buf.len()).ok_or(Error::OutOfBounds)?;
        if end > area.size {
            return Err(Error::OutOfBounds);
        }
        self.device(area.device_id)?.write(area.offset + offset, buf)
    }

    fn erase(&mut self, area: FlashArea, offset: usize, length: usize) -> Result<()> {
        let end = offset.checked_add(length).ok_or(Error::OutOfBounds)?;
        if end > area.size {
            return Err(Error::OutOfBounds);
        }
        let base = area.offset;
        self.device(area.device_id)?
            .erase(base + offset, base + offset + length)
    }

    fn sectors(&mut self, area: FlashArea) -> Result<SectorIter> {
        let sector_size = self.erase_size(area)?;
        Ok(SectorIter {
            next_offset: 0,
            area_size: area.size,
            sector_size,
        })
    }

    /// Render a slot unbootable (spec §4.1 "scramble"). Erase-capable
    /// devices erase the whole area; others get enough of the trailer
    /// magic region overwritten with the erased byte that the slot is no
    /// longer recognised as bootable.
    fn scramble(&mut self, area: FlashArea) -> Result<()> {
        let requires_erase = self.device(area.device_id)?.requires_erase();
        if requires_erase {
            return self.erase(area, 0, area.size);
        }

        let align = self.align(area)?;
        let erased = self.erased_val(area)?;
        let magic_len = core::cmp::max(16, align);
        let start = area.size.saturating_sub(magic_len);

        let fill = [erased; 64];
        let mut off = start;
        while off < area.size {
            let n = (area.size - off).min(fill.len());
            self.write(area, off, &fill[..n])?;
            off += n;
        }
        Ok(())
    }
}
