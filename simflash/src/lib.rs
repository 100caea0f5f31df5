//! A hosted flash simulator: plain in-memory buffers standing in for the
//! NOR parts `boot` is written against, used by `boot`'s own tests and by
//! the image generator in [`gen`].
//!
//! Unlike a real device, reads here are never short and never require
//! alignment the hardware wouldn't also enforce -- [`SimFlash`] still
//! runs every access through [`storage::check_read`]/[`check_write`]/
//! [`check_erase`] so a test that gets alignment wrong fails the same way
//! it would on target.

pub mod gen;
pub mod styles;

use storage::area::{BootAreaDesc, FlashArea, FlashMap};
use storage::{check_erase, check_read, check_write, Error as StError, Flash, ReadFlash};

/// One simulated NOR device: a flat buffer of `0xFF` bytes with a fixed
/// read/write/erase granularity.
pub struct SimFlash {
    data: Vec<u8>,
    read_size: usize,
    write_size: usize,
    erase_size: usize,
}

impl SimFlash {
    /// Build a device of `sectors * erase_size` bytes, initialized to the
    /// erased value.
    pub fn new(read_size: usize, write_size: usize, erase_size: usize, sectors: usize) -> anyhow::Result<SimFlash> {
        if erase_size == 0 || sectors == 0 {
            return Err(anyhow::anyhow!("flash device must have a nonzero erase size and sector count"));
        }
        Ok(SimFlash {
            data: vec![0xFFu8; erase_size * sectors],
            read_size,
            write_size,
            erase_size,
        })
    }

    /// Write `data` at `offset`, first erasing every sector it touches.
    /// Convenience for test setup; real callers go through [`Flash::write`]
    /// directly once the target sectors are already erased.
    pub fn install(&mut self, data: &[u8], offset: usize) -> storage::Result<()> {
        let end = offset + data.len();
        let first = (offset / self.erase_size) * self.erase_size;
        let last = ((end + self.erase_size - 1) / self.erase_size) * self.erase_size;
        self.erase(first, last)?;
        self.write(offset, data)
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        check_read(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        check_erase(self, from, to)?;
        self.data[from..to].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        check_write(self, offset, bytes.len())?;
        // A real NOR part can only clear bits, never set them; catch a
        // test writing over unerased flash instead of silently lying
        // about what landed there.
        for (slot, &b) in self.data[offset..offset + bytes.len()].iter().zip(bytes) {
            if *slot & b != b {
                return Err(StError::NotErased);
            }
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// A [`FlashMap`] over a small fixed set of simulated devices, addressed
/// by the `device_id` each [`BootAreaDesc`] names.
pub struct SimMap {
    devices: Vec<SimFlash>,
    areas: Vec<BootAreaDesc>,
}

impl SimMap {
    pub fn new(devices: Vec<SimFlash>, areas: Vec<BootAreaDesc>) -> SimMap {
        SimMap { devices, areas }
    }
}

impl FlashMap for SimMap {
    type Device = SimFlash;

    fn area(&self, area_id: u8) -> storage::Result<FlashArea> {
        self.areas
            .iter()
            .find(|a| a.id == area_id)
            .map(|a| FlashArea::from(*a))
            .ok_or(StError::NoSuchArea)
    }

    fn device(&mut self, device_id: u8) -> storage::Result<&mut SimFlash> {
        self.devices.get_mut(device_id as usize).ok_or(StError::NoSuchArea)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_over_unerased_flash_is_rejected() {
        let mut dev = SimFlash::new(1, 1, 4096, 1).unwrap();
        dev.write(0, &[1, 2, 3]).unwrap();
        assert_eq!(dev.write(0, &[4, 5, 6]), Err(StError::NotErased));
    }

    #[test]
    fn erase_then_write_round_trips() {
        let mut dev = SimFlash::new(1, 8, 4096, 2).unwrap();
        dev.erase(0, 4096).unwrap();
        dev.write(0, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut buf = [0u8; 8];
        dev.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn install_erases_every_touched_sector() {
        let mut dev = SimFlash::new(1, 8, 4096, 3).unwrap();
        dev.install(&[1u8; 16], 4000).unwrap();
        let mut buf = [0u8; 16];
        dev.read(4000, &mut buf).unwrap();
        assert_eq!(buf, [1u8; 16]);
    }

    #[test]
    fn map_translates_area_to_device() {
        let dev = SimFlash::new(1, 8, 4096, 2).unwrap();
        let mut map = SimMap::new(
            vec![dev],
            vec![BootAreaDesc { id: 1, device_id: 0, offset: 4096, size: 4096 }],
        );
        let area = map.open(1).unwrap();
        map.write(area, 0, &[9, 9, 9, 9, 9, 9, 9, 9]).unwrap();
        let mut raw = [0u8; 8];
        map.device(0).unwrap().read(4096, &mut raw).unwrap();
        assert_eq!(raw, [9, 9, 9, 9, 9, 9, 9, 9]);
    }
}
