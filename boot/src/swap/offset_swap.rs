//! Offset-swap algorithm (spec §4.6.2): no extra sector is required in
//! either slot beyond the secondary's one-sector staging offset.

use storage::area::FlashMap;

use super::{copy_range, BootStatus, SwapContext, SwapEngine};
use crate::error::Result;
use crate::trailer;

pub struct OffsetSwap;

impl<M: FlashMap> SwapEngine<M> for OffsetSwap {
    fn run(map: &mut M, ctx: &SwapContext, status: &mut BootStatus) -> Result<()> {
        let n = ctx.image_sectors;
        let layout = &ctx.primary_layout;
        let sector = ctx.sector_size;

        for i in 0..n {
            let state0_idx = i * 2;
            let state1_idx = state0_idx + 1;
            let off = i * sector;

            if trailer::read_status_byte(map, ctx.primary, layout, state0_idx)?.is_none() {
                map.erase(ctx.secondary, off, sector)?;
                copy_range(map, ctx.primary, off, ctx.secondary, off, sector, None, status.encryption_keys[super::PRIMARY].as_mut())?;
                trailer::write_status_byte(map, ctx.primary, layout, state0_idx, 1)?;
            }

            if trailer::read_status_byte(map, ctx.primary, layout, state1_idx)?.is_none() {
                let staged_off = off + sector;
                map.erase(ctx.primary, off, sector)?;
                copy_range(
                    map,
                    ctx.secondary,
                    staged_off,
                    ctx.primary,
                    off,
                    sector,
                    ctx.encrypted_header_size,
                    status.encryption_keys[super::SECONDARY].as_mut(),
                )?;
                trailer::write_status_byte(map, ctx.primary, layout, state1_idx, 1)?;
            }
        }

        trailer::write_copy_done(map, ctx.primary, layout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trailer::TrailerLayout;
    use storage::area::FlashArea;
    use storage::{Error as StError, Flash, ReadFlash};

    struct Mem {
        data: std::vec::Vec<u8>,
    }

    impl ReadFlash for Mem {
        fn read_size(&self) -> usize {
            1
        }
        fn read(&mut self, offset: usize, bytes: &mut [u8]) -> core::result::Result<(), StError> {
            bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
            Ok(())
        }
        fn capacity(&self) -> usize {
            self.data.len()
        }
    }

    impl Flash for Mem {
        fn write_size(&self) -> usize {
            1
        }
        fn erase_size(&self) -> usize {
            256
        }
        fn erase(&mut self, from: usize, to: usize) -> core::result::Result<(), StError> {
            self.data[from..to].fill(0xFF);
            Ok(())
        }
        fn write(&mut self, offset: usize, bytes: &[u8]) -> core::result::Result<(), StError> {
            self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    struct TwoAreaMap {
        primary: Mem,
        secondary: Mem,
    }

    impl FlashMap for TwoAreaMap {
        type Device = Mem;
        fn area(&self, area_id: u8) -> storage::Result<FlashArea> {
            let size = if area_id == 0 { self.primary.data.len() } else { self.secondary.data.len() };
            Ok(FlashArea { id: area_id, device_id: area_id, offset: 0, size })
        }
        fn device(&mut self, device_id: u8) -> storage::Result<&mut Mem> {
            Ok(if device_id == 0 { &mut self.primary } else { &mut self.secondary })
        }
    }

    #[test]
    fn new_image_ends_up_in_primary() {
        let sector = 256usize;
        let n = 3;
        let primary_size = sector * n + 4096;
        let secondary_size = sector * (n + 1) + 4096;

        let mut secondary_data = vec![0xBBu8; secondary_size];
        for i in 0..n {
            secondary_data[(i + 1) * sector] = 0x20 + i as u8;
        }
        let primary_data = vec![0xAAu8; primary_size];

        let mut map = TwoAreaMap {
            primary: Mem { data: primary_data },
            secondary: Mem { data: secondary_data },
        };
        let primary = map.area(0).unwrap();
        let secondary = map.area(1).unwrap();
        let layout = TrailerLayout::new(primary.size, 8, 2 * n, false).unwrap();
        let secondary_layout = TrailerLayout::new(secondary.size, 8, 2 * n, false).unwrap();

        let ctx = SwapContext {
            primary,
            secondary,
            primary_layout: layout,
            secondary_layout,
            sector_size: sector,
            image_sectors: n,
            encrypted_header_size: None,
            secondary_header_shift: sector,
        };
        let mut status = BootStatus::default();

        <OffsetSwap as SwapEngine<TwoAreaMap>>::run(&mut map, &ctx, &mut status).unwrap();

        let mut tag = [0u8; 1];
        map.read(primary, 0, &mut tag).unwrap();
        assert_eq!(tag[0], 0x20);
        map.read(primary, sector, &mut tag).unwrap();
        assert_eq!(tag[0], 0x21);
    }
}
