//! Move-then-swap algorithm (spec §4.6.1).
//!
//! The primary slot holds N+1 sectors, one more than the secondary's N;
//! the extra sector is the move buffer. Phase A shifts every primary
//! sector up by one, opening room at sector 0; phase B then
//! interleaves the new image in from the secondary while banking the
//! displaced original back out to it.

use storage::area::FlashArea;
use storage::area::FlashMap;

use super::{copy_range, BootStatus, SwapContext, SwapEngine};
use crate::error::{Error, Result};
use crate::trailer;

/// `status_byte[0..N)`: phase A, one per sector moved, high index to
/// low. `status_byte[N..3N)`: phase B, two per sector (erase-then-copy
/// from secondary, then erase-then-copy the displaced original out).
pub struct MoveSwap;

fn sector_bounds(ctx: &SwapContext, sector: usize) -> (usize, usize) {
    (sector * ctx.sector_size, ctx.sector_size)
}

impl<M: FlashMap> SwapEngine<M> for MoveSwap {
    fn run(map: &mut M, ctx: &SwapContext, status: &mut BootStatus) -> Result<()> {
        let n = ctx.image_sectors;
        let layout = &ctx.primary_layout;

        // Phase A: copy primary[i-1] -> primary[i], for i from n down to 1.
        for step in 0..n {
            if trailer::read_status_byte(map, ctx.primary, layout, step)?.is_some() {
                continue;
            }
            let i = n - step;
            let (dst_off, len) = sector_bounds(ctx, i);
            let (src_off, _) = sector_bounds(ctx, i - 1);
            copy_range(
                map,
                ctx.primary,
                src_off,
                ctx.primary,
                dst_off,
                len,
                None,
                status.encryption_keys[super::PRIMARY].as_mut(),
            )?;
            trailer::write_status_byte(map, ctx.primary, layout, step, 1)?;
        }

        // Phase B: for i in 1..=n, bring the new image in from the
        // secondary and bank the moved original back out to it.
        for i in 1..=n {
            let state1_idx = n + (i - 1) * 2;
            let state2_idx = state1_idx + 1;

            let (dst_off, len) = sector_bounds(ctx, i - 1);
            if trailer::read_status_byte(map, ctx.primary, layout, state1_idx)?.is_none() {
                map.erase(ctx.primary, dst_off, len)?;
                copy_range(
                    map,
                    ctx.secondary,
                    dst_off,
                    ctx.primary,
                    dst_off,
                    len,
                    ctx.encrypted_header_size,
                    status.encryption_keys[super::SECONDARY].as_mut(),
                )?;
                trailer::write_status_byte(map, ctx.primary, layout, state1_idx, 1)?;
            }

            if trailer::read_status_byte(map, ctx.primary, layout, state2_idx)?.is_none() {
                let (moved_off, moved_len) = sector_bounds(ctx, i);
                map.erase(ctx.secondary, dst_off, len)?;
                copy_range(
                    map,
                    ctx.primary,
                    moved_off,
                    ctx.secondary,
                    dst_off,
                    moved_len.min(len),
                    None,
                    status.encryption_keys[super::PRIMARY].as_mut(),
                )?;
                trailer::write_status_byte(map, ctx.primary, layout, state2_idx, 1)?;
            }
        }

        trailer::write_copy_done(map, ctx.primary, layout)?;
        Ok(())
    }
}

/// True if the status region holds a non-empty, well-formed run: either
/// all erased (nothing started), or a contiguous prefix of set bytes
/// followed by all-erased (in progress or done). Anything else -- a set
/// byte after an erased one -- is the "multiple erased/written runs"
/// inconsistency spec §4.6 calls a hard `BadStatus` PANIC.
pub fn check_status_region_consistent<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &crate::trailer::TrailerLayout,
) -> Result<()> {
    let cap = trailer::status_capacity(layout);
    let mut seen_erased = false;
    for i in 0..cap {
        match trailer::read_status_byte(map, area, layout, i)? {
            Some(_) if seen_erased => return Err(Error::BadStatus),
            Some(_) => {}
            None => seen_erased = true,
        }
    }
    Ok(())
}
