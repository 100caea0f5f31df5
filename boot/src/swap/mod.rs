//! Sector-copy swap algorithms (spec §4.6).
//!
//! Two algorithms, [`move_swap`] and [`offset_swap`], each fully
//! restartable after any reset. Exactly one is compiled in, chosen by
//! the `swap-move` / `swap-offset` features -- a build-time choice, not
//! a runtime one, per spec §9's "Dynamic dispatch" Non-goal.

pub mod move_swap;
pub mod offset_swap;

use storage::area::{FlashArea, FlashMap};

use crate::encryption::{ChunkDecrypt, ContentKey};
use crate::error::Result;
use crate::trailer::TrailerLayout;

const CHUNK_SIZE: usize = 256;

pub const PRIMARY: usize = 0;
pub const SECONDARY: usize = 1;

/// Per-image working state threaded through one swap run: the unwrapped
/// content key for each slot, cached once per boot (spec §4.4).
#[derive(Default)]
pub struct BootStatus {
    pub encryption_keys: [Option<ContentKey>; 2],
}

impl BootStatus {
    /// Drop every cached key, running `ContentKey`'s zeroising `Drop`.
    /// Called right before the engine jumps to the image (spec §3).
    pub fn zeroize_keys(&mut self) {
        self.encryption_keys = [None, None];
    }
}

/// The primary/secondary pair plus trailer geometry a `SwapEngine`
/// operates on.
pub struct SwapContext {
    pub primary: FlashArea,
    pub secondary: FlashArea,
    pub primary_layout: TrailerLayout,
    pub secondary_layout: TrailerLayout,
    pub sector_size: usize,
    /// Sectors actually occupied by image bytes, i.e. the "N" in spec
    /// §4.6 -- the engine skips copying sectors beyond this even though
    /// the slot may have more.
    pub image_sectors: usize,
    /// Offset, within the image body, where decryption starts being
    /// necessary (the header size); `None` when the image is not
    /// encrypted.
    pub encrypted_header_size: Option<u32>,
    /// Byte offset applied when reading the staged image's header out
    /// of the secondary slot, before a swap has run. Zero for
    /// move-then-swap; one sector for offset-swap, whose staging
    /// convention leaves the secondary's first sector erased (spec
    /// §4.6.2).
    pub secondary_header_shift: usize,
}

/// Copy `len` bytes from `src_area[src_off..]` to `dst_area[dst_off..]`,
/// chunked so no more than `CHUNK_SIZE` bytes are ever buffered.
/// Decrypts body bytes in place as they're copied when `decrypt` and
/// `encrypted_header_size` say this range carries ciphertext (spec
/// §4.4: "the call is skipped for bytes that fall within the header").
fn copy_range<M: FlashMap>(
    map: &mut M,
    src_area: FlashArea,
    src_off: usize,
    dst_area: FlashArea,
    dst_off: usize,
    len: usize,
    header_size: Option<u32>,
    mut decrypt: Option<&mut impl ChunkDecrypt>,
) -> Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut off = 0usize;
    while off < len {
        let n = core::cmp::min(CHUNK_SIZE, len - off);
        map.read(src_area, src_off + off, &mut buf[..n])?;

        if let (Some(hdr), Some(cipher)) = (header_size, decrypt.as_deref_mut()) {
            let abs = (src_off + off) as u32;
            let hdr = hdr;
            if abs + n as u32 > hdr {
                let skip = hdr.saturating_sub(abs) as usize;
                let body_offset = abs.max(hdr) - hdr;
                cipher.decrypt_chunk(body_offset, &mut buf[skip..n])?;
            }
        }

        map.write(dst_area, dst_off + off, &buf[..n])?;
        off += n;
    }
    Ok(())
}

/// Selected at build time by exactly one of `swap-move` / `swap-offset`.
pub trait SwapEngine<M: FlashMap> {
    /// Drive the algorithm to completion, resuming from whatever the
    /// trailer's status bytes say was already done.
    fn run(map: &mut M, ctx: &SwapContext, status: &mut BootStatus) -> Result<()>;
}

#[cfg(feature = "swap-move")]
pub type ActiveSwapEngine = move_swap::MoveSwap;
#[cfg(all(feature = "swap-offset", not(feature = "swap-move")))]
pub type ActiveSwapEngine = offset_swap::OffsetSwap;
