//! Public trailer commands callable from the booted application (spec
//! §6: "mark_pending, mark_confirmed, read_swap_state ... translate
//! directly into trailer writes against the application's own slot").
//!
//! Naming follows `bootutil_public.h`'s
//! `boot_set_pending`/`boot_set_confirmed`/`boot_read_swap_state`.

use storage::area::{FlashArea, FlashMap};

use crate::error::Result;
use crate::trailer::{self, SwapState, SwapType, TrailerLayout};

/// Stage the slot for a test (`permanent = false`) or permanent
/// (`permanent = true`) upgrade. Writes `swap_info` with the
/// appropriate `SwapType` and commits with `write_magic` last.
pub fn mark_pending<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &TrailerLayout,
    image_index: u8,
    permanent: bool,
) -> Result<()> {
    let swap_type = if permanent { SwapType::Perm } else { SwapType::Test };
    trailer::write_swap_info(map, area, layout, swap_type, image_index)?;
    trailer::write_magic(map, area, layout)
}

/// One-shot `image-ok` transition, confirming the image currently
/// running from this slot so no revert is attempted on the next boot.
pub fn mark_confirmed<M: FlashMap>(map: &mut M, area: FlashArea, layout: &TrailerLayout) -> Result<()> {
    trailer::write_image_ok(map, area, layout)
}

/// Thin public re-export of the trailer read, callable by the
/// application against its own slot.
pub fn read_swap_state<M: FlashMap>(map: &mut M, area: FlashArea, layout: &TrailerLayout) -> Result<SwapState> {
    trailer::read_swap_state(map, area, layout)
}
