//! Persistent per-slot state machine (spec §3 "TrailerState", §4.5).
//!
//! Supersedes the teacher's `status.rs` prototype: same idea (a
//! fixed-layout record read back-to-front from the end of a slot) but
//! generalised to the full field set and the strict write ordering the
//! original bootloader enforces in `swap_misc.c`.

use storage::area::{FlashArea, FlashMap};

use crate::error::{Error, Result};

/// A one-shot boolean field (copy-done, image-ok). Any byte other than
/// the erased value or `SET_VALUE` is `Bad`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BootFlag {
    Unset,
    Set,
    Bad,
}

/// The magic field's three reachable states (spec §3: "GOOD (exactly the
/// constant), UNSET (all erased), BAD (anything else)").
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MagicState {
    Good,
    Unset,
    Bad,
}

/// Decoded `swap_info` nibble pair, or the result of a trailer the
/// classifier cannot yet resolve (spec §4.5's classification table).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SwapType {
    None,
    Test,
    Perm,
    Revert,
    Fail,
}

const SET_VALUE: u8 = 0x01;

/// The 16-byte constant marking a trailer as committed. Distinct from
/// `IMAGE_MAGIC`: this one lives at the tail of the slot, not the head.
pub const TRAILER_MAGIC: [u8; 16] = [
    0x77, 0xc2, 0x95, 0xf3, 0x60, 0xd2, 0xef, 0x7f, 0x35, 0x52, 0x50, 0x0f, 0x2c, 0xb6, 0x79, 0x80,
];

fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    (value + align - 1) / align * align
}

/// Computed byte offsets of every trailer field, relative to the start
/// of the area, for a given write-alignment. Laid out back-to-front:
/// everything is defined in terms of `magic_off` and walking downward,
/// matching spec §4.5's "Offsets are computed from the end of the area."
#[derive(Debug, Clone, Copy)]
pub struct TrailerLayout {
    pub align: usize,
    pub key_slot_len: usize,
    pub swap_size_off: usize,
    pub swap_info_off: usize,
    pub copy_done_off: usize,
    pub image_ok_off: usize,
    pub magic_off: usize,
    pub magic_len: usize,
    /// Start of the per-sector status region, i.e. the first byte of
    /// the trailer.
    pub status_off: usize,
    /// End of the status region (start of the key slots, or of
    /// `swap_size_off` when there are none).
    pub status_end: usize,
}

impl TrailerLayout {
    /// `area_size` and `align` determine every other offset. `num_status_bytes`
    /// is the maximum number of sector-status bytes the layout must
    /// reserve room for (one or two per sector, per spec §4.6), each
    /// padded to `align`.
    pub fn new(area_size: usize, align: usize, num_status_bytes: usize, has_enc_key: bool) -> Result<Self> {
        let magic_len = core::cmp::max(16, align);
        let magic_off = area_size.checked_sub(magic_len).ok_or(Error::BadArgs)?;
        let image_ok_off = magic_off.checked_sub(align).ok_or(Error::BadArgs)?;
        let copy_done_off = image_ok_off.checked_sub(align).ok_or(Error::BadArgs)?;
        let swap_info_off = copy_done_off.checked_sub(align).ok_or(Error::BadArgs)?;
        let swap_size_off = swap_info_off.checked_sub(align_up(4, align)).ok_or(Error::BadArgs)?;

        let key_slot_len = align_up(32, align);
        let keys_total = if has_enc_key { key_slot_len * 2 } else { 0 };
        let status_end = swap_size_off.checked_sub(keys_total).ok_or(Error::BadArgs)?;
        // Each status byte occupies one full write-aligned slot (see
        // `write_status_byte`'s `index * align` stride), not one raw byte.
        let status_region_len = num_status_bytes.checked_mul(align.max(1)).ok_or(Error::BadArgs)?;
        let status_off = status_end.checked_sub(status_region_len).ok_or(Error::BadArgs)?;

        Ok(TrailerLayout {
            align,
            key_slot_len,
            swap_size_off,
            swap_info_off,
            copy_done_off,
            image_ok_off,
            magic_off,
            magic_len,
            status_off,
            status_end,
        })
    }

    fn key_off(&self, key_index: usize) -> usize {
        self.swap_size_off - self.key_slot_len * (2 - key_index)
    }
}

/// `(magic_state, swap_type, image_index, copy_done, image_ok)`, the
/// tuple spec §4.5 specifies `read_swap_state` must return.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SwapState {
    pub magic: MagicState,
    pub swap_type: SwapType,
    pub image_index: u8,
    pub copy_done: BootFlag,
    pub image_ok: BootFlag,
}

fn read_flag_byte<M: FlashMap>(map: &mut M, area: FlashArea, off: usize, erased: u8) -> Result<BootFlag> {
    let mut b = [0u8; 1];
    map.read(area, off, &mut b)?;
    Ok(if b[0] == erased {
        BootFlag::Unset
    } else if b[0] == SET_VALUE {
        BootFlag::Set
    } else {
        BootFlag::Bad
    })
}

fn decode_swap_info(byte: u8, erased: u8) -> (SwapType, u8) {
    if byte == erased {
        return (SwapType::None, 0);
    }
    let swap_type = match byte & 0x0F {
        0 => SwapType::None,
        1 => SwapType::Test,
        2 => SwapType::Perm,
        3 => SwapType::Revert,
        4 => SwapType::Fail,
        _ => SwapType::None,
    };
    (swap_type, byte >> 4)
}

/// Read back the trailer's magic, swap-info, copy-done and image-ok
/// fields. If `magic` reads as erased, every other field defaults to
/// `Unset` without being read, per spec §4.5.
pub fn read_swap_state<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &TrailerLayout,
) -> Result<SwapState> {
    let erased = map.erased_val(area)?;

    let mut magic_buf = [0u8; 16];
    let read_len = core::cmp::min(layout.magic_len, 16);
    map.read(area, layout.magic_off, &mut magic_buf[..read_len])?;

    let magic = if magic_buf[..read_len] == TRAILER_MAGIC[..read_len] {
        MagicState::Good
    } else if magic_buf[..read_len].iter().all(|&b| b == erased) {
        MagicState::Unset
    } else {
        MagicState::Bad
    };

    if magic == MagicState::Unset {
        return Ok(SwapState {
            magic,
            swap_type: SwapType::None,
            image_index: 0,
            copy_done: BootFlag::Unset,
            image_ok: BootFlag::Unset,
        });
    }

    let mut swap_info_byte = [0u8; 1];
    map.read(area, layout.swap_info_off, &mut swap_info_byte)?;
    let (swap_type, image_index) = decode_swap_info(swap_info_byte[0], erased);

    let copy_done = read_flag_byte(map, area, layout.copy_done_off, erased)?;
    let image_ok = read_flag_byte(map, area, layout.image_ok_off, erased)?;

    Ok(SwapState {
        magic,
        swap_type,
        image_index,
        copy_done,
        image_ok,
    })
}

fn write_padded<M: FlashMap>(map: &mut M, area: FlashArea, off: usize, value: u8, align: usize) -> Result<()> {
    let mut buf = [0xFFu8; 64];
    let n = core::cmp::min(align.max(1), buf.len());
    buf[0] = value;
    for b in buf.iter_mut().take(n).skip(1) {
        *b = map.erased_val(area)?;
    }
    Ok(map.write(area, off, &buf[..n])?)
}

/// Read one status byte from the per-sector status region. `Ok(None)`
/// means the byte is still erased, i.e. that half-step has not run yet
/// (spec §4.6 "Recovery points: every status byte commits one
/// half-step").
pub fn read_status_byte<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &TrailerLayout,
    index: usize,
) -> Result<Option<u8>> {
    let erased = map.erased_val(area)?;
    let off = layout.status_off + index * layout.align.max(1);
    let mut buf = [0u8; 1];
    map.read(area, off, &mut buf)?;
    Ok(if buf[0] == erased { None } else { Some(buf[0]) })
}

/// Commit one swap half-step. Each call lands in its own aligned slot of
/// the status region so a reset can resume at exactly the right byte.
pub fn write_status_byte<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &TrailerLayout,
    index: usize,
    value: u8,
) -> Result<()> {
    let off = layout.status_off + index * layout.align.max(1);
    write_padded(map, area, off, value, layout.align)
}

/// How many status-byte slots this layout's status region has room for.
pub fn status_capacity(layout: &TrailerLayout) -> usize {
    (layout.status_end.saturating_sub(layout.status_off)) / layout.align.max(1)
}

/// One-shot `Unset -> Set` transition (spec §4.5 "write_image_ok").
pub fn write_image_ok<M: FlashMap>(map: &mut M, area: FlashArea, layout: &TrailerLayout) -> Result<()> {
    write_padded(map, area, layout.image_ok_off, SET_VALUE, layout.align)
}

/// Permitted only after the data copy for an upgrade has finished
/// (enforced by callers, not by this function, which is a thin field
/// write like its siblings).
pub fn write_copy_done<M: FlashMap>(map: &mut M, area: FlashArea, layout: &TrailerLayout) -> Result<()> {
    write_padded(map, area, layout.copy_done_off, SET_VALUE, layout.align)
}

pub fn write_swap_info<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &TrailerLayout,
    swap_type: SwapType,
    image_index: u8,
) -> Result<()> {
    let type_nibble: u8 = match swap_type {
        SwapType::None => 0,
        SwapType::Test => 1,
        SwapType::Perm => 2,
        SwapType::Revert => 3,
        SwapType::Fail => 4,
    };
    let byte = (image_index << 4) | type_nibble;
    write_padded(map, area, layout.swap_info_off, byte, layout.align)
}

pub fn write_swap_size<M: FlashMap>(map: &mut M, area: FlashArea, layout: &TrailerLayout, size: u32) -> Result<()> {
    Ok(map.write(area, layout.swap_size_off, &size.to_le_bytes())?)
}

/// Writes one of the (at most two) wrapped content-key slots. Must be
/// called, like `write_swap_size`, before `write_magic` (spec §4.5,
/// §9 write ordering).
pub fn write_enc_key<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    layout: &TrailerLayout,
    key_index: usize,
    key: &[u8],
) -> Result<()> {
    if key_index >= 2 || key.len() > layout.key_slot_len {
        return Err(Error::BadArgs);
    }
    Ok(map.write(area, layout.key_off(key_index), key)?)
}

/// The commit step: must be the last field written in a trailer
/// initialisation sequence (spec §4.5 "write_magic is the commit step
/// and happens last"; §9's `swap-size -> enc-key -> magic` ordering).
pub fn write_magic<M: FlashMap>(map: &mut M, area: FlashArea, layout: &TrailerLayout) -> Result<()> {
    Ok(map.write(area, layout.magic_off, &TRAILER_MAGIC[..layout.magic_len.min(16)])?)
}

/// Resolve the swap action for an image from its primary and secondary
/// trailer reads, per the table in spec §4.5. Any combination not
/// explicitly listed there is treated the same as a corrupt flag byte:
/// an unrecoverable trailer inconsistency (spec's PANIC outcome),
/// surfaced as `Error::BadStatus` rather than silently booted as `None`.
pub fn classify(primary: SwapState, secondary: SwapState) -> Result<SwapType> {
    match (primary.magic, primary.copy_done, primary.image_ok, secondary.magic) {
        (MagicState::Good, BootFlag::Set, BootFlag::Set, _) => Ok(SwapType::None),
        (MagicState::Good, BootFlag::Set, BootFlag::Unset, _) => Ok(SwapType::Revert),
        (_, _, _, MagicState::Good) if matches!(secondary.swap_type, SwapType::Test | SwapType::Perm) => {
            Ok(secondary.swap_type)
        }
        (MagicState::Unset, _, _, MagicState::Unset) => Ok(SwapType::None),
        (_, BootFlag::Bad, _, _) | (_, _, BootFlag::Bad, _) => Err(Error::BadStatus),
        _ => Err(Error::BadStatus),
    }
}
