//! Image header parsing (spec §3 "ImageHeader", §4.2 "ImageFormat").

use asraw::{AsMutRaw, AsRaw};
use storage::area::{FlashArea, FlashMap};

use crate::error::{Error, Result};

/// The image header contains the following magic value, indicating the
/// interpretation of the rest of the image header.
pub const IMAGE_MAGIC: u32 = 0x96F3_B83C;

pub const IMAGE_F_PIC: u32 = 0x0000_0001;
pub const IMAGE_F_ENCRYPTED: u32 = 0x0000_0004;
pub const IMAGE_F_NON_BOOTABLE: u32 = 0x0000_0010;
pub const IMAGE_F_RAM_LOAD: u32 = 0x0000_0020;
pub const IMAGE_F_ROM_FIXED: u32 = 0x0000_0100;
pub const IMAGE_F_COMPRESSED: u32 = 0x0000_0200;

/// Each image has a version. A pseudo-semantic version used to determine
/// upgrade eligibility and compatibility between multi-image setups.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, PartialOrd, Ord)]
#[repr(C)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u16,
    pub build_num: u32,
}

impl AsRaw for ImageVersion {}
unsafe impl AsMutRaw for ImageVersion {}

/// The image begins with this fixed 32-byte header, interpreted as a C
/// struct. All multi-byte fields are little-endian on the target, which
/// in practice means the repr(C) overlay used here (matching the
/// teacher's `AsRaw`/`AsMutRaw` approach) is only valid on little-endian
/// hosts -- true of every architecture mcuboot actually ships on.
#[derive(Debug, Default, Clone, Copy)]
#[repr(C)]
pub struct ImageHeader {
    pub magic: u32,
    /// The address to load this image at, for RAM-loaded images. Ignored
    /// otherwise.
    pub load_addr: u32,
    /// The size of the header itself, including any padding before the
    /// body.
    pub hdr_size: u16,
    /// The size of the protected TLV block, in bytes.
    pub protected_tlv_size: u16,
    /// The size of the image body, not counting the header or TLVs.
    pub img_size: u32,
    /// IMAGE_F_* flags.
    pub flags: u32,
    pub version: ImageVersion,
    /// Index of this image within the dependency graph (spec §3).
    pub image_index: u32,
}

impl AsRaw for ImageHeader {}
unsafe impl AsMutRaw for ImageHeader {}

impl ImageHeader {
    /// `header_size + body_size + protected_tlv_size`, i.e. everything up
    /// to (but not including) the unprotected TLV block. Checked against
    /// 32-bit overflow per spec §3's invariant.
    pub fn body_and_protected_end(&self) -> Result<u32> {
        (self.hdr_size as u32)
            .checked_add(self.img_size)
            .and_then(|v| v.checked_add(self.protected_tlv_size as u32))
            .ok_or(Error::BadImage)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & IMAGE_F_ENCRYPTED != 0
    }

    pub fn is_non_bootable(&self) -> bool {
        self.flags & IMAGE_F_NON_BOOTABLE != 0
    }

    pub fn is_ram_load(&self) -> bool {
        self.flags & IMAGE_F_RAM_LOAD != 0
    }

    pub fn is_rom_fixed(&self) -> bool {
        self.flags & IMAGE_F_ROM_FIXED != 0
    }
}

/// Read the 32-byte header at the start of `area` and sanity-check it.
/// Rejects headers whose size fields would overflow the area (spec §4.2).
pub fn parse_header<M: FlashMap>(
    map: &mut M,
    area: FlashArea,
    trailer_size: usize,
) -> Result<ImageHeader> {
    let mut header = ImageHeader::default();
    map.read(area, 0, header.as_mut_raw())?;

    if header.magic != IMAGE_MAGIC {
        return Err(Error::BadImage);
    }

    let used = header.body_and_protected_end()?;
    let capacity = area
        .size
        .checked_sub(trailer_size)
        .ok_or(Error::BadArgs)?;
    if used as usize > capacity {
        return Err(Error::BadImage);
    }

    Ok(header)
}

/// True when the first 32 bytes of `area` are all the device's erased
/// byte, i.e. no image has ever been written here.
pub fn header_erased<M: FlashMap>(map: &mut M, area: FlashArea) -> Result<bool> {
    let erased = map.erased_val(area)?;
    let mut buf = [0u8; 32];
    map.read(area, 0, &mut buf)?;
    Ok(buf.iter().all(|&b| b == erased))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_and_protected_end_overflows_cleanly() {
        let hdr = ImageHeader {
            magic: IMAGE_MAGIC,
            hdr_size: 0xFFFF,
            img_size: 0xFFFF_FFFF,
            protected_tlv_size: 0xFFFF,
            ..Default::default()
        };
        assert_eq!(hdr.body_and_protected_end(), Err(Error::BadImage));
    }

    #[test]
    fn flag_helpers() {
        let hdr = ImageHeader {
            flags: IMAGE_F_ENCRYPTED | IMAGE_F_RAM_LOAD,
            ..Default::default()
        };
        assert!(hdr.is_encrypted());
        assert!(hdr.is_ram_load());
        assert!(!hdr.is_non_bootable());
        assert!(!hdr.is_rom_fixed());
    }
}
