//! Top-level orchestrator (spec §4.7).

use storage::area::{FlashArea, FlashMap};

use crate::dependency::{self, Dependency, ResolvedVersions};
use crate::encryption::ChunkDecrypt;
use crate::error::{Error, Result};
use crate::fih::{self, Cfi, DelayRandom};
use crate::image::{self, ImageHeader, ImageVersion};
use crate::rollback::RollbackPolicy;
use crate::shared_data::SharedDataWriter;
use crate::swap::{self, ActiveSwapEngine, BootStatus, SwapContext, SwapEngine};
use crate::trailer::{self, BootFlag, MagicState, SwapType, TrailerLayout};
use crate::validator::{self, ImagePolicy};

/// Fed after every chunk copy during a swap, and at other long-running
/// steps, so a platform watchdog never fires mid-boot (spec §5's
/// "logging and watchdog are the only permitted side-effects during
/// long operations").
pub trait Watchdog {
    fn feed(&mut self);
}

impl Watchdog for () {
    fn feed(&mut self) {}
}

/// `(flash_device_id, image_offset_within_device, header)`, the value
/// `boot_go` hands back to the platform launcher.
#[derive(Debug, Clone)]
pub struct BootResponse {
    pub flash_device_id: u8,
    pub image_offset_within_device: usize,
    pub header: ImageHeader,
}

/// One image's fixed pair of slots plus the sector/layout geometry
/// needed to drive a swap. The `boot_area_descs[]` table of spec §6 is
/// assumed already resolved into these by the platform at startup.
pub struct ImageSlots {
    pub image_index: u8,
    pub primary: FlashArea,
    pub secondary: FlashArea,
    pub sector_size: usize,
    pub trailer_align: usize,
    pub has_enc_key: bool,
}

impl ImageSlots {
    fn layout(&self, area: FlashArea, status_bytes: usize) -> Result<TrailerLayout> {
        TrailerLayout::new(area.size, self.trailer_align, status_bytes, self.has_enc_key)
    }

    /// Full byte length of the trailer at the end of `area`, for use as
    /// `parse_header`'s overflow bound -- not to be confused with
    /// `status_bytes`, which is only the per-sector progress region
    /// within it.
    fn trailer_size(&self, area: FlashArea, status_bytes: usize) -> Result<usize> {
        let layout = self.layout(area, status_bytes)?;
        Ok(area.size - layout.status_off)
    }
}

struct ResolvedSet<'a> {
    images: &'a [ImageSlots],
    versions: &'a [Option<ImageVersion>],
}

impl<'a> ResolvedVersions for ResolvedSet<'a> {
    fn version_of(&self, image_index: u8) -> Option<ImageVersion> {
        self.images
            .iter()
            .position(|i| i.image_index == image_index)
            .and_then(|idx| self.versions[idx])
    }
}

/// The engine context: CFI balance counter plus whatever the platform
/// provides for watchdog feeding and fault-injection delay. Owned by
/// the single outstanding `boot_go` call (spec §5's "no locking because
/// there is no other mutator").
pub struct BootLoader<W: Watchdog, D: DelayRandom> {
    cfi: Cfi,
    watchdog: W,
    delay: D,
}

impl<W: Watchdog, D: DelayRandom> BootLoader<W, D> {
    pub fn new(watchdog: W, delay: D) -> Self {
        BootLoader { cfi: Cfi::new(), watchdog, delay }
    }

    /// Drive every configured image through classification, dependency
    /// resolution, swap and re-validation, then return the jump target
    /// for image 0 (spec §4.7 step 7).
    pub fn boot_go<M: FlashMap>(
        &mut self,
        map: &mut M,
        images: &[ImageSlots],
        policy: &impl ImagePolicy,
        rollback: &mut impl RollbackPolicy,
        status_bytes_reserved: usize,
        shared_data: Option<&mut [u8]>,
    ) -> Result<BootResponse> {
        self.boot_go_for_image_id(map, images, policy, rollback, status_bytes_reserved, shared_data, 0)
    }

    /// As [`Self::boot_go`] but restricted to one image index, matching
    /// spec §6's `boot_go_for_image_id(i)`.
    pub fn boot_go_for_image_id<M: FlashMap>(
        &mut self,
        map: &mut M,
        images: &[ImageSlots],
        policy: &impl ImagePolicy,
        rollback: &mut impl RollbackPolicy,
        status_bytes_reserved: usize,
        mut shared_data: Option<&mut [u8]>,
        target_image_id: u8,
    ) -> Result<BootResponse> {
        self.cfi.enter();

        let mut resolved_versions: heapless::Vec<Option<ImageVersion>, 8> = heapless::Vec::new();
        for _ in images {
            let _ = resolved_versions.push(None);
        }

        let mut swap_types: heapless::Vec<SwapType, 8> = heapless::Vec::new();
        let mut deps_by_image: heapless::Vec<heapless::Vec<Dependency, 8>, 8> = heapless::Vec::new();

        // Step 2: classify every image, finishing any interrupted swap first.
        for (idx, slot) in images.iter().enumerate() {
            let primary_layout = slot.layout(slot.primary, status_bytes_reserved)?;
            let secondary_layout = slot.layout(slot.secondary, status_bytes_reserved)?;

            let in_progress = (0..trailer::status_capacity(&primary_layout))
                .map(|i| trailer::read_status_byte(map, slot.primary, &primary_layout, i))
                .collect::<Result<heapless::Vec<_, 32>>>()?
                .iter()
                .any(|b| b.is_some());

            let primary_state = trailer::read_swap_state(map, slot.primary, &primary_layout)?;
            let secondary_state = trailer::read_swap_state(map, slot.secondary, &secondary_layout)?;

            let mut swap_type = trailer::classify(primary_state, secondary_state)?;

            if in_progress {
                self.finish_swap(map, slot, swap_type, status_bytes_reserved)?;
                swap_type = SwapType::None;
            }

            let primary_trailer_size = slot.trailer_size(slot.primary, status_bytes_reserved)?;
            let secondary_trailer_size = slot.trailer_size(slot.secondary, status_bytes_reserved)?;
            let header = image::parse_header(map, slot.primary, primary_trailer_size)
                .or_else(|_| image::parse_header(map, slot.secondary, secondary_trailer_size));
            if let Ok(h) = header {
                resolved_versions[idx] = Some(h.version);
            }
            let _ = swap_types.push(swap_type);

            let deps = if swap_type != SwapType::None {
                let h = image::parse_header(map, slot.secondary, secondary_trailer_size)?;
                dependency::read_dependencies(map, &h, slot.secondary)?
            } else {
                heapless::Vec::new()
            };
            let _ = deps_by_image.push(deps);
        }

        // Step 3: downgrade swaps whose dependencies are unmet.
        let resolved = ResolvedSet { images, versions: &resolved_versions };
        for idx in 0..images.len() {
            swap_types[idx] = dependency::check_dependencies(&deps_by_image[idx], &resolved, swap_types[idx]);
        }

        // Step 4: for a swap that needs the secondary slot (TEST/PERM),
        // validate it first; failure downgrades the choice to FAIL with
        // no swap performed and the staging slot scrambled (spec §4.5
        // "the Validator runs against the secondary slot first; failure
        // downgrades the choice to FAIL"). Then drive the swap engine
        // for every image whose (possibly downgraded) type is non-NONE.
        for (idx, slot) in images.iter().enumerate() {
            let mut swap_type = swap_types[idx];
            if swap_type == SwapType::None {
                continue;
            }

            if matches!(swap_type, SwapType::Test | SwapType::Perm) {
                let secondary_trailer_size = slot.trailer_size(slot.secondary, status_bytes_reserved)?;
                let secondary_header = image::parse_header(map, slot.secondary, secondary_trailer_size)?;
                let valid = match validator::validate(
                    map,
                    &secondary_header,
                    slot.secondary,
                    slot.image_index,
                    policy,
                    &*rollback,
                    None::<&mut crate::encryption::NoDecrypt>,
                    &mut self.delay,
                ) {
                    Ok(result) => fih::fih_eq(result, fih::FIH_SUCCESS, &mut self.delay),
                    Err(_) => false,
                };
                if !valid {
                    swap_type = SwapType::Fail;
                }
            }
            swap_types[idx] = swap_type;

            let primary_layout = slot.layout(slot.primary, status_bytes_reserved)?;

            if swap_type == SwapType::Fail {
                // No swap runs for a rejected staging image (spec §4.5);
                // the bad image is erased and the primary's own
                // image-ok is (re-)asserted so no spurious revert is
                // attempted next boot (spec §4.7 step 4).
                map.scramble(slot.secondary)?;
                trailer::write_image_ok(map, slot.primary, &primary_layout)?;
                continue;
            }

            self.run_swap(map, slot, status_bytes_reserved)?;
            self.watchdog.feed();

            if swap_type == SwapType::Perm {
                // The new image now occupies the primary; mark it
                // confirmed immediately rather than waiting on an
                // explicit mark_confirmed call (spec §3's lifecycle
                // rule: a permanent swap never reverts), and adopt its
                // declared security counter (spec §4.7 step 4).
                trailer::write_image_ok(map, slot.primary, &primary_layout)?;

                let trailer_size = slot.trailer_size(slot.primary, status_bytes_reserved)?;
                let header = image::parse_header(map, slot.primary, trailer_size)?;
                if let Some(entry) = crate::tlv::iter_tlvs(map, &header, slot.primary, Some(crate::tlv::types::SECURITY_COUNTER), true)?
                    .next()
                    .transpose()?
                {
                    let mut buf = [0u8; 4];
                    if entry.len as usize == 4 {
                        crate::tlv::read_value(map, slot.primary, &entry, &mut buf)?;
                        let new_counter = u32::from_le_bytes(buf);
                        if new_counter > rollback.counter(slot.image_index)? {
                            rollback.set_counter(slot.image_index, new_counter)?;
                        }
                    }
                }
            }
        }

        // Step 5: re-validate primaries, update counters, push shared data.
        let mut first_response: Option<BootResponse> = None;
        for (idx, slot) in images.iter().enumerate() {
            let primary_layout = slot.layout(slot.primary, status_bytes_reserved)?;
            let header = image::parse_header(map, slot.primary, slot.trailer_size(slot.primary, status_bytes_reserved)?)?;

            #[cfg(feature = "validate-primary")]
            {
                let result = validator::validate(
                    map,
                    &header,
                    slot.primary,
                    slot.image_index,
                    policy,
                    &*rollback,
                    None::<&mut crate::encryption::NoDecrypt>,
                    &mut self.delay,
                )?;
                if !fih::fih_eq(result, fih::FIH_SUCCESS, &mut self.delay) {
                    return Err(Error::InvalidImage);
                }
            }
            #[cfg(not(feature = "validate-primary"))]
            {
                if header.magic != image::IMAGE_MAGIC {
                    return Err(Error::BadImage);
                }
            }

            let counter = rollback.counter(slot.image_index)?;
            rollback.set_counter(slot.image_index, counter)?;
            let _ = rollback.lock(slot.image_index);

            if let Some(buf) = shared_data.as_deref_mut() {
                if let Ok(mut w) = SharedDataWriter::new(buf) {
                    let _ = w.push_image_version(&header.version);
                }
            }

            if slot.image_index == target_image_id && first_response.is_none() {
                first_response = Some(BootResponse {
                    flash_device_id: slot.primary.device_id,
                    image_offset_within_device: slot.primary.offset,
                    header,
                });
            }

            let _ = primary_layout;
        }

        // Step 6: zero any in-RAM key material.
        let mut status = BootStatus::default();
        status.zeroize_keys();

        self.cfi.exit();
        if !self.cfi.is_balanced() {
            return Err(Error::Panic);
        }

        first_response.ok_or(Error::NoBootableImage)
    }

    fn run_swap<M: FlashMap>(&mut self, map: &mut M, slot: &ImageSlots, status_bytes: usize) -> Result<()> {
        let primary_layout = slot.layout(slot.primary, status_bytes)?;
        let secondary_layout = slot.layout(slot.secondary, status_bytes)?;
        let image_sectors = (slot.secondary.size / slot.sector_size).max(1);

        let ctx = SwapContext {
            primary: slot.primary,
            secondary: slot.secondary,
            primary_layout,
            secondary_layout,
            sector_size: slot.sector_size,
            image_sectors,
            encrypted_header_size: None,
            secondary_header_shift: 0,
        };
        let mut status = BootStatus::default();
        ActiveSwapEngine::run(map, &ctx, &mut status)
    }

    fn finish_swap<M: FlashMap>(
        &mut self,
        map: &mut M,
        slot: &ImageSlots,
        _classified: SwapType,
        status_bytes: usize,
    ) -> Result<()> {
        self.run_swap(map, slot, status_bytes)
    }
}

#[cfg(feature = "direct-xip")]
pub mod direct_xip {
    //! No copy is ever performed; the highest-versioned valid slot wins
    //! (spec §4.7 "Direct-XIP").

    use super::*;

    pub fn pick_slot<M: FlashMap>(
        map: &mut M,
        primary: FlashArea,
        secondary: FlashArea,
        primary_layout: &TrailerLayout,
        trailer_size: usize,
    ) -> Result<FlashArea> {
        let primary_state = trailer::read_swap_state(map, primary, primary_layout)?;
        // A one-shot trial that was never confirmed: scramble it and
        // fall back to the other slot.
        if primary_state.magic == MagicState::Good
            && primary_state.copy_done == BootFlag::Set
            && primary_state.image_ok == BootFlag::Unset
        {
            map.scramble(primary)?;
            return Ok(secondary);
        }

        let primary_header = image::parse_header(map, primary, trailer_size);
        let secondary_header = image::parse_header(map, secondary, trailer_size);
        match (primary_header, secondary_header) {
            (Ok(p), Ok(s)) if s.version > p.version => Ok(secondary),
            (Ok(_), _) => Ok(primary),
            (Err(_), Ok(_)) => Ok(secondary),
            (Err(e), Err(_)) => Err(e),
        }
    }
}

#[cfg(feature = "ram-load")]
pub mod ram_load {
    //! Copies the chosen slot into a platform-provided executable RAM
    //! region, decrypting as it goes, then validates in place (spec
    //! §4.7 "RAM-load").

    use super::*;

    pub fn load_into_ram<M: FlashMap>(
        map: &mut M,
        area: FlashArea,
        header: &ImageHeader,
        ram: &mut [u8],
        mut decrypt: Option<&mut impl ChunkDecrypt>,
    ) -> Result<()> {
        let total = header.body_and_protected_end()? as usize;
        if ram.len() < total {
            return Err(Error::NoMemory);
        }
        map.read(area, 0, &mut ram[..total])?;
        if let Some(cipher) = decrypt.as_deref_mut() {
            let body_start = header.hdr_size as usize;
            let body_end = total.min(ram.len());
            if body_end > body_start {
                cipher.decrypt_chunk(0, &mut ram[body_start..body_end])?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "firmware-loader")]
pub mod firmware_loader {
    //! Boots the secondary (recovery) slot unconditionally when a
    //! platform-asserted recovery signal is set (spec §4.7
    //! "Firmware-loader").

    use super::*;

    pub fn recovery_requested(signal: bool) -> bool {
        signal
    }

    pub fn recovery_response<M: FlashMap>(map: &mut M, secondary: FlashArea, trailer_size: usize) -> Result<BootResponse> {
        let header = image::parse_header(map, secondary, trailer_size)?;
        Ok(BootResponse {
            flash_device_id: secondary.device_id,
            image_offset_within_device: secondary.offset,
            header,
        })
    }
}
