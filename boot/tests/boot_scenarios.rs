//! End-to-end boot scenarios against the hosted simulator: a slot pair
//! big enough for move-swap (primary holds one more sector than
//! secondary), driven entirely through the public `boot_go` entry point.

use boot::fih::SpinDelay;
use boot::rollback::NoRollback;
use boot::validator::ImagePolicy;
use boot::{pending, trailer, BootLoader, Error, ImageSlots};
use simflash::gen::{test_verifying_key, GenBuilder};
use storage::area::{BootAreaDesc, FlashArea, FlashMap};
use simflash::{SimFlash, SimMap};

const SECTOR: usize = 1024;
const N: usize = 3;
const ALIGN: usize = 8;
const STATUS_BYTES: usize = 3 * N; // move-swap: N phase-A bytes + 2N phase-B bytes.
const PRIMARY_SIZE: usize = SECTOR * (N + 1);
const SECONDARY_SIZE: usize = SECTOR * N;

/// The staged image the swap engine is about to adopt is now validated
/// before the copy runs (spec §4.5), so the policy needs a key that
/// actually matches what `install()`'s generator signs with.
struct AcceptAll {
    key: Vec<u8>,
}

impl Default for AcceptAll {
    fn default() -> Self {
        AcceptAll { key: test_verifying_key() }
    }
}

impl ImagePolicy for AcceptAll {
    fn signing_required(&self) -> bool {
        false
    }
    fn public_key(&self, _image_index: u8) -> &[u8] {
        &self.key
    }
}

fn setup() -> (SimMap, ImageSlots) {
    let dev = SimFlash::new(1, ALIGN, SECTOR, N + 1 + N).unwrap();
    let primary = BootAreaDesc { id: 1, device_id: 0, offset: 0, size: PRIMARY_SIZE };
    let secondary = BootAreaDesc { id: 2, device_id: 0, offset: PRIMARY_SIZE, size: SECONDARY_SIZE };
    let map = SimMap::new(vec![dev], vec![primary, secondary]);

    let slot = ImageSlots {
        image_index: 0,
        primary: FlashArea::from(primary),
        secondary: FlashArea::from(secondary),
        sector_size: SECTOR,
        trailer_align: ALIGN,
        has_enc_key: false,
    };
    (map, slot)
}

fn layout(area: FlashArea) -> trailer::TrailerLayout {
    trailer::TrailerLayout::new(area.size, ALIGN, STATUS_BYTES, false).unwrap()
}

fn install(map: &mut SimMap, area: FlashArea, version: &str, seed: usize) {
    let mut image = GenBuilder::default().version(version).seed(seed).size(512).build().unwrap().data;
    while image.len() % ALIGN != 0 {
        image.push(0xFF);
    }
    map.write(area, 0, &image).unwrap();
}

fn boot(map: &mut SimMap, slot: &ImageSlots) -> boot::Result<boot::BootResponse> {
    let mut loader = BootLoader::new((), SpinDelay);
    let mut rollback = NoRollback;
    let policy = AcceptAll::default();
    loader.boot_go(map, std::slice::from_ref(slot), &policy, &mut rollback, STATUS_BYTES, None)
}

#[test]
fn normal_boot_with_no_pending_upgrade() {
    let (mut map, slot) = setup();
    install(&mut map, slot.primary, "1.0.0", 1);

    let resp = boot(&mut map, &slot).unwrap();
    assert_eq!((resp.header.version.major, resp.header.version.minor), (1, 0));
}

#[test]
fn unconfirmed_test_upgrade_reverts_on_next_boot() {
    let (mut map, slot) = setup();
    install(&mut map, slot.primary, "1.0.0", 1);
    install(&mut map, slot.secondary, "2.0.0", 2);
    pending::mark_pending(&mut map, slot.secondary, &layout(slot.secondary), 0, false).unwrap();

    let upgraded = boot(&mut map, &slot).unwrap();
    assert_eq!(upgraded.header.version.major, 2, "first boot should swap the staged image in");

    let reverted = boot(&mut map, &slot).unwrap();
    assert_eq!(reverted.header.version.major, 1, "an unconfirmed test swap must revert on the next boot");
}

#[test]
fn confirming_a_test_upgrade_keeps_it_active() {
    let (mut map, slot) = setup();
    install(&mut map, slot.primary, "1.0.0", 1);
    install(&mut map, slot.secondary, "2.0.0", 2);
    pending::mark_pending(&mut map, slot.secondary, &layout(slot.secondary), 0, false).unwrap();

    boot(&mut map, &slot).unwrap();
    pending::mark_confirmed(&mut map, slot.primary, &layout(slot.primary)).unwrap();

    let confirmed = boot(&mut map, &slot).unwrap();
    assert_eq!(confirmed.header.version.major, 2, "a confirmed image must not revert");
}

#[test]
fn permanent_upgrade_auto_confirms_without_explicit_confirmation() {
    let (mut map, slot) = setup();
    install(&mut map, slot.primary, "1.0.0", 1);
    install(&mut map, slot.secondary, "2.0.0", 2);
    pending::mark_pending(&mut map, slot.secondary, &layout(slot.secondary), 0, true).unwrap();

    let upgraded = boot(&mut map, &slot).unwrap();
    assert_eq!(upgraded.header.version.major, 2);

    // `permanent` sets image-ok itself as soon as the copy completes
    // (spec §3's lifecycle rule), so no explicit mark_confirmed call is
    // needed to avoid a revert on the next boot.
    let next_boot = boot(&mut map, &slot).unwrap();
    assert_eq!(next_boot.header.version.major, 2, "a permanent swap must not revert even without confirmation");
}

#[test]
fn power_fail_after_first_sector_move_resumes_to_completion() {
    let (mut map, slot) = setup();
    install(&mut map, slot.primary, "1.0.0", 1);
    install(&mut map, slot.secondary, "2.0.0", 2);
    pending::mark_pending(&mut map, slot.secondary, &layout(slot.secondary), 0, false).unwrap();

    // Perform exactly what MoveSwap's first phase-A iteration would have
    // done (primary[N-1] -> primary[N]), then record its status byte, to
    // simulate a reset right after that write landed.
    let primary_layout = layout(slot.primary);
    let mut buf = vec![0u8; SECTOR];
    map.read(slot.primary, (N - 1) * SECTOR, &mut buf).unwrap();
    map.erase(slot.primary, N * SECTOR, SECTOR).unwrap();
    map.write(slot.primary, N * SECTOR, &buf).unwrap();
    trailer::write_status_byte(&mut map, slot.primary, &primary_layout, 0, 1).unwrap();

    let resp = boot(&mut map, &slot).unwrap();
    assert_eq!(resp.header.version.major, 2, "boot_go must finish the interrupted swap, not restart or abandon it");
}

#[test]
fn bad_status_byte_is_rejected() {
    let (mut map, slot) = setup();
    install(&mut map, slot.primary, "1.0.0", 1);
    let primary_layout = layout(slot.primary);
    trailer::write_magic(&mut map, slot.primary, &primary_layout).unwrap();
    // Neither erased nor SET_VALUE: a corrupted copy-done byte. Padded to
    // a full write-aligned slot like every other trailer field write.
    let mut corrupt = [0xFFu8; ALIGN];
    corrupt[0] = 0x42;
    map.write(slot.primary, primary_layout.copy_done_off, &corrupt).unwrap();

    assert!(matches!(boot(&mut map, &slot), Err(Error::BadStatus)));
}
