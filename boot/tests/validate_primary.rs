#![cfg(feature = "validate-primary")]
//! Signature verification against the hosted simulator, compiled only
//! when the full validation pipeline (rather than a bare magic check)
//! is enabled.

use boot::encryption::NoDecrypt;
use boot::fih::{self, SpinDelay};
use boot::rollback::NoRollback;
use boot::validator::{self, ImagePolicy};
use boot::image;
use simflash::gen::{test_verifying_key, GenBuilder};
use simflash::{SimFlash, SimMap};
use storage::area::{BootAreaDesc, FlashArea, FlashMap};

struct SignedPolicy {
    key: Vec<u8>,
}

impl ImagePolicy for SignedPolicy {
    fn public_key(&self, _image_index: u8) -> &[u8] {
        &self.key
    }
}

fn build_map(image: &[u8]) -> (SimMap, FlashArea) {
    const SECTOR: usize = 1024;
    let sectors = (image.len() + SECTOR - 1) / SECTOR + 4; // room for the trailer tail.
    let dev = SimFlash::new(1, 8, SECTOR, sectors).unwrap();
    let desc = BootAreaDesc { id: 1, device_id: 0, offset: 0, size: sectors * SECTOR };
    let mut map = SimMap::new(vec![dev], vec![desc]);
    let area = FlashArea::from(desc);

    let mut data = image.to_vec();
    while data.len() % 8 != 0 {
        data.push(0xFF);
    }
    map.write(area, 0, &data).unwrap();
    (map, area)
}

#[test]
fn correctly_signed_image_validates() {
    let image = GenBuilder::default().version("1.0.0").seed(1).size(512).build().unwrap().data;
    let (mut map, area) = build_map(&image);
    let header = image::parse_header(&mut map, area, 0).unwrap();
    let policy = SignedPolicy { key: test_verifying_key() };
    let rollback = NoRollback;
    let mut delay = SpinDelay;

    let result = validator::validate(
        &mut map,
        &header,
        area,
        0,
        &policy,
        &rollback,
        None::<&mut NoDecrypt>,
        &mut delay,
    )
    .unwrap();
    assert!(fih::fih_eq(result, fih::FIH_SUCCESS, &mut delay));
}

#[test]
fn tampered_body_is_rejected() {
    let mut image = GenBuilder::default().version("1.0.0").seed(1).size(512).build().unwrap().data;
    // Flip a byte inside the body, after the hash and signature were
    // computed over the original bytes.
    image[300] ^= 0xFF;
    let (mut map, area) = build_map(&image);
    let header = image::parse_header(&mut map, area, 0).unwrap();
    let policy = SignedPolicy { key: test_verifying_key() };
    let rollback = NoRollback;
    let mut delay = SpinDelay;

    let result = validator::validate(
        &mut map,
        &header,
        area,
        0,
        &policy,
        &rollback,
        None::<&mut NoDecrypt>,
        &mut delay,
    );
    assert!(result.is_err());
}

#[test]
fn malformed_public_key_is_rejected() {
    let image = GenBuilder::default().version("1.0.0").seed(1).size(512).build().unwrap().data;
    let (mut map, area) = build_map(&image);
    let header = image::parse_header(&mut map, area, 0).unwrap();
    // An uncompressed SEC1 point that is not the signer's: same shape,
    // wrong key, every byte past the 0x04 prefix zeroed.
    let mut wrong_key = test_verifying_key();
    for b in wrong_key.iter_mut().skip(1) {
        *b = 0;
    }
    let policy = SignedPolicy { key: wrong_key };
    let rollback = NoRollback;
    let mut delay = SpinDelay;

    let result = validator::validate(
        &mut map,
        &header,
        area,
        0,
        &policy,
        &rollback,
        None::<&mut NoDecrypt>,
        &mut delay,
    );
    assert!(result.is_err());
}
