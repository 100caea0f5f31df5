//! Test image generation.
//!
//! Builds a signed image entirely in-process, in the same byte layout
//! `boot` parses: a fixed 32-byte header, the body, and an unprotected
//! TLV block carrying the SHA-256 hash and an ECDSA P-256 signature.
//! There is no `boot` dependency here (the format is small enough to
//! reproduce directly, and it keeps this crate usable without pulling in
//! the bootloader's own feature set).

use ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use sha2::{Digest, Sha256};

const IMAGE_MAGIC: u32 = 0x96F3_B83C;
const TLV_INFO_MAGIC: u16 = 0x6907;
const TLV_SHA256: u8 = 0x10;
const TLV_ECDSA_P256: u8 = 0x22;

/// Fixed test signing key, derived from a constant seed so every build of
/// the simulator trusts the same key without shipping key material on
/// disk. Not for anything but hosted tests.
fn test_signing_key() -> SigningKey {
    let seed: [u8; 32] = Sha256::digest(b"simflash fixed test signing key").into();
    SigningKey::from_bytes(&seed.into()).expect("fixed seed is a valid P-256 scalar")
}

/// SEC1 uncompressed public key bytes for [`test_signing_key`], the form
/// `ImagePolicy::public_key` expects.
pub fn test_verifying_key() -> Vec<u8> {
    let verifying = p256::ecdsa::VerifyingKey::from(&test_signing_key());
    verifying.to_encoded_point(false).as_bytes().to_vec()
}

fn tlv_entry(kind: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + value.len());
    out.push(kind);
    out.push(0);
    out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    out.extend_from_slice(value);
    out
}

fn parse_version(version: &str) -> (u8, u8, u16) {
    let mut parts = version.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let revision = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor, revision)
}

pub struct GeneratedImage {
    pub data: Vec<u8>,
}

pub struct GenBuilder {
    /// Size of the zero-padded header, including the raw 32-byte struct.
    header_size: usize,
    /// Size of the image body, not counting the header or TLVs.
    size: usize,
    /// Seed for the body PRNG.
    seed: usize,
    version: String,
    image_index: u32,
}

impl Default for GenBuilder {
    fn default() -> Self {
        GenBuilder {
            header_size: 256,
            size: 76_137,
            seed: 1,
            version: "0.1.0".to_string(),
            image_index: 0,
        }
    }
}

impl GenBuilder {
    pub fn size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    pub fn seed(&mut self, seed: usize) -> &mut Self {
        self.seed = seed;
        self
    }

    pub fn version(&mut self, version: &str) -> &mut Self {
        self.version = version.to_string();
        self
    }

    pub fn image_index(&mut self, image_index: u32) -> &mut Self {
        self.image_index = image_index;
        self
    }

    pub fn build(&self) -> anyhow::Result<GeneratedImage> {
        if self.header_size < 32 {
            return Err(anyhow::anyhow!("header_size must hold at least the 32-byte header struct"));
        }

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed as u64);
        let mut body = vec![0u8; self.size];
        rng.fill_bytes(&mut body);

        let (major, minor, revision) = parse_version(&self.version);

        let mut header = [0u8; 32];
        header[0..4].copy_from_slice(&IMAGE_MAGIC.to_le_bytes());
        // load_addr left zero; this format is position-independent by default.
        header[8..10].copy_from_slice(&(self.header_size as u16).to_le_bytes());
        // protected_tlv_size stays zero: this generator never emits protected TLVs.
        header[12..16].copy_from_slice(&(self.size as u32).to_le_bytes());
        // flags stays zero.
        header[20] = major;
        header[21] = minor;
        header[22..24].copy_from_slice(&revision.to_le_bytes());
        // build_num stays zero.
        header[28..32].copy_from_slice(&self.image_index.to_le_bytes());

        let mut image = Vec::with_capacity(self.header_size + self.size + 64);
        image.extend_from_slice(&header);
        image.resize(self.header_size, 0);
        image.extend_from_slice(&body);

        let hash: [u8; 32] = Sha256::digest(&image).into();
        let signature: Signature = test_signing_key().sign_prehash(&hash)?;

        let mut entries = tlv_entry(TLV_SHA256, &hash);
        entries.extend(tlv_entry(TLV_ECDSA_P256, signature.to_der().as_bytes()));

        image.extend_from_slice(&TLV_INFO_MAGIC.to_le_bytes());
        image.extend_from_slice(&((entries.len() + 4) as u16).to_le_bytes());
        image.extend_from_slice(&entries);

        Ok(GeneratedImage { data: image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_is_deterministic_for_a_fixed_seed() {
        let a = GenBuilder::default().seed(7).build().unwrap();
        let b = GenBuilder::default().seed(7).build().unwrap();
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn different_seeds_produce_different_bodies() {
        let a = GenBuilder::default().seed(1).build().unwrap();
        let b = GenBuilder::default().seed(2).build().unwrap();
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn header_carries_the_requested_version_and_size() {
        let img = GenBuilder::default().size(1024).version("3.2.1").build().unwrap();
        assert_eq!(&img.data[20..24], &[3, 2, 1, 0]);
        assert_eq!(u32::from_le_bytes(img.data[12..16].try_into().unwrap()), 1024);
    }
}
