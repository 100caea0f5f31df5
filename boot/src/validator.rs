//! Image content and signature validation (spec §4.3).
//!
//! The signature scheme is a build-time choice (spec §9 "Dynamic
//! dispatch" is a Non-goal): exactly one `sig-*` feature is expected to
//! be enabled, and this module exposes a single [`verify_signature`]
//! whose body is selected by `cfg`.

use sha2::{Digest, Sha256};
use storage::area::{FlashArea, FlashMap};

use crate::encryption::ChunkDecrypt;
use crate::error::{Error, Result};
use crate::fih::{self, DelayRandom, FihInt};
use crate::image::ImageHeader;
use crate::rollback::RollbackPolicy;
use crate::tlv::{self, types};

const CHUNK_SIZE: usize = 256;

#[cfg(feature = "sig-rsa2048")]
pub const SIGNATURE_TLV_TYPE: u8 = types::RSA2048;
#[cfg(feature = "sig-rsa3072")]
pub const SIGNATURE_TLV_TYPE: u8 = types::RSA3072;
#[cfg(feature = "sig-ecdsa-p256")]
pub const SIGNATURE_TLV_TYPE: u8 = types::ECDSA_P256;
#[cfg(feature = "sig-ed25519")]
pub const SIGNATURE_TLV_TYPE: u8 = types::ED25519;

/// Platform-supplied policy for decisions the engine cannot make on its
/// own: whether a signature is mandatory, whether the hardware security
/// counter is enforced, and which vendor/class UUID pairs may boot on
/// this device (spec §4.3 steps 3-5).
pub trait ImagePolicy {
    fn signing_required(&self) -> bool {
        true
    }
    fn security_counter_required(&self) -> bool {
        false
    }
    fn uuid_checks_enabled(&self) -> bool {
        false
    }
    fn allow_image(&self, image_index: u8, vendor_uuid: Option<[u8; 16]>, class_uuid: Option<[u8; 16]>) -> bool {
        let _ = (image_index, vendor_uuid, class_uuid);
        true
    }
    /// The public key to verify this image's signature TLV against.
    fn public_key(&self, image_index: u8) -> &[u8];
}

/// Compute the SHA-256 over header + padding + body + protected-TLV
/// block, streaming through `area` in fixed-size chunks so no full-image
/// buffer is ever required (spec §4.3 step 1). `decrypt` is consulted
/// per chunk when the header's encrypted flag is set; `None` otherwise.
pub fn compute_hash<M: FlashMap>(
    map: &mut M,
    header: &ImageHeader,
    area: FlashArea,
    mut decrypt: Option<&mut impl ChunkDecrypt>,
) -> Result<[u8; 32]> {
    let end = header.body_and_protected_end()?;
    let mut hasher = Sha256::new();
    let mut offset: u32 = 0;
    let mut buf = [0u8; CHUNK_SIZE];

    while offset < end {
        let n = core::cmp::min(CHUNK_SIZE as u32, end - offset) as usize;
        map.read(area, offset as usize, &mut buf[..n])?;

        let body_start = header.hdr_size as u32;
        if let Some(cipher) = decrypt.as_deref_mut() {
            if offset + n as u32 > body_start {
                let chunk_body_start = offset.max(body_start);
                let skip = (chunk_body_start - offset) as usize;
                let body_offset = chunk_body_start - body_start;
                cipher.decrypt_chunk(body_offset, &mut buf[skip..n])?;
            }
        }

        hasher.update(&buf[..n]);
        offset += n as u32;
    }

    Ok(hasher.finalize().into())
}

#[cfg(feature = "sig-rsa2048")]
fn verify_signature(key_bytes: &[u8], hash: &[u8; 32], sig: &[u8]) -> bool {
    use rsa::pkcs1v15::Pkcs1v15Sign;
    use rsa::RsaPublicKey;

    let key = match RsaPublicKey::from_pkcs1_der(key_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };
    key.verify(Pkcs1v15Sign::new::<Sha256>(), hash, sig).is_ok()
}

#[cfg(feature = "sig-rsa3072")]
fn verify_signature(key_bytes: &[u8], hash: &[u8; 32], sig: &[u8]) -> bool {
    use rsa::pkcs1v15::Pkcs1v15Sign;
    use rsa::RsaPublicKey;

    let key = match RsaPublicKey::from_pkcs1_der(key_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };
    key.verify(Pkcs1v15Sign::new::<Sha256>(), hash, sig).is_ok()
}

#[cfg(feature = "sig-ecdsa-p256")]
fn verify_signature(key_bytes: &[u8], hash: &[u8; 32], sig: &[u8]) -> bool {
    use ecdsa::signature::hazmat::PrehashVerifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    let key = match VerifyingKey::from_sec1_bytes(key_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let signature = match Signature::from_der(sig) {
        Ok(s) => s,
        Err(_) => return false,
    };
    key.verify_prehash(hash, &signature).is_ok()
}

#[cfg(feature = "sig-ed25519")]
fn verify_signature(key_bytes: &[u8], hash: &[u8; 32], sig: &[u8]) -> bool {
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    let key_arr: [u8; 32] = match key_bytes.try_into() {
        Ok(a) => a,
        Err(_) => return false,
    };
    let key = match VerifyingKey::from_bytes(&key_arr) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let sig_arr: [u8; 64] = match sig.try_into() {
        Ok(a) => a,
        Err(_) => return false,
    };
    key.verify(hash, &Signature::from_bytes(&sig_arr)).is_ok()
}

/// Full validation pipeline for one slot: hash, signature, rollback
/// counter, UUID policy. Returns the fault-injection-hardened
/// pass/fail sum type; callers decode it with [`fih::fih_eq`] against
/// [`fih::FIH_SUCCESS`] rather than matching an `Ok`/`Err` boundary, per
/// spec §9.
#[allow(clippy::too_many_arguments)]
pub fn validate<M: FlashMap>(
    map: &mut M,
    header: &ImageHeader,
    area: FlashArea,
    image_index: u8,
    policy: &impl ImagePolicy,
    rollback: &impl RollbackPolicy,
    decrypt: Option<&mut impl ChunkDecrypt>,
    delay: &mut impl DelayRandom,
) -> Result<FihInt> {
    let hash = compute_hash(map, header, area, decrypt)?;

    let hash_entry = tlv::iter_tlvs(map, header, area, Some(types::SHA256), true)?
        .next()
        .transpose()?
        .ok_or(Error::InvalidImage)?;
    let mut stored_hash = [0u8; 32];
    if hash_entry.len as usize != stored_hash.len() {
        return Err(Error::InvalidImage);
    }
    tlv::read_value(map, area, &hash_entry, &mut stored_hash)?;
    if stored_hash != hash {
        return Err(Error::InvalidImage);
    }

    let sig_entry = tlv::iter_tlvs(map, header, area, Some(SIGNATURE_TLV_TYPE), true)?
        .next()
        .transpose()?;

    let sig_ok = match sig_entry {
        Some(entry) => {
            let mut sig_buf = [0u8; 256];
            if entry.len as usize > sig_buf.len() {
                return Err(Error::InvalidImage);
            }
            tlv::read_value(map, area, &entry, &mut sig_buf[..entry.len as usize])?;
            verify_signature(policy.public_key(image_index), &hash, &sig_buf[..entry.len as usize])
        }
        None => !policy.signing_required(),
    };
    if !sig_ok {
        return Err(Error::InvalidImage);
    }

    if policy.security_counter_required() {
        let counter_entry = tlv::iter_tlvs(map, header, area, Some(types::SECURITY_COUNTER), true)?
            .next()
            .transpose()?
            .ok_or(Error::InvalidImage)?;
        let mut counter_buf = [0u8; 4];
        if counter_entry.len as usize != 4 {
            return Err(Error::InvalidImage);
        }
        tlv::read_value(map, area, &counter_entry, &mut counter_buf)?;
        let counter = u32::from_le_bytes(counter_buf);
        if counter < rollback.counter(image_index)? {
            return Err(Error::InvalidImage);
        }
    }

    if policy.uuid_checks_enabled() {
        let vendor = read_uuid(map, header, area, types::VENDOR_UUID)?;
        let class = read_uuid(map, header, area, types::CLASS_UUID)?;
        if !policy.allow_image(image_index, vendor, class) {
            return Err(Error::InvalidImage);
        }
    }

    Ok(fih::double_checked(|| true, delay))
}

fn read_uuid<M: FlashMap>(
    map: &mut M,
    header: &ImageHeader,
    area: FlashArea,
    kind: u8,
) -> Result<Option<[u8; 16]>> {
    let entry = tlv::iter_tlvs(map, header, area, Some(kind), true)?
        .next()
        .transpose()?;
    match entry {
        Some(e) if e.len as usize == 16 => {
            let mut buf = [0u8; 16];
            tlv::read_value(map, area, &e, &mut buf)?;
            Ok(Some(buf))
        }
        Some(_) => Err(Error::InvalidImage),
        None => Ok(None),
    }
}
