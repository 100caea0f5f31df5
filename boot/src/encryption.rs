//! Per-image content decryption (spec §4.4).
//!
//! The wrapping scheme is a build-time choice like the signature scheme
//! in [`crate::validator`]; `unwrap_content_key` is compiled against
//! whichever `encrypt-*` feature is active. AES-CTR bulk decryption
//! itself is scheme-independent and always compiled in when
//! `encryption` is enabled.

use aes::Aes128;
use cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use ctr::Ctr128BE;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// A cached, unwrapped content key plus the per-image IV carried
/// alongside it in the wrapped-key TLV. Zeroised on drop so a stale
/// copy never survives past the swap that used it (spec §3's
/// "Encryption keys are held in RAM only for the duration of the
/// current swap and are zeroised before jumping to the image").
#[derive(Clone)]
pub struct ContentKey {
    key: [u8; 16],
    iv: [u8; 16],
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

/// Anything that can turn body-relative byte ranges of ciphertext back
/// into plaintext, in place. Implemented by [`ContentKey`]; validator
/// code is generic over this trait rather than naming `ContentKey`
/// directly so an unencrypted validation path can pass `None`.
pub trait ChunkDecrypt {
    fn decrypt_chunk(&mut self, body_offset: u32, buf: &mut [u8]) -> Result<()>;
}

/// Stand-in for "no decryption" call sites, so `None::<&mut NoDecrypt>`
/// type-checks without committing to `ContentKey`'s concrete type.
pub struct NoDecrypt;

impl ChunkDecrypt for NoDecrypt {
    fn decrypt_chunk(&mut self, _body_offset: u32, _buf: &mut [u8]) -> Result<()> {
        Ok(())
    }
}

impl ChunkDecrypt for ContentKey {
    /// AES-CTR where the counter is derived from `body_offset / 16` and
    /// the per-image IV (spec §4.4's `decrypt` contract). Only ever
    /// called with `body_offset` aligned to 16 bytes by [`crate::validator`]
    /// and [`crate::swap`]'s chunking, so the counter math never needs
    /// to account for a partial leading block.
    fn decrypt_chunk(&mut self, body_offset: u32, buf: &mut [u8]) -> Result<()> {
        if body_offset % 16 != 0 {
            return Err(Error::BadArgs);
        }
        let mut cipher = Ctr128BE::<Aes128>::new((&self.key).into(), (&self.iv).into());
        cipher
            .try_seek(body_offset as u64)
            .map_err(|_| Error::BadArgs)?;
        cipher.apply_keystream(buf);
        Ok(())
    }
}

#[cfg(any(feature = "encrypt-aes-kw", feature = "encrypt-ecies-p256", feature = "encrypt-x25519"))]
fn unwrap_raw(wrapped: &[u8], device_secret: &[u8; 16]) -> Result<[u8; 16]> {
    use aes_kw::Kek;

    let kek = Kek::<Aes128>::new(device_secret.into());
    let mut out = [0u8; 16];
    kek.unwrap(wrapped, &mut out).map_err(|_| Error::InvalidImage)?;
    Ok(out)
}

#[cfg(feature = "encrypt-ecies-p256")]
fn unwrap_ecies_p256(
    wrapped: &[u8],
    ephemeral_pubkey: &[u8],
    device_private: &p256::SecretKey,
) -> Result<[u8; 16]> {
    use hkdf::Hkdf;
    use p256::PublicKey;
    use sha2::Sha256;

    let ephemeral = PublicKey::from_sec1_bytes(ephemeral_pubkey).map_err(|_| Error::InvalidImage)?;
    let shared = p256::ecdh::diffie_hellman(device_private.to_nonzero_scalar(), ephemeral.as_affine());

    let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
    let mut kek_bytes = [0u8; 16];
    hk.expand(b"mcuboot-kek", &mut kek_bytes)
        .map_err(|_| Error::InvalidImage)?;

    unwrap_raw(wrapped, &kek_bytes)
}

#[cfg(feature = "encrypt-x25519")]
fn unwrap_x25519(
    wrapped: &[u8],
    ephemeral_pubkey: &[u8; 32],
    device_private: &x25519_dalek::StaticSecret,
) -> Result<[u8; 16]> {
    use hkdf::Hkdf;
    use sha2::Sha256;

    let ephemeral = x25519_dalek::PublicKey::from(*ephemeral_pubkey);
    let shared = device_private.diffie_hellman(&ephemeral);

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut kek_bytes = [0u8; 16];
    hk.expand(b"mcuboot-kek", &mut kek_bytes)
        .map_err(|_| Error::InvalidImage)?;

    unwrap_raw(wrapped, &kek_bytes)
}

#[cfg(feature = "encrypt-rsa-oaep")]
fn unwrap_rsa_oaep(wrapped: &[u8], device_private: &rsa::RsaPrivateKey) -> Result<[u8; 16]> {
    use rsa::Oaep;
    use sha2::Sha256;

    let plain = device_private
        .decrypt(Oaep::new::<Sha256>(), wrapped)
        .map_err(|_| Error::InvalidImage)?;
    plain.try_into().map_err(|_| Error::InvalidImage)
}

/// Content-key source a platform registers once, wrapping whichever
/// device secret (raw KEK, EC private key, RSA private key) backs the
/// active `encrypt-*` feature.
pub trait KeyUnwrapper {
    fn unwrap_content_key(&self, wrapped_key_tlv: &[u8], iv: &[u8; 16]) -> Result<ContentKey>;
}
