//! Firmware image authenticity.
//!
//! Releases carry a detached ECDSA NIST P-384 signature over the SHA-384
//! digest of the raw image. Verification streams the image back *out of
//! flash* rather than hashing network buffers: what gets checked is exactly
//! what will boot, so a corrupted write or a swapped sector fails here.
//!
//! The one substitution: flash still shows `0xFF` at byte 0 (the image is
//! not yet committed), so the first block takes its byte 0 from the
//! held-back register.

use log::{info, warn};

use p384::ecdsa::signature::hazmat::PrehashVerifier;
use p384::ecdsa::{Signature, VerifyingKey};
use p384::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha384};

use crate::error::{Error, FlashError};
use crate::flash::{FlashPort, Slot};

/// Flash is streamed through the digest in blocks of this size.
const VERIFY_BLOCK: usize = 1024;

/// DER SubjectPublicKeyInfo of the release signing key (secp384r1).
///
/// Compiled in: rotating the key requires a firmware release.
pub const RELEASE_PUBLIC_KEY_DER: [u8; 120] = [
    0x30, 0x76, 0x30, 0x10, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce,
    0x3d, 0x02, 0x01, 0x06, 0x05, 0x2b, 0x81, 0x04, 0x00, 0x22,
    0x03, 0x62, 0x00, 0x04, 0x98, 0xe0, 0x54, 0xc4, 0x9b, 0x8a,
    0x41, 0x94, 0x76, 0xd1, 0x7f, 0xfd, 0xdf, 0x7b, 0xc4, 0xcc,
    0x8f, 0x97, 0x37, 0x89, 0x31, 0xd5, 0x17, 0x99, 0xe8, 0x0f,
    0x94, 0x3a, 0x85, 0x21, 0x09, 0xc6, 0xaa, 0xee, 0xb0, 0xee,
    0x58, 0x29, 0xb1, 0x14, 0x6d, 0x8f, 0x37, 0xcd, 0x01, 0x23,
    0x2f, 0xbf, 0x75, 0x3b, 0x70, 0xc2, 0xb9, 0x3f, 0x30, 0x4d,
    0x88, 0xf4, 0xc6, 0x5f, 0x8c, 0x24, 0x8a, 0x02, 0xd4, 0xce,
    0x65, 0x64, 0x24, 0xc2, 0x6d, 0xd2, 0x2c, 0x11, 0x95, 0x08,
    0x00, 0x5d, 0x4d, 0x9a, 0x9f, 0x1d, 0xab, 0x91, 0xf4, 0x04,
    0x66, 0x30, 0x94, 0x56, 0x3b, 0x4c, 0xb7, 0xba, 0xdb, 0x22,
];

/// Holds the decoded public key for the process lifetime.
pub struct Verifier {
    key: VerifyingKey,
}

impl Verifier {
    /// Load the compiled-in release key.
    pub fn new() -> Result<Self, Error> {
        Self::from_spki_der(&RELEASE_PUBLIC_KEY_DER)
    }

    /// Load a caller-supplied DER SubjectPublicKeyInfo (tests, staging
    /// repositories with their own key).
    pub fn from_spki_der(der: &[u8]) -> Result<Self, Error> {
        let key =
            VerifyingKey::from_public_key_der(der).map_err(|_| Error::Init("public key decode"))?;
        Ok(Self { key })
    }

    /// Recompute SHA-384 over the flash-resident image (byte 0 substituted
    /// from the held register) and verify the DER signature.
    ///
    /// `Ok(false)` covers both a mismatch and an undecodable signature;
    /// only flash read faults are hard errors.
    pub fn verify_image<F: FlashPort>(
        &self,
        flash: &F,
        slot: Slot,
        filesize: usize,
        held_first_byte: u8,
        sig_der: &[u8],
    ) -> Result<bool, FlashError> {
        info!("verify: {} bytes in slot {:?}", filesize, slot);

        if filesize == 0 {
            return Ok(false);
        }
        let Ok(signature) = Signature::from_der(sig_der) else {
            warn!("verify: undecodable signature ({} bytes)", sig_der.len());
            return Ok(false);
        };

        let mut sha = Sha384::new();
        let mut buf = [0u8; VERIFY_BLOCK];
        let mut offset = 0usize;

        while offset + VERIFY_BLOCK < filesize {
            flash.read(slot, offset as u32, &mut buf)?;
            if offset == 0 {
                buf[0] = held_first_byte;
            }
            sha.update(buf);
            offset += VERIFY_BLOCK;
        }
        let remainder = filesize - offset;
        flash.read(slot, offset as u32, &mut buf[..remainder])?;
        if offset == 0 {
            buf[0] = held_first_byte;
        }
        sha.update(&buf[..remainder]);

        let digest = sha.finalize();
        let ok = self.key.verify_prehash(digest.as_slice(), &signature).is_ok();
        info!("verify: {}", if ok { "OK" } else { "MISMATCH" });
        Ok(ok)
    }
}
