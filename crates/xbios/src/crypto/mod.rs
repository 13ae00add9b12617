//! Primitive crypto used by the boot chain.
//!
//! [`BootCrypto`] is the seam between the boot-chain logic and the bit-level constructions. The
//! provided methods implement the stock behaviour; [`XboxCrypto`] uses them unchanged. Swap in
//! another implementation through [`crate::Bios::with_backends`] when working with images whose
//! preloader uses different constants.

pub mod rc4;

use sha1::{Digest, Sha1};

use crate::layout::{DIGEST_SIZE, KEY_SIZE};
use crate::preldr::PublicKey;

/// Key the preloader's embedded public key is stored under.
pub const PRELDR_PUBKEY_KEY: [u8; KEY_SIZE] = [
    0x2B, 0x84, 0x57, 0xBE, 0x9B, 0x1E, 0x65, 0xC6, 0x88, 0x1D, 0xF6, 0x8A, 0x3B, 0x5C, 0x7E, 0x12,
];

const HMAC_BLOCK_SIZE: usize = 64;

pub trait BootCrypto: Send + Sync {
    /// Symmetric stream transform; applying it twice with the same key is the identity.
    fn stream_cipher(&self, key: &[u8], data: &mut [u8]) {
        rc4::apply(key, data);
    }

    fn digest(&self, data: &[u8]) -> [u8; DIGEST_SIZE] {
        sha1_digest(data)
    }

    /// Transform the preloader's public key in place under the fixed preloader key.
    fn public_key_cipher(&self, data: &mut [u8]) {
        self.stream_cipher(&PRELDR_PUBKEY_KEY, data);
    }

    /// Derive the bootloader key from the secret boot key and the preloader nonce.
    fn derive_bldr_key(&self, sbkey: &[u8; KEY_SIZE], nonce: &[u8]) -> [u8; DIGEST_SIZE] {
        keyed_digest(sbkey, nonce)
    }

    /// Check a ROM `signature` over `digest` under the preloader's public key.
    ///
    /// The stock primitives carry no RSA implementation, so nothing verifies by default.
    fn rsa_verify(
        &self,
        _key: &PublicKey,
        _digest: &[u8; DIGEST_SIZE],
        _signature: &[u8],
    ) -> bool {
        false
    }
}

/// Stock primitives: RC4, SHA-1 and HMAC-SHA-1. Signatures are never verified.
#[derive(Debug, Clone, Copy, Default)]
pub struct XboxCrypto;

impl BootCrypto for XboxCrypto {}

pub fn sha1_digest(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&Sha1::digest(data));
    out
}

/// HMAC over SHA-1 with a 64-byte block.
pub fn keyed_digest(key: &[u8], data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut block = [0u8; HMAC_BLOCK_SIZE];
    if key.len() > HMAC_BLOCK_SIZE {
        block[..DIGEST_SIZE].copy_from_slice(&sha1_digest(key));
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = Sha1::new();
    inner.update(block.map(|b| b ^ 0x36));
    inner.update(data);
    let inner = inner.finalize();

    let mut outer = Sha1::new();
    outer.update(block.map(|b| b ^ 0x5C));
    outer.update(inner);

    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&outer.finalize());
    out
}
