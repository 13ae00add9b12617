//! Preloader stage (MCPX 1.1 boot chains).
//!
//! The preloader sits between the boot ROM and the bootloader. It carries an RSA public key,
//! stored encrypted under a fixed key, and the nonce the bootloader key is derived from. If the
//! public key decrypts to a recognizable header the preloader is considered present.

use tracing::{debug, warn};

use crate::bios::Bios;
use crate::bldr::{read_u32, write_u32};
use crate::error::PreldrError;
use crate::layout::{
    self, View, DIGEST_SIZE, KEY_SIZE, PRELDR_FUNC_BLOCK_SIZE, PRELDR_JMP_OFFSET,
    PRELDR_NONCE_SIZE, PRELDR_PARAMS_OFFSET, PRELDR_PARAMS_SIZE, PRELDR_PTR_BLOCK_OFFSET,
    PRELDR_PTR_BLOCK_SIZE, PRELDR_SIZE, PUBLIC_KEY_SIZE, RSA1_MAGIC, RSA_BITS, RSA_HEADER_SIZE,
    RSA_MODULUS_SIZE,
};

/// Outcome of the preloader stage.
///
/// | from | event | to |
/// |---|---|---|
/// | `NotFound` | public key recognized | `Found` |
/// | `Found` | derived key decrypts a valid bootloader | `BldrDecrypted` |
/// | `Found` | derived key yields an invalid bootloader | `Error` |
///
/// Anything else leaves the status where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PreldrStatus {
    /// Found and used to decrypt the bootloader.
    BldrDecrypted,
    /// Found but not used to decrypt the bootloader.
    Found,
    /// Absent or unrecognized (MCPX 1.0 image, or not a valid image).
    #[default]
    NotFound,
    /// Found, but the bootloader it decrypted did not validate.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RsaHeader {
    pub magic: u32,
    pub mod_size: u32,
    pub bits: u32,
    pub max_bytes: u32,
    pub exponent: u32,
}

impl RsaHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RSA_HEADER_SIZE {
            return None;
        }
        Some(Self {
            magic: read_u32(bytes, 0),
            mod_size: read_u32(bytes, 4),
            bits: read_u32(bytes, 8),
            max_bytes: read_u32(bytes, 12),
            exponent: read_u32(bytes, 16),
        })
    }

    pub fn to_bytes(&self) -> [u8; RSA_HEADER_SIZE] {
        let mut out = [0u8; RSA_HEADER_SIZE];
        write_u32(&mut out, 0, self.magic);
        write_u32(&mut out, 4, self.mod_size);
        write_u32(&mut out, 8, self.bits);
        write_u32(&mut out, 12, self.max_bytes);
        write_u32(&mut out, 16, self.exponent);
        out
    }

    pub fn is_recognized(&self) -> bool {
        self.magic == RSA1_MAGIC
            && self.mod_size as usize == RSA_MODULUS_SIZE
            && self.bits == RSA_BITS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    pub header: RsaHeader,
    pub modulus: [u8; RSA_MODULUS_SIZE],
}

impl PublicKey {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PUBLIC_KEY_SIZE {
            return None;
        }
        let mut modulus = [0u8; RSA_MODULUS_SIZE];
        modulus.copy_from_slice(&bytes[RSA_HEADER_SIZE..PUBLIC_KEY_SIZE]);
        Some(Self {
            header: RsaHeader::parse(bytes)?,
            modulus,
        })
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out[..RSA_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        out[RSA_HEADER_SIZE..].copy_from_slice(&self.modulus);
        out
    }
}

/// Fixed-position table at the end of the preloader code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PtrBlock {
    pub func_block_ptr: u32,
    pub reserved: u32,
}

impl PtrBlock {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PRELDR_PTR_BLOCK_SIZE {
            return None;
        }
        Some(Self {
            func_block_ptr: read_u32(bytes, 0),
            reserved: read_u32(bytes, 4),
        })
    }

    pub fn to_bytes(&self) -> [u8; PRELDR_PTR_BLOCK_SIZE] {
        let mut out = [0u8; PRELDR_PTR_BLOCK_SIZE];
        write_u32(&mut out, 0, self.func_block_ptr);
        write_u32(&mut out, 4, self.reserved);
        out
    }
}

/// Jump table the preloader exports to the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FuncBlock {
    pub pubkey_ptr: u32,
    pub sha1_ptr: u32,
    pub rc4_ptr: u32,
    pub rsa_verify_ptr: u32,
}

impl FuncBlock {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PRELDR_FUNC_BLOCK_SIZE {
            return None;
        }
        Some(Self {
            pubkey_ptr: read_u32(bytes, 0),
            sha1_ptr: read_u32(bytes, 4),
            rc4_ptr: read_u32(bytes, 8),
            rsa_verify_ptr: read_u32(bytes, 12),
        })
    }

    pub fn to_bytes(&self) -> [u8; PRELDR_FUNC_BLOCK_SIZE] {
        let mut out = [0u8; PRELDR_FUNC_BLOCK_SIZE];
        write_u32(&mut out, 0, self.pubkey_ptr);
        write_u32(&mut out, 4, self.sha1_ptr);
        write_u32(&mut out, 8, self.rc4_ptr);
        write_u32(&mut out, 12, self.rsa_verify_ptr);
        out
    }
}

/// Views into the preloader block plus what the preloader stage learned from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preloader {
    pub(crate) block: Option<View>,
    pub(crate) params: Option<View>,
    pub(crate) ptr_block: Option<View>,
    pub(crate) func_block: Option<View>,
    pub(crate) public_key: Option<View>,
    pub(crate) bldr_key: [u8; DIGEST_SIZE],
    pub(crate) jmp_offset: u32,
    pub(crate) status: PreldrStatus,
    /// The public key view currently holds plaintext.
    pub(crate) key_decrypted: bool,
    /// Parsed copy of the recognized public key; the image itself keeps the ciphertext.
    pub(crate) key: Option<PublicKey>,
    pub(crate) rom_verified: bool,
}

impl Preloader {
    pub fn block(&self) -> Option<View> {
        self.block
    }

    pub fn public_key(&self) -> Option<View> {
        self.public_key
    }

    pub fn status(&self) -> PreldrStatus {
        self.status
    }

    /// Key derived for the bootloader; all zero until one has been derived.
    pub fn bldr_key(&self) -> &[u8; DIGEST_SIZE] {
        &self.bldr_key
    }

    pub fn jmp_offset(&self) -> u32 {
        self.jmp_offset
    }

    /// Whether [`BootCrypto::rsa_verify`](crate::BootCrypto::rsa_verify) accepted the ROM
    /// signature under the preloader's public key.
    pub fn rom_verified(&self) -> bool {
        self.rom_verified
    }

    pub(crate) fn place(&mut self, block: Option<View>) {
        self.block = block;
        self.params = block.and_then(|b| b.sub(PRELDR_PARAMS_OFFSET, PRELDR_PARAMS_SIZE));
        self.ptr_block = None;
        self.func_block = None;
        self.public_key = None;
        self.key_decrypted = false;
        self.key = None;
        self.rom_verified = false;
    }
}

impl Bios {
    /// Decrypt the preloader's public key in place and check its header. The parsed key is
    /// kept for [`Bios::preldr_public_key`].
    ///
    /// On failure the key bytes are left as they were.
    pub fn preldr_decrypt_public_key(&mut self) -> Result<(), PreldrError> {
        let block = self.preldr.block.ok_or(PreldrError::NotPresent)?;
        if self.preldr.key_decrypted {
            return Ok(());
        }
        let key_view = self.locate_preldr_tables(block)?;

        let bytes = &mut self.data[key_view.range()];
        self.crypto.public_key_cipher(bytes);
        let header = RsaHeader::parse(bytes).unwrap_or_default();
        if !header.is_recognized() {
            self.crypto.public_key_cipher(bytes);
            return Err(PreldrError::UnrecognizedKey {
                magic: header.magic,
            });
        }

        self.preldr.key = PublicKey::parse(bytes);
        self.preldr.key_decrypted = true;
        debug!(
            jmp_offset = self.preldr.jmp_offset,
            exponent = header.exponent,
            "preloader public key recognized"
        );
        Ok(())
    }

    /// Re-encrypt a public key decrypted by [`Bios::preldr_decrypt_public_key`].
    pub(crate) fn preldr_encrypt_public_key(&mut self) {
        if !self.preldr.key_decrypted {
            return;
        }
        if let Some(view) = self.preldr.public_key {
            self.crypto.public_key_cipher(&mut self.data[view.range()]);
        }
        self.preldr.key_decrypted = false;
    }

    /// Follow the pointer block and function block to the public key.
    fn locate_preldr_tables(&mut self, block: View) -> Result<View, PreldrError> {
        let base = layout::preldr_real_base(self.params.mcpx.block_size);
        let code = &self.data[block.offset..block.offset + PRELDR_SIZE];

        let ptr_block = PtrBlock::parse(&code[PRELDR_PTR_BLOCK_OFFSET..]).unwrap_or_default();
        let func_offset = layout::addr_to_offset(
            ptr_block.func_block_ptr,
            base,
            PRELDR_FUNC_BLOCK_SIZE,
            PRELDR_SIZE,
        )
        .ok_or(PreldrError::PointerOutOfRange {
            what: "function block",
            ptr: ptr_block.func_block_ptr,
        })?;

        let func_block = FuncBlock::parse(&code[func_offset..]).unwrap_or_default();
        let key_offset =
            layout::addr_to_offset(func_block.pubkey_ptr, base, PUBLIC_KEY_SIZE, PRELDR_SIZE)
                .ok_or(PreldrError::PointerOutOfRange {
                    what: "public key",
                    ptr: func_block.pubkey_ptr,
                })?;

        self.preldr.jmp_offset = read_u32(code, PRELDR_JMP_OFFSET);
        self.preldr.ptr_block = block.sub(PRELDR_PTR_BLOCK_OFFSET, PRELDR_PTR_BLOCK_SIZE);
        self.preldr.func_block = block.sub(func_offset, PRELDR_FUNC_BLOCK_SIZE);
        self.preldr.public_key = block.sub(key_offset, PUBLIC_KEY_SIZE);
        self.preldr.public_key.ok_or(PreldrError::NotPresent)
    }

    /// Check the ROM signature slot against a digest of everything below the preloader, using
    /// the recognized public key.
    fn preldr_verify_rom_signature(&self) -> bool {
        let (Some(key), Some(block), Some(slot)) =
            (&self.preldr.key, self.preldr.block, self.rom_digest)
        else {
            return false;
        };
        let size = self.data.len();
        let rom_start = size - self.romsize().min(size);
        let (Some(covered), Some(signature)) =
            (self.data.get(rom_start..block.offset), self.view_bytes(Some(slot)))
        else {
            return false;
        };
        let digest = self.crypto.digest(covered);
        self.crypto.rsa_verify(key, &digest, signature)
    }

    /// Derive the bootloader key from the secret boot key and the preloader nonce.
    pub fn preldr_create_key(&self, sbkey: &[u8; KEY_SIZE]) -> [u8; DIGEST_SIZE] {
        let nonce = self
            .view_bytes(self.preldr.params)
            .map(|params| &params[..PRELDR_NONCE_SIZE])
            .unwrap_or(&[]);
        self.crypto.derive_bldr_key(sbkey, nonce)
    }

    /// Bootloader stream transform with a preloader-derived key. Self-inverse.
    pub fn preldr_symmetric_enc_dec_bldr(&mut self, key: &[u8], len: usize) {
        self.symmetric_enc_dec_bldr(key, len);
    }

    /// Run the preloader path: recognize the preloader, derive the bootloader key, decrypt and
    /// validate the bootloader. Leaves the bootloader ciphertext untouched on failure.
    ///
    /// The public key is re-encrypted before returning, so the preloader block reads back
    /// exactly as it was stored.
    pub fn preldr_validate_and_decrypt_bldr(&mut self) {
        if let Err(err) = self.preldr_decrypt_public_key() {
            debug!(%err, "preloader not found");
            self.preldr.status = PreldrStatus::NotFound;
            return;
        }
        self.preldr.status = PreldrStatus::Found;
        self.preldr.rom_verified = self.preldr_verify_rom_signature();
        self.preldr_encrypt_public_key();
        debug!(rom_verified = self.preldr.rom_verified, "rom signature checked");

        if !self.bldr.encrypted {
            debug!("bootloader already plaintext; preloader not used");
            return;
        }
        let Some(sbkey) = self.params.mcpx.sbkey else {
            debug!("no secret boot key; preloader not used");
            return;
        };

        let key = self.preldr_create_key(&sbkey);
        self.preldr.bldr_key = key;
        let len = self.bldr_crypt_len();
        self.preldr_symmetric_enc_dec_bldr(&key, len);

        match self.validate_bldr_boot_params() {
            Ok(()) => {
                debug!("bootloader decrypted with preloader key");
                self.preldr.status = PreldrStatus::BldrDecrypted;
            }
            Err(err) => {
                warn!(%err, "preloader key did not produce a valid bootloader");
                self.preldr_symmetric_enc_dec_bldr(&key, len);
                self.preldr.status = PreldrStatus::Error;
            }
        }
    }
}
