//! Second-stage bootloader ("2BL"): on-ROM records, validation and the direct decrypt path.

use tracing::debug;

use crate::bios::Bios;
use crate::crypto::BootCrypto;
use crate::error::BootParamsError;
use crate::layout::{
    self, View, BFM_KEY_OFFSET, BLDR_BLOCK_SIZE, BLDR_ENTRY_OFFSET, BLDR_ENTRY_SIZE,
    BLDR_KEYS_SIZE, BLDR_RELOC, BOOT_PARAMS_OFFSET, BOOT_PARAMS_SIZE, BOOT_SIGNATURE,
    COMMAND_LINE_SIZE, DIGEST_SIZE, INIT_TBL_HEADER_SIZE, KD_DELAY_FLAG, KEY_SIZE,
    LDR_PARAMS_SIZE,
};

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_key(bytes: &[u8], offset: usize) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes[offset..offset + KEY_SIZE]);
    key
}

/// Sizes the bootloader uses to find the kernel, sealed by a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootParams {
    /// Size of the kernel data section; may carry [`KD_DELAY_FLAG`].
    pub krnl_data_size: u32,
    pub inittbl_size: u32,
    pub signature: u32,
    /// Size of the compressed kernel.
    pub krnl_size: u32,
    pub digest: [u8; DIGEST_SIZE],
}

impl BootParams {
    const FIELDS_SIZE: usize = 16;

    /// Unsealed boot params carrying the boot signature.
    pub fn new(krnl_data_size: u32, inittbl_size: u32, krnl_size: u32) -> Self {
        Self {
            krnl_data_size,
            inittbl_size,
            signature: BOOT_SIGNATURE,
            krnl_size,
            digest: [0; DIGEST_SIZE],
        }
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BOOT_PARAMS_SIZE {
            return None;
        }
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&bytes[Self::FIELDS_SIZE..BOOT_PARAMS_SIZE]);
        Some(Self {
            krnl_data_size: read_u32(bytes, 0),
            inittbl_size: read_u32(bytes, 4),
            signature: read_u32(bytes, 8),
            krnl_size: read_u32(bytes, 12),
            digest,
        })
    }

    pub fn to_bytes(&self) -> [u8; BOOT_PARAMS_SIZE] {
        let mut out = [0u8; BOOT_PARAMS_SIZE];
        out[..Self::FIELDS_SIZE].copy_from_slice(&self.fields());
        out[Self::FIELDS_SIZE..].copy_from_slice(&self.digest);
        out
    }

    fn fields(&self) -> [u8; Self::FIELDS_SIZE] {
        let mut out = [0u8; Self::FIELDS_SIZE];
        write_u32(&mut out, 0, self.krnl_data_size);
        write_u32(&mut out, 4, self.inittbl_size);
        write_u32(&mut out, 8, self.signature);
        write_u32(&mut out, 12, self.krnl_size);
        out
    }

    /// Recompute the digest over the size fields.
    pub fn seal(&mut self, crypto: &dyn BootCrypto) {
        self.digest = crypto.digest(&self.fields());
    }

    pub fn digest_matches(&self, crypto: &dyn BootCrypto) -> bool {
        crypto.digest(&self.fields()) == self.digest
    }

    pub fn kernel_data_size(&self) -> usize {
        (self.krnl_data_size & !KD_DELAY_FLAG) as usize
    }

    pub fn delays_data_copy(&self) -> bool {
        self.krnl_data_size & KD_DELAY_FLAG != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BldrEntry {
    /// Address of the keys block, relative to [`BLDR_RELOC`].
    pub keys_ptr: u32,
    pub bfm_entry_point: u32,
}

impl BldrEntry {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BLDR_ENTRY_SIZE {
            return None;
        }
        Some(Self {
            keys_ptr: read_u32(bytes, 0),
            bfm_entry_point: read_u32(bytes, 4),
        })
    }

    pub fn to_bytes(&self) -> [u8; BLDR_ENTRY_SIZE] {
        let mut out = [0u8; BLDR_ENTRY_SIZE];
        write_u32(&mut out, 0, self.keys_ptr);
        write_u32(&mut out, 4, self.bfm_entry_point);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BldrKeys {
    pub eeprom_key: [u8; KEY_SIZE],
    pub cert_key: [u8; KEY_SIZE],
    pub krnl_key: [u8; KEY_SIZE],
}

impl BldrKeys {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < BLDR_KEYS_SIZE {
            return None;
        }
        Some(Self {
            eeprom_key: read_key(bytes, 0),
            cert_key: read_key(bytes, KEY_SIZE),
            krnl_key: read_key(bytes, 2 * KEY_SIZE),
        })
    }

    pub fn to_bytes(&self) -> [u8; BLDR_KEYS_SIZE] {
        let mut out = [0u8; BLDR_KEYS_SIZE];
        out[..KEY_SIZE].copy_from_slice(&self.eeprom_key);
        out[KEY_SIZE..2 * KEY_SIZE].copy_from_slice(&self.cert_key);
        out[2 * KEY_SIZE..].copy_from_slice(&self.krnl_key);
        out
    }
}

/// Parameters the bootloader passes on to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderParams {
    pub bldr_entry_point: u32,
    pub command_line: [u8; COMMAND_LINE_SIZE],
}

impl LoaderParams {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < LDR_PARAMS_SIZE {
            return None;
        }
        let mut command_line = [0u8; COMMAND_LINE_SIZE];
        command_line.copy_from_slice(&bytes[4..LDR_PARAMS_SIZE]);
        Some(Self {
            bldr_entry_point: read_u32(bytes, 0),
            command_line,
        })
    }

    /// Command line up to the first NUL.
    pub fn command_line_str(&self) -> String {
        let end = self
            .command_line
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(COMMAND_LINE_SIZE);
        String::from_utf8_lossy(&self.command_line[..end]).into_owned()
    }
}

/// Views into the bootloader block.
///
/// While `encrypted` is set only `block` is meaningful; the record views point at ciphertext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bootloader {
    pub(crate) block: Option<View>,
    pub(crate) ldr_params: Option<View>,
    pub(crate) bfm_key: Option<View>,
    pub(crate) entry: Option<View>,
    pub(crate) keys: Option<View>,
    pub(crate) boot_params: Option<View>,
    pub(crate) encrypted: bool,
}

impl Bootloader {
    pub fn block(&self) -> Option<View> {
        self.block
    }

    pub fn keys(&self) -> Option<View> {
        self.keys
    }

    pub fn boot_params(&self) -> Option<View> {
        self.boot_params
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Place the fixed-position views for a block. The keys block needs plaintext and is left
    /// for the second pass.
    pub(crate) fn place(&mut self, block: View) {
        self.block = Some(block);
        self.ldr_params = block.sub(0, LDR_PARAMS_SIZE);
        self.bfm_key = block.sub(BFM_KEY_OFFSET, KEY_SIZE);
        self.entry = block.sub(BLDR_ENTRY_OFFSET, BLDR_ENTRY_SIZE);
        self.boot_params = block.sub(BOOT_PARAMS_OFFSET, BOOT_PARAMS_SIZE);
        self.keys = None;
    }

    pub(crate) fn clear_views(&mut self) {
        *self = Self {
            encrypted: self.encrypted,
            ..Self::default()
        };
    }
}

/// Offset of the keys block inside the bootloader block, if `keys_ptr` lands in its body.
pub(crate) fn keys_offset(entry: &BldrEntry) -> Option<usize> {
    let offset = layout::addr_to_offset(entry.keys_ptr, BLDR_RELOC, BLDR_KEYS_SIZE, BFM_KEY_OFFSET)?;
    (offset >= LDR_PARAMS_SIZE).then_some(offset)
}

impl Bios {
    /// Bytes of the bootloader the stream transform covers for the current load parameters.
    pub(crate) fn bldr_crypt_len(&self) -> usize {
        if self.params.restore_boot_params {
            BOOT_PARAMS_OFFSET
        } else {
            BLDR_BLOCK_SIZE
        }
    }

    /// Apply the bootloader stream transform to the first `len` bytes of the block.
    ///
    /// Self-inverse; every call flips [`Bootloader::is_encrypted`]. An empty key is ignored.
    pub fn symmetric_enc_dec_bldr(&mut self, key: &[u8], len: usize) {
        let Some(block) = self.bldr.block.filter(|_| !key.is_empty()) else {
            return;
        };
        let len = len.min(block.len);
        self.crypto
            .stream_cipher(key, &mut self.data[block.offset..block.offset + len]);
        self.bldr.encrypted = !self.bldr.encrypted;
    }

    /// Check the plaintext boot params. This is the only evidence the bootloader was decrypted
    /// with the right key.
    pub fn validate_bldr_boot_params(&self) -> Result<(), BootParamsError> {
        if self.bldr.encrypted {
            return Err(BootParamsError::Encrypted);
        }
        let bp = self.raw_boot_params().ok_or(BootParamsError::NotLocated)?;
        let entry = self.raw_bldr_entry().ok_or(BootParamsError::NotLocated)?;

        if bp.signature != BOOT_SIGNATURE {
            return Err(BootParamsError::BadSignature(bp.signature));
        }
        if !bp.digest_matches(&*self.crypto) {
            return Err(BootParamsError::DigestMismatch);
        }
        if bp.krnl_size == 0 {
            return Err(BootParamsError::EmptyKernel);
        }
        let inittbl_size = bp.inittbl_size as usize;
        if inittbl_size < INIT_TBL_HEADER_SIZE {
            return Err(BootParamsError::InitTableTooSmall(inittbl_size));
        }

        let romsize = self.romsize();
        let needed = layout::rom_used(
            &self.params.mcpx,
            inittbl_size,
            bp.kernel_data_size(),
            bp.krnl_size as usize,
        )
        .unwrap_or(usize::MAX);
        if needed > romsize {
            return Err(BootParamsError::ExceedsRom { needed, romsize });
        }

        if keys_offset(&entry).is_none() {
            return Err(BootParamsError::KeysOutOfRange(entry.keys_ptr));
        }

        debug!(
            krnl_size = bp.krnl_size,
            krnl_data_size = bp.kernel_data_size(),
            inittbl_size,
            "bootloader boot params valid"
        );
        Ok(())
    }

    pub(crate) fn raw_boot_params(&self) -> Option<BootParams> {
        BootParams::parse(self.view_bytes(self.bldr.boot_params)?)
    }

    pub(crate) fn raw_bldr_entry(&self) -> Option<BldrEntry> {
        BldrEntry::parse(self.view_bytes(self.bldr.entry)?)
    }

    pub(crate) fn write_boot_params(&mut self, bp: &BootParams) {
        if let Some(bytes) = self.view_bytes_mut(self.bldr.boot_params) {
            bytes.copy_from_slice(&bp.to_bytes());
        }
    }

    pub(crate) fn write_bldr_entry(&mut self, entry: &BldrEntry) {
        if let Some(bytes) = self.view_bytes_mut(self.bldr.entry) {
            bytes.copy_from_slice(&entry.to_bytes());
        }
    }

    pub(crate) fn write_bldr_keys(&mut self, keys: &BldrKeys) {
        if let Some(bytes) = self.view_bytes_mut(self.bldr.keys) {
            bytes.copy_from_slice(&keys.to_bytes());
        }
    }

    pub(crate) fn write_bfm_key(&mut self, key: &[u8; KEY_SIZE]) {
        if let Some(bytes) = self.view_bytes_mut(self.bldr.bfm_key) {
            bytes.copy_from_slice(key);
        }
    }
}
