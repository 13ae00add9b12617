use std::fmt;

use tracing::debug;

use crate::bios::Bios;
use crate::error::KernelError;
use crate::layout::{View, KEY_SIZE};

/// Views onto the compressed kernel and its data section, plus the decompressed image.
///
/// The image is owned separately from the ROM buffer and survives re-encryption of the
/// compressed stream.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Kernel {
    pub(crate) compressed: Option<View>,
    pub(crate) data: Option<View>,
    pub(crate) img: Option<Vec<u8>>,
    pub(crate) encrypted: bool,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("compressed", &self.compressed)
            .field("data", &self.data)
            .field("img_size", &self.img_size())
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

impl Kernel {
    pub fn compressed(&self) -> Option<View> {
        self.compressed
    }

    pub fn data(&self) -> Option<View> {
        self.data
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// The decompressed kernel, once [`Bios::decompress_kernel`] has succeeded.
    pub fn img(&self) -> Option<&[u8]> {
        self.img.as_deref()
    }

    pub fn img_size(&self) -> usize {
        self.img.as_ref().map_or(0, Vec::len)
    }

    pub(crate) fn clear_views(&mut self) {
        self.compressed = None;
        self.data = None;
    }
}

impl Bios {
    /// Key for the kernel stream transform: the load parameters' key, else the key stored in
    /// the plaintext bootloader, else all zero.
    pub fn kernel_key(&self) -> [u8; KEY_SIZE] {
        if let Some(key) = self.params.kernel_key {
            return key;
        }
        match self.bldr_keys() {
            Some(keys) => keys.krnl_key,
            None => [0; KEY_SIZE],
        }
    }

    /// Apply the kernel stream transform to the compressed kernel. Self-inverse; every call
    /// flips [`Kernel::is_encrypted`].
    pub fn symmetric_enc_dec_kernel(&mut self) {
        let key = self.kernel_key();
        self.stream_kernel(&key);
    }

    pub(crate) fn stream_kernel(&mut self, key: &[u8]) {
        let Some(view) = self.kernel.compressed.filter(|_| !key.is_empty()) else {
            return;
        };
        self.crypto.stream_cipher(key, &mut self.data[view.range()]);
        self.kernel.encrypted = !self.kernel.encrypted;
    }

    /// Decompress the plaintext compressed kernel into [`Kernel::img`].
    ///
    /// A previously decompressed image is kept when this fails.
    pub fn decompress_kernel(&mut self) -> Result<(), KernelError> {
        if self.kernel.encrypted {
            return Err(KernelError::Encrypted);
        }
        let src = self
            .view_bytes(self.kernel.compressed)
            .ok_or(KernelError::NotLocated)?;
        let img = self.codec.decompress(src)?;
        debug!(
            compressed = src.len(),
            decompressed = img.len(),
            "kernel decompressed"
        );
        self.kernel.img = Some(img);
        Ok(())
    }
}
