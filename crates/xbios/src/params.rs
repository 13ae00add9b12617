use crate::layout::KEY_SIZE;
use crate::mcpx::Mcpx;

/// Caller-supplied parameters for [`crate::Bios::load`] and [`crate::Bios::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParams {
    /// Size of one ROM copy inside the image. `None` means the whole image is one ROM.
    pub romsize: Option<u32>,
    /// Bootloader key for the direct (non-preloader) path. `None` falls back to the preloader,
    /// then to an all-zero key.
    pub bldr_key: Option<[u8; KEY_SIZE]>,
    /// Kernel key. `None` uses the key stored in the decrypted bootloader.
    pub kernel_key: Option<[u8; KEY_SIZE]>,
    pub mcpx: Mcpx,
    /// The bootloader is stored encrypted.
    pub enc_bldr: bool,
    /// The compressed kernel is stored encrypted.
    pub enc_kernel: bool,
    /// Boot params are stored in plaintext and must survive bootloader decryption.
    pub restore_boot_params: bool,
}

impl Default for LoadParams {
    fn default() -> Self {
        Self {
            romsize: None,
            bldr_key: None,
            kernel_key: None,
            mcpx: Mcpx::default(),
            enc_bldr: true,
            enc_kernel: true,
            restore_boot_params: true,
        }
    }
}

impl LoadParams {
    /// ROM size to use for an image of `binsize` bytes.
    pub fn effective_romsize(&self, binsize: usize) -> usize {
        self.romsize.map_or(binsize, |size| size as usize)
    }
}
