use std::fmt;

use tracing::{debug, info, warn};

use crate::bldr::{keys_offset, BldrEntry, BldrKeys, BootParams, Bootloader, LoaderParams};
use crate::check_size;
use crate::codec::{KernelCodec, Lz4Codec};
use crate::crypto::{BootCrypto, XboxCrypto};
use crate::error::LoadError;
use crate::inittbl::InitTable;
use crate::kernel::Kernel;
use crate::layout::{
    self, View, BLDR_KEYS_SIZE, INIT_TBL_HEADER_SIZE, KEY_SIZE, PRELDR_NONCE_SIZE,
    ROM_DIGEST_OFFSET, ROM_DIGEST_SIZE,
};
use crate::params::LoadParams;
use crate::preldr::{FuncBlock, Preloader, PreldrStatus, PtrBlock, PublicKey};

/// Outcome of [`Bios::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BiosStatus {
    /// Bootloader validated; kernel located (and decompressed, if the stream was sound).
    Success,
    /// The image loaded but its bootloader did not validate. Kernel stage skipped.
    SuccessInvalidBootloader,
    /// Nothing loaded.
    #[default]
    Failed,
}

/// A ROM image and everything known about its boot chain.
///
/// | from | event | to |
/// |---|---|---|
/// | any | [`Bios::unload`], size error | `Failed` |
/// | `Failed` | [`Bios::init`] / [`Bios::build`] | `Success` |
/// | `Success` | bootloader fails validation during [`Bios::load`] | `SuccessInvalidBootloader` |
pub struct Bios {
    pub(crate) data: Vec<u8>,
    pub(crate) bldr: Bootloader,
    pub(crate) preldr: Preloader,
    pub(crate) kernel: Kernel,
    pub(crate) init_tbl: Option<View>,
    pub(crate) rom_digest: Option<View>,
    pub(crate) mcpx_block: Option<View>,
    pub(crate) available_space: usize,
    pub(crate) status: BiosStatus,
    pub(crate) params: LoadParams,
    pub(crate) crypto: Box<dyn BootCrypto>,
    pub(crate) codec: Box<dyn KernelCodec>,
}

impl Default for Bios {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bios {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bios")
            .field("size", &self.data.len())
            .field("status", &self.status)
            .field("bldr", &self.bldr)
            .field("preldr", &self.preldr)
            .field("kernel", &self.kernel)
            .field("init_tbl", &self.init_tbl)
            .field("available_space", &self.available_space)
            .finish_non_exhaustive()
    }
}

impl Bios {
    /// An empty image using [`XboxCrypto`] and [`Lz4Codec`].
    pub fn new() -> Self {
        Self::with_backends(XboxCrypto, Lz4Codec)
    }

    pub fn with_backends(
        crypto: impl BootCrypto + 'static,
        codec: impl KernelCodec + 'static,
    ) -> Self {
        Self {
            data: Vec::new(),
            bldr: Bootloader::default(),
            preldr: Preloader::default(),
            kernel: Kernel::default(),
            init_tbl: None,
            rom_digest: None,
            mcpx_block: None,
            available_space: 0,
            status: BiosStatus::Failed,
            params: LoadParams::default(),
            crypto: Box::new(crypto),
            codec: Box::new(codec),
        }
    }

    /// Take ownership of `buf` and place the fixed blocks. Does not decrypt anything.
    ///
    /// On error nothing is retained and the status is [`BiosStatus::Failed`].
    pub fn init(&mut self, buf: Vec<u8>, params: &LoadParams) -> Result<(), LoadError> {
        self.unload();

        let binsize = buf.len();
        check_size(binsize)?;
        let romsize = params.effective_romsize(binsize);
        check_size(romsize)?;
        if romsize > binsize {
            return Err(LoadError::RomLargerThanImage { romsize, binsize });
        }

        self.data = buf;
        self.params = params.clone();
        self.bldr.encrypted = params.enc_bldr;
        self.kernel.encrypted = params.enc_kernel;
        self.resolve_offsets();
        if self.bldr.block.is_none() {
            self.unload();
            return Err(LoadError::NoRoomForBlocks);
        }

        self.status = BiosStatus::Success;
        debug!(binsize, romsize, revision = ?params.mcpx.revision, "image initialized");
        Ok(())
    }

    /// Load an image: place the blocks, decrypt and validate the bootloader (through the
    /// preloader when the revision has one), then decrypt and decompress the kernel.
    ///
    /// | step | condition | action |
    /// |---|---|---|
    /// | init | size invalid | `Failed`, stop |
    /// | preloader | revision has a preloader | [`Bios::preldr_validate_and_decrypt_bldr`] |
    /// | direct | bootloader still encrypted | decrypt with `bldr_key`, or an all-zero key |
    /// | validate | boot params invalid | undo the direct decrypt, `SuccessInvalidBootloader`, stop |
    /// | pass 2 | valid | [`Bios::resolve_kernel_offsets`] |
    /// | kernel | kernel encrypted | [`Bios::symmetric_enc_dec_kernel`] |
    /// | kernel | always | [`Bios::decompress_kernel`]; failure is logged and leaves the image unset |
    pub fn load(&mut self, buf: Vec<u8>, params: &LoadParams) -> BiosStatus {
        if let Err(err) = self.init(buf, params) {
            warn!(%err, "image rejected");
            return self.status;
        }

        if params.mcpx.revision.has_preldr() {
            self.preldr_validate_and_decrypt_bldr();
        }

        let mut direct = None;
        if self.bldr.encrypted {
            let key = params.bldr_key.unwrap_or([0; KEY_SIZE]);
            let len = self.bldr_crypt_len();
            debug!(
                supplied = params.bldr_key.is_some(),
                len, "decrypting bootloader directly"
            );
            self.symmetric_enc_dec_bldr(&key, len);
            direct = Some((key, len));
        }

        if let Err(err) = self.validate_bldr_boot_params() {
            warn!(%err, "bootloader did not validate");
            if let Some((key, len)) = direct {
                self.symmetric_enc_dec_bldr(&key, len);
            }
            self.status = BiosStatus::SuccessInvalidBootloader;
            info!(status = ?self.status, preldr = ?self.preldr.status, "image loaded");
            return self.status;
        }

        self.resolve_kernel_offsets();
        if self.kernel.encrypted {
            self.symmetric_enc_dec_kernel();
        }
        if let Err(err) = self.decompress_kernel() {
            warn!(%err, "kernel did not decompress");
        }

        info!(
            status = ?self.status,
            preldr = ?self.preldr.status,
            rom_verified = self.preldr.rom_verified,
            kernel = self.kernel.img_size(),
            "image loaded"
        );
        self.status
    }

    /// Drop the image and every view into it. Safe to call repeatedly.
    pub fn unload(&mut self) {
        self.data = Vec::new();
        self.bldr = Bootloader::default();
        self.preldr = Preloader::default();
        self.kernel = Kernel::default();
        self.init_tbl = None;
        self.rom_digest = None;
        self.mcpx_block = None;
        self.available_space = 0;
        self.status = BiosStatus::Failed;
        self.params = LoadParams::default();
    }

    /// First pass: place the boot ROM, preloader and bootloader blocks from the image size
    /// alone. Kernel views are cleared until [`Bios::resolve_kernel_offsets`] runs.
    pub fn resolve_offsets(&mut self) {
        let size = self.data.len();
        let rom_start = size - self.romsize().min(size);
        self.bldr.clear_views();
        self.kernel.clear_views();
        self.available_space = 0;
        self.init_tbl = View::new(rom_start, INIT_TBL_HEADER_SIZE)
            .fits(size)
            .then(|| View::new(rom_start, INIT_TBL_HEADER_SIZE));

        let Some(offsets) = layout::block_offsets(size, &self.params.mcpx) else {
            self.mcpx_block = None;
            self.preldr.place(None);
            self.rom_digest = None;
            return;
        };

        self.mcpx_block = Some(offsets.mcpx);
        self.preldr.place(offsets.preldr);
        self.rom_digest = offsets
            .preldr
            .and_then(|block| block.sub(ROM_DIGEST_OFFSET, ROM_DIGEST_SIZE));
        self.bldr.place(offsets.bldr);
        debug!(
            mcpx = offsets.mcpx.offset,
            preldr = ?offsets.preldr.map(|v| v.offset),
            bldr = offsets.bldr.offset,
            "blocks placed"
        );
    }

    /// Second pass: place the kernel, its data section, the keys block and the full init table
    /// from the plaintext boot params. Does nothing while the bootloader is encrypted.
    pub fn resolve_kernel_offsets(&mut self) {
        if self.bldr.encrypted {
            return;
        }
        let (Some(block), Some(bp), Some(entry)) =
            (self.bldr.block, self.raw_boot_params(), self.raw_bldr_entry())
        else {
            return;
        };

        self.bldr.keys = keys_offset(&entry).and_then(|offset| block.sub(offset, BLDR_KEYS_SIZE));

        let size = self.data.len();
        let rom_start = size - self.romsize().min(size);
        let inittbl_size = bp.inittbl_size as usize;
        let init_tbl = View::new(rom_start, inittbl_size);
        if inittbl_size >= INIT_TBL_HEADER_SIZE && init_tbl.fits(size) {
            self.init_tbl = Some(init_tbl);
        }

        let Some(krnl) =
            layout::kernel_offsets(block.offset, bp.krnl_size as usize, bp.kernel_data_size())
        else {
            self.kernel.clear_views();
            return;
        };
        self.kernel.compressed = Some(krnl.compressed);
        self.kernel.data = Some(krnl.data);
        self.available_space = krnl
            .data
            .offset
            .saturating_sub(rom_start.saturating_add(inittbl_size));
        debug!(
            krnl = krnl.compressed.offset,
            krnl_data = krnl.data.offset,
            available_space = self.available_space,
            "kernel placed"
        );
    }

    /// Size of one ROM copy in the image.
    pub fn romsize(&self) -> usize {
        self.params.effective_romsize(self.data.len())
    }

    pub(crate) fn view_bytes(&self, view: Option<View>) -> Option<&[u8]> {
        self.data.get(view?.range())
    }

    pub(crate) fn view_bytes_mut(&mut self, view: Option<View>) -> Option<&mut [u8]> {
        self.data.get_mut(view?.range())
    }

    pub fn status(&self) -> BiosStatus {
        self.status
    }

    pub fn preldr_status(&self) -> PreldrStatus {
        self.preldr.status
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn params(&self) -> &LoadParams {
        &self.params
    }

    pub fn bldr(&self) -> &Bootloader {
        &self.bldr
    }

    pub fn preldr(&self) -> &Preloader {
        &self.preldr
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    /// Free bytes between the init table and the kernel data section.
    pub fn available_space(&self) -> usize {
        self.available_space
    }

    pub fn bldr_data(&self) -> Option<&[u8]> {
        self.view_bytes(self.bldr.block)
    }

    pub fn boot_params(&self) -> Option<BootParams> {
        if self.bldr.encrypted {
            return None;
        }
        self.raw_boot_params()
    }

    pub fn ldr_params(&self) -> Option<LoaderParams> {
        if self.bldr.encrypted {
            return None;
        }
        LoaderParams::parse(self.view_bytes(self.bldr.ldr_params)?)
    }

    pub fn bldr_entry(&self) -> Option<BldrEntry> {
        if self.bldr.encrypted {
            return None;
        }
        self.raw_bldr_entry()
    }

    pub fn bldr_keys(&self) -> Option<BldrKeys> {
        if self.bldr.encrypted {
            return None;
        }
        BldrKeys::parse(self.view_bytes(self.bldr.keys)?)
    }

    /// Boot-from-media key slot.
    pub fn bfm_key(&self) -> Option<[u8; KEY_SIZE]> {
        if self.bldr.encrypted {
            return None;
        }
        self.view_bytes(self.bldr.bfm_key)?.try_into().ok()
    }

    pub fn compressed_kernel(&self) -> Option<&[u8]> {
        self.view_bytes(self.kernel.compressed)
    }

    pub fn kernel_data(&self) -> Option<&[u8]> {
        self.view_bytes(self.kernel.data)
    }

    pub fn kernel_image(&self) -> Option<&[u8]> {
        self.kernel.img()
    }

    /// Init table bytes: the header until the boot params are known, then the whole table.
    pub fn init_table_data(&self) -> Option<&[u8]> {
        self.view_bytes(self.init_tbl)
    }

    pub fn init_table(&self) -> Option<InitTable> {
        InitTable::parse(self.init_table_data()?)
    }

    pub fn rom_digest(&self) -> Option<&[u8]> {
        self.view_bytes(self.rom_digest)
    }

    pub fn mcpx_block(&self) -> Option<&[u8]> {
        self.view_bytes(self.mcpx_block)
    }

    pub fn preldr_data(&self) -> Option<&[u8]> {
        self.view_bytes(self.preldr.block)
    }

    pub fn preldr_nonce(&self) -> Option<&[u8]> {
        self.view_bytes(self.preldr.params)
            .map(|params| &params[..PRELDR_NONCE_SIZE])
    }

    pub fn preldr_ptr_block(&self) -> Option<PtrBlock> {
        PtrBlock::parse(self.view_bytes(self.preldr.ptr_block)?)
    }

    pub fn preldr_func_block(&self) -> Option<FuncBlock> {
        FuncBlock::parse(self.view_bytes(self.preldr.func_block)?)
    }

    /// The preloader's public key, once it has been recognized. The image keeps it encrypted.
    pub fn preldr_public_key(&self) -> Option<PublicKey> {
        self.preldr.key.clone()
    }
}
