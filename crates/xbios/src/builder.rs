//! Image assembly: the inverse of [`Bios::load`].

use tracing::{debug, info};

use crate::bios::{Bios, BiosStatus};
use crate::bldr::BootParams;
use crate::check_size;
use crate::error::{BuildError, LoadError};
use crate::inittbl;
use crate::layout::{
    self, BLDR_BASE, BLDR_BLOCK_SIZE, BOOT_PARAMS_OFFSET, BOOT_SIGNATURE, DIGEST_SIZE,
    INIT_TBL_HEADER_SIZE, KD_DELAY_FLAG, KEY_SIZE, PRELDR_BLOCK_SIZE, ROM_DIGEST_SIZE,
};
use crate::params::LoadParams;

/// Which bootloader flavour to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootloaderMode {
    #[default]
    Retail,
    /// Boot from media: the bootloader key goes into the bfm slot and the bfm entry point is set.
    BootFromMedia,
}

/// Deliberate corruption, for exercising loaders against bad images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tamper {
    #[default]
    None,
    /// Invert the init table identifier.
    InitTable,
    /// Store an inverted boot signature under a consistent digest.
    Signature,
}

/// How the boot params survive bootloader encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootParamsMode {
    /// Left in plaintext; load with `restore_boot_params` set.
    #[default]
    Restore,
    /// Encrypted with the rest of the block.
    Omit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelKeyMode {
    /// `LoadParams::kernel_key`, else the key already in the bootloader's keys block.
    #[default]
    Supplied,
    /// All-zero kernel key.
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildConfig {
    pub bootloader: BootloaderMode,
    pub tamper: Tamper,
    pub boot_params: BootParamsMode,
    pub kernel_key: KernelKeyMode,
    /// Recompute the ROM digest in the preloader block.
    pub fix_digest: bool,
    /// Set [`KD_DELAY_FLAG`] on the kernel data size.
    pub delay_kernel_data: bool,
}

/// Loose components for [`Bios::build`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildParams {
    pub init_tbl: Vec<u8>,
    pub preldr: Option<Vec<u8>>,
    pub bldr: Vec<u8>,
    pub compressed_kernel: Vec<u8>,
    pub kernel_data: Vec<u8>,
    /// Replaces the EEPROM key in the bootloader's keys block.
    pub eeprom_key: Option<[u8; KEY_SIZE]>,
    /// Replaces the certificate key in the bootloader's keys block.
    pub cert_key: Option<[u8; KEY_SIZE]>,
    pub config: BuildConfig,
}

/// Tile `buf[..from]` over `buf[from..to]`; the last copy is truncated.
pub fn replicate_data(from: usize, to: usize, buf: &mut [u8]) -> Result<(), BuildError> {
    if from == 0 || from > to || to > buf.len() {
        return Err(BuildError::Replicate {
            from,
            to,
            len: buf.len(),
        });
    }
    let mut pos = from;
    while pos < to {
        let n = from.min(to - pos);
        buf.copy_within(..n, pos);
        pos += n;
    }
    Ok(())
}

fn check_fits(what: &'static str, len: usize, max: usize) -> Result<(), BuildError> {
    if len > max {
        return Err(BuildError::ComponentTooLarge { what, len, max });
    }
    Ok(())
}

fn size_u32(what: &'static str, len: usize) -> Result<u32, BuildError> {
    u32::try_from(len).map_err(|_| BuildError::ComponentTooLarge {
        what,
        len,
        max: u32::MAX as usize,
    })
}

impl BuildParams {
    fn validate(&self, params: &LoadParams, romsize: usize) -> Result<(), BuildError> {
        let has_preldr = params.mcpx.revision.has_preldr();

        if self.init_tbl.is_empty() {
            return Err(BuildError::MissingComponent("init table"));
        }
        if self.init_tbl.len() < INIT_TBL_HEADER_SIZE {
            return Err(BuildError::ComponentTooSmall {
                what: "init table",
                len: self.init_tbl.len(),
                min: INIT_TBL_HEADER_SIZE,
            });
        }
        if self.bldr.is_empty() {
            return Err(BuildError::MissingComponent("bootloader"));
        }
        check_fits("bootloader", self.bldr.len(), BLDR_BLOCK_SIZE)?;
        if self.compressed_kernel.is_empty() {
            return Err(BuildError::MissingComponent("compressed kernel"));
        }
        if let Some(preldr) = &self.preldr {
            if !has_preldr {
                return Err(BuildError::PreldrUnsupported);
            }
            check_fits("preloader", preldr.len(), PRELDR_BLOCK_SIZE)?;
        }
        if self.config.fix_digest {
            if !has_preldr {
                return Err(BuildError::DigestWithoutPreldr);
            }
            if self.preldr.is_none() {
                return Err(BuildError::MissingComponent("preloader"));
            }
        }
        if self.config.bootloader == BootloaderMode::BootFromMedia && has_preldr {
            return Err(BuildError::BfmWithPreldr);
        }
        if self.kernel_data.len() as u64 >= u64::from(KD_DELAY_FLAG) {
            return Err(BuildError::ComponentTooLarge {
                what: "kernel data",
                len: self.kernel_data.len(),
                max: KD_DELAY_FLAG as usize - 1,
            });
        }

        let needed = layout::rom_used(
            &params.mcpx,
            self.init_tbl.len(),
            self.kernel_data.len(),
            self.compressed_kernel.len(),
        )
        .unwrap_or(usize::MAX);
        if needed > romsize {
            return Err(BuildError::Overflow { needed, romsize });
        }
        Ok(())
    }

    fn boot_params(&self) -> Result<BootParams, BuildError> {
        let mut krnl_data_size = size_u32("kernel data", self.kernel_data.len())?;
        if self.config.delay_kernel_data {
            krnl_data_size |= KD_DELAY_FLAG;
        }
        let mut bp = BootParams::new(
            krnl_data_size,
            size_u32("init table", self.init_tbl.len())?,
            size_u32("compressed kernel", self.compressed_kernel.len())?,
        );
        if self.config.tamper == Tamper::Signature {
            bp.signature = !BOOT_SIGNATURE;
        }
        Ok(bp)
    }
}

impl Bios {
    /// Assemble an image of `binsize` bytes from loose components, encrypting the bootloader and
    /// kernel as `params` asks. The result is loadable with the same `params`.
    ///
    /// On error the image is unloaded.
    pub fn build(
        &mut self,
        build: &BuildParams,
        binsize: u32,
        params: &LoadParams,
    ) -> Result<(), BuildError> {
        let result = self.assemble(build, binsize as usize, params);
        match &result {
            Ok(()) => info!(
                binsize,
                romsize = self.romsize(),
                available_space = self.available_space,
                "image built"
            ),
            Err(_) => self.unload(),
        }
        result
    }

    fn assemble(
        &mut self,
        build: &BuildParams,
        binsize: usize,
        params: &LoadParams,
    ) -> Result<(), BuildError> {
        self.unload();

        check_size(binsize)?;
        let romsize = params.effective_romsize(binsize);
        check_size(romsize)?;
        if romsize > binsize {
            return Err(LoadError::RomLargerThanImage { romsize, binsize }.into());
        }
        build.validate(params, romsize)?;

        // One ROM copy first; replicated up to binsize at the end.
        self.data = vec![0; romsize];
        self.params = params.clone();
        self.resolve_offsets();
        let block = self.bldr.block.ok_or(LoadError::NoRoomForBlocks)?;

        self.data[..build.init_tbl.len()].copy_from_slice(&build.init_tbl);
        if let (Some(preldr), Some(view)) = (&build.preldr, self.preldr.block) {
            self.data[view.offset..view.offset + preldr.len()].copy_from_slice(preldr);
        }
        self.data[block.offset..block.offset + build.bldr.len()].copy_from_slice(&build.bldr);

        let mut bp = build.boot_params()?;
        bp.seal(&*self.crypto);
        self.write_boot_params(&bp);

        self.bldr.encrypted = false;
        self.kernel.encrypted = false;
        self.resolve_kernel_offsets();

        let compressed = self.kernel.compressed.ok_or(LoadError::NoRoomForBlocks)?;
        let data_view = self.kernel.data.ok_or(LoadError::NoRoomForBlocks)?;
        self.data[compressed.range()].copy_from_slice(&build.compressed_kernel);
        self.data[data_view.range()].copy_from_slice(&build.kernel_data);
        let available_space = self.available_space;

        let mut keys = self.bldr_keys().ok_or(BuildError::KeysNotLocated)?;
        let krnl_key = match build.config.kernel_key {
            KernelKeyMode::Zero => [0; KEY_SIZE],
            KernelKeyMode::Supplied => params.kernel_key.unwrap_or(keys.krnl_key),
        };
        keys.krnl_key = krnl_key;
        if let Some(key) = build.eeprom_key {
            keys.eeprom_key = key;
        }
        if let Some(key) = build.cert_key {
            keys.cert_key = key;
        }
        self.write_bldr_keys(&keys);

        if build.config.bootloader == BootloaderMode::BootFromMedia {
            self.write_bfm_key(&params.bldr_key.unwrap_or([0; KEY_SIZE]));
            let mut entry = self.raw_bldr_entry().ok_or(BuildError::KeysNotLocated)?;
            entry.bfm_entry_point = BLDR_BASE;
            self.write_bldr_entry(&entry);
        }
        if build.config.tamper == Tamper::InitTable {
            inittbl::corrupt(&mut self.data[..build.init_tbl.len()]);
        }

        if params.enc_kernel {
            self.stream_kernel(&krnl_key);
        }
        if params.enc_bldr {
            let len = match build.config.boot_params {
                BootParamsMode::Restore => BOOT_PARAMS_OFFSET,
                BootParamsMode::Omit => BLDR_BLOCK_SIZE,
            };
            let key = self.build_bldr_key(params);
            self.symmetric_enc_dec_bldr(&key, len);
        }

        if build.config.fix_digest {
            self.fix_rom_digest();
        }

        self.data.resize(binsize, 0);
        replicate_data(romsize, binsize, &mut self.data)?;

        self.resolve_offsets();
        self.resolve_kernel_offsets();
        // The second pass cannot see through an encrypted bootloader; carry over what it found
        // while the components were still plaintext.
        self.available_space = available_space;
        self.init_tbl = Some(layout::View::new(binsize - romsize, build.init_tbl.len()));
        self.status = BiosStatus::Success;
        Ok(())
    }

    /// Bootloader key for a build, in the order load tries them: preloader-derived, then the
    /// supplied key, then zero.
    fn build_bldr_key(&mut self, params: &LoadParams) -> Vec<u8> {
        if let Some(sbkey) = params.mcpx.sbkey {
            if self.preldr_decrypt_public_key().is_ok() {
                let key = self.preldr_create_key(&sbkey);
                self.preldr_encrypt_public_key();
                self.preldr.bldr_key = key;
                debug!("bootloader encrypted with preloader key");
                return key.to_vec();
            }
        }
        debug!(supplied = params.bldr_key.is_some(), "bootloader encrypted directly");
        params.bldr_key.unwrap_or([0; KEY_SIZE]).to_vec()
    }

    /// SHA-1 of everything below the preloader block, zero-padded into the ROM digest slot.
    fn fix_rom_digest(&mut self) {
        let (Some(block), Some(view)) = (self.preldr.block, self.rom_digest) else {
            return;
        };
        let digest: [u8; DIGEST_SIZE] = self.crypto.digest(&self.data[..block.offset]);
        let mut slot = [0u8; ROM_DIGEST_SIZE];
        slot[..DIGEST_SIZE].copy_from_slice(&digest);
        self.data[view.range()].copy_from_slice(&slot);
        debug!(covered = block.offset, "rom digest fixed");
    }
}
