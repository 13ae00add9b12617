#![forbid(unsafe_code)]

//! Original Xbox system ROM images: parsing, decryption and reassembly.
//!
//! A ROM image carries the whole software side of the boot chain below the chip's own boot ROM
//! (the "MCPX" block at the very top of the address space):
//!
//! - an optional preloader (newer chip revisions) holding an encrypted RSA public key and the
//!   nonce used to derive the bootloader key,
//! - the second-stage bootloader ("2BL"), stored encrypted,
//! - the compressed, encrypted kernel and its plaintext data section,
//! - the init table at the very bottom of the image.
//!
//! [`Bios::load`] works out which revision produced an image, decrypts the bootloader (through
//! the preloader when one is present), checks its boot parameters and then decrypts and
//! decompresses the kernel. [`Bios::build`] is the inverse: it assembles and re-encrypts an
//! image from loose components.
//!
//! Every stage structure ([`Bootloader`], [`Preloader`], [`Kernel`]) only stores [`View`]s,
//! `(offset, len)` pairs into the single buffer owned by [`Bios`]. Bytes are reached through
//! accessors on [`Bios`], so nothing can outlive [`Bios::unload`].

mod bios;
mod bldr;
mod builder;
mod codec;
pub mod crypto;
mod error;
mod inittbl;
mod kernel;
pub mod layout;
mod mcpx;
mod params;
mod preldr;

pub use crate::bios::{Bios, BiosStatus};
pub use crate::bldr::{BldrEntry, BldrKeys, BootParams, Bootloader, LoaderParams};
pub use crate::builder::{
    replicate_data, BootParamsMode, BootloaderMode, BuildConfig, BuildParams, KernelKeyMode,
    Tamper,
};
pub use crate::codec::{KernelCodec, Lz4Codec};
pub use crate::crypto::{BootCrypto, XboxCrypto};
pub use crate::error::{
    BootParamsError, BuildError, DecompressError, KernelError, LoadError, PreldrError,
};
pub use crate::inittbl::InitTable;
pub use crate::kernel::Kernel;
pub use crate::layout::View;
pub use crate::mcpx::{Mcpx, McpxRevision};
pub use crate::params::LoadParams;
pub use crate::preldr::{FuncBlock, Preloader, PreldrStatus, PtrBlock, PublicKey, RsaHeader};

/// Check an image (or ROM) size against [`layout::MIN_BIOS_SIZE`]..=[`layout::MAX_BIOS_SIZE`].
pub fn check_size(size: usize) -> Result<(), LoadError> {
    if (layout::MIN_BIOS_SIZE..=layout::MAX_BIOS_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(LoadError::ImageSize { size })
    }
}
