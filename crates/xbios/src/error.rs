use thiserror::Error;

use crate::layout::{MAX_BIOS_SIZE, MIN_BIOS_SIZE};

/// Size errors raised by [`crate::Bios::init`]. Always fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("image size {size:#x} outside [{:#x}, {:#x}]", MIN_BIOS_SIZE, MAX_BIOS_SIZE)]
    ImageSize { size: usize },

    #[error("rom size {romsize:#x} larger than image size {binsize:#x}")]
    RomLargerThanImage { romsize: usize, binsize: usize },

    #[error("image too small for the boot blocks of this revision")]
    NoRoomForBlocks,
}

/// Reasons a plaintext bootloader is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootParamsError {
    #[error("bootloader is still encrypted")]
    Encrypted,

    #[error("bootloader not located")]
    NotLocated,

    #[error("bad boot signature {0:#010x}")]
    BadSignature(u32),

    #[error("boot params digest mismatch")]
    DigestMismatch,

    #[error("kernel size is zero")]
    EmptyKernel,

    #[error("init table size {0:#x} smaller than its header")]
    InitTableTooSmall(usize),

    #[error("components need {needed:#x} bytes but the rom holds {romsize:#x}")]
    ExceedsRom { needed: usize, romsize: usize },

    #[error("keys pointer {0:#010x} outside the bootloader")]
    KeysOutOfRange(u32),
}

/// Reasons the preloader could not be used.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreldrError {
    #[error("no preloader block for this revision")]
    NotPresent,

    #[error("{what} pointer {ptr:#010x} outside the preloader")]
    PointerOutOfRange { what: &'static str, ptr: u32 },

    #[error("unrecognized public key header (magic {magic:#010x})")]
    UnrecognizedKey { magic: u32 },
}

#[derive(Debug, Error)]
pub enum DecompressError {
    #[error("compressed stream truncated")]
    Truncated,

    #[error("declared size {0:#x} exceeds the kernel image limit")]
    TooLarge(usize),

    #[error("lz4 decompression failed: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),

    #[error("declared size {declared:#x} but stream produced {actual:#x} bytes")]
    SizeMismatch { declared: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel is still encrypted")]
    Encrypted,

    #[error("kernel not located; bootloader has not been validated")]
    NotLocated,

    #[error(transparent)]
    Decompress(#[from] DecompressError),
}

/// Inconsistent inputs to [`crate::Bios::build`]. No partial image is valid output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error(transparent)]
    Size(#[from] LoadError),

    #[error("missing {0}")]
    MissingComponent(&'static str),

    #[error("{what} is {len:#x} bytes; at most {max:#x} fit")]
    ComponentTooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{what} is {len:#x} bytes; at least {min:#x} needed")]
    ComponentTooSmall {
        what: &'static str,
        len: usize,
        min: usize,
    },

    #[error("components need {needed:#x} bytes but the rom holds {romsize:#x}")]
    Overflow { needed: usize, romsize: usize },

    #[error("this revision has no preloader block")]
    PreldrUnsupported,

    #[error("the rom digest lives in the preloader block; this revision has none")]
    DigestWithoutPreldr,

    #[error("boot-from-media images carry no preloader")]
    BfmWithPreldr,

    #[error("keys block not located in the bootloader")]
    KeysNotLocated,

    #[error("cannot replicate {from:#x} bytes up to {to:#x} in a {len:#x} byte buffer")]
    Replicate { from: usize, to: usize, len: usize },
}
