//! ROM layout constants and the offset arithmetic shared by loading and building.
//!
//! Blocks are placed from the top of the image downwards:
//!
//! ```text
//! [0 .. inittbl)            init table
//!  ... free space ...
//! [krnl - data .. krnl)     kernel data section
//! [krnl .. bldr)            compressed kernel
//! [bldr .. +0x6000)         bootloader (2BL)
//! [preldr .. +0x2A00)       preloader (MCPX 1.1 only)
//! [size - mcpx .. size)     boot ROM
//! ```
//!
//! Everything in here is pure arithmetic; nothing reads image bytes.

use std::ops::Range;

use crate::mcpx::Mcpx;

pub const MIN_BIOS_SIZE: usize = 0x4_0000;
pub const MAX_BIOS_SIZE: usize = 0x10_0000;

/// Set in `krnl_data_size` to request a delayed kernel data copy; not part of the size.
pub const KD_DELAY_FLAG: u32 = 0x8000_0000;

pub const KEY_SIZE: usize = 16;
pub const DIGEST_SIZE: usize = 20;

pub const DEFAULT_MCPX_BLOCK_SIZE: usize = 0x200;

// --- Preloader block ---

pub const ROM_DIGEST_SIZE: usize = 0x100;
pub const PRELDR_BLOCK_SIZE: usize = 0x2A00;
pub const PRELDR_PARAMS_SIZE: usize = 0x80;
pub const PRELDR_SIZE: usize = PRELDR_BLOCK_SIZE - ROM_DIGEST_SIZE - PRELDR_PARAMS_SIZE;
pub const PRELDR_NONCE_SIZE: usize = 0x10;

pub const PRELDR_JMP_OPCODE: u8 = 0xE9;
pub const PRELDR_JMP_OFFSET: usize = 1;
pub const PRELDR_PTR_BLOCK_SIZE: usize = 8;
pub const PRELDR_PTR_BLOCK_OFFSET: usize = PRELDR_SIZE - PRELDR_PTR_BLOCK_SIZE;
pub const PRELDR_FUNC_BLOCK_SIZE: usize = 16;
pub const ROM_DIGEST_OFFSET: usize = PRELDR_SIZE;
pub const PRELDR_PARAMS_OFFSET: usize = PRELDR_SIZE + ROM_DIGEST_SIZE;

/// "RSA1"
pub const RSA1_MAGIC: u32 = 0x3141_5352;
pub const RSA_BITS: u32 = 2048;
pub const RSA_HEADER_SIZE: usize = 20;
pub const RSA_MODULUS_SIZE: usize = 264;
pub const PUBLIC_KEY_SIZE: usize = RSA_HEADER_SIZE + RSA_MODULUS_SIZE;

// --- Bootloader block ---

pub const BLDR_BLOCK_SIZE: usize = 0x6000;
/// Address the bootloader relocates itself to; `keys_ptr` is expressed against it.
pub const BLDR_RELOC: u32 = 0x0040_0000;
/// Address the bootloader is copied to before it starts executing.
pub const BLDR_BASE: u32 = 0x0009_0000;

/// "JyTx"
pub const BOOT_SIGNATURE: u32 = 0x7854_794A;

pub const COMMAND_LINE_SIZE: usize = 64;
pub const LDR_PARAMS_SIZE: usize = 4 + COMMAND_LINE_SIZE;
pub const BLDR_KEYS_SIZE: usize = 3 * KEY_SIZE;
pub const BLDR_ENTRY_SIZE: usize = 8;
pub const BOOT_PARAMS_SIZE: usize = 16 + DIGEST_SIZE;
pub const BOOT_PARAMS_OFFSET: usize = BLDR_BLOCK_SIZE - BOOT_PARAMS_SIZE;
pub const BLDR_ENTRY_OFFSET: usize = BOOT_PARAMS_OFFSET - BLDR_ENTRY_SIZE;
pub const BFM_KEY_OFFSET: usize = BLDR_ENTRY_OFFSET - KEY_SIZE;

// --- Init table ---

pub const INIT_TBL_HEADER_SIZE: usize = 0x80;
pub const INIT_TBL_IDENTIFIER_OFFSET: usize = 0x78;
pub const INIT_TBL_KERNEL_VER_OFFSET: usize = 0x7A;

/// A byte range inside the image buffer owned by [`crate::Bios`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct View {
    pub offset: usize,
    pub len: usize,
}

impl View {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// A sub-view at `offset..offset + len` relative to this view's start.
    pub fn sub(&self, offset: usize, len: usize) -> Option<View> {
        let end = offset.checked_add(len)?;
        if end > self.len {
            return None;
        }
        Some(View::new(self.offset + offset, len))
    }

    /// Whether the view lies within a buffer of `size` bytes.
    pub fn fits(&self, size: usize) -> bool {
        self.offset
            .checked_add(self.len)
            .is_some_and(|end| end <= size)
    }
}

/// Placement of the fixed-size blocks at the top of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockOffsets {
    pub mcpx: View,
    pub preldr: Option<View>,
    pub bldr: View,
}

/// First pass: place the boot ROM, preloader and bootloader blocks for an image of `size`.
pub fn block_offsets(size: usize, mcpx: &Mcpx) -> Option<BlockOffsets> {
    let mcpx_start = size.checked_sub(mcpx.block_size)?;
    let (preldr, bldr_end) = if mcpx.revision.has_preldr() {
        let preldr_start = mcpx_start.checked_sub(PRELDR_BLOCK_SIZE)?;
        (
            Some(View::new(preldr_start, PRELDR_BLOCK_SIZE)),
            preldr_start,
        )
    } else {
        (None, mcpx_start)
    };
    let bldr_start = bldr_end.checked_sub(BLDR_BLOCK_SIZE)?;

    Some(BlockOffsets {
        mcpx: View::new(mcpx_start, mcpx.block_size),
        preldr,
        bldr: View::new(bldr_start, BLDR_BLOCK_SIZE),
    })
}

/// Placement of the kernel below the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelOffsets {
    pub compressed: View,
    pub data: View,
}

/// Second pass: place the compressed kernel and its data section below `bldr_start`, using
/// sizes read from plaintext boot params.
pub fn kernel_offsets(
    bldr_start: usize,
    krnl_size: usize,
    krnl_data_size: usize,
) -> Option<KernelOffsets> {
    let krnl_start = bldr_start.checked_sub(krnl_size)?;
    let data_start = krnl_start.checked_sub(krnl_data_size)?;
    Some(KernelOffsets {
        compressed: View::new(krnl_start, krnl_size),
        data: View::new(data_start, krnl_data_size),
    })
}

/// Bytes of a ROM taken up by the fixed blocks for this revision.
pub fn fixed_blocks_size(mcpx: &Mcpx) -> usize {
    let preldr = if mcpx.revision.has_preldr() {
        PRELDR_BLOCK_SIZE
    } else {
        0
    };
    mcpx.block_size + preldr + BLDR_BLOCK_SIZE
}

/// Bytes of a ROM used by all components, or `None` on overflow.
pub fn rom_used(
    mcpx: &Mcpx,
    inittbl_size: usize,
    krnl_data_size: usize,
    krnl_size: usize,
) -> Option<usize> {
    fixed_blocks_size(mcpx)
        .checked_add(inittbl_size)?
        .checked_add(krnl_data_size)?
        .checked_add(krnl_size)
}

/// ROM address the preloader block is mapped at.
pub fn preldr_real_base(mcpx_block_size: usize) -> u32 {
    let base = (1u64 << 32)
        .saturating_sub(mcpx_block_size as u64)
        .saturating_sub(PRELDR_BLOCK_SIZE as u64);
    base as u32
}

/// Translate a 32-bit address into a `len`-byte window of `window` bytes mapped at `base`.
pub fn addr_to_offset(addr: u32, base: u32, len: usize, window: usize) -> Option<usize> {
    let offset = addr.checked_sub(base)? as usize;
    let end = offset.checked_add(len)?;
    (end <= window).then_some(offset)
}
