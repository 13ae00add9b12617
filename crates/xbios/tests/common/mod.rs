//! Synthetic boot-chain components shared by the `xbios` integration tests.
//!
//! None of this is real console code; the components only carry the structure the loader
//! checks (pointers, headers, sizes), with patterned filler everywhere else.

#![allow(dead_code)]

use xbios::layout::{
    self, View, BFM_KEY_OFFSET, BLDR_BASE, BLDR_BLOCK_SIZE, BLDR_ENTRY_OFFSET, BLDR_RELOC,
    DEFAULT_MCPX_BLOCK_SIZE, KEY_SIZE, PRELDR_BLOCK_SIZE, PRELDR_JMP_OPCODE,
    PRELDR_PARAMS_OFFSET, PRELDR_PTR_BLOCK_OFFSET, PUBLIC_KEY_SIZE, RSA_MODULUS_SIZE,
};
use xbios::{
    Bios, BldrEntry, BldrKeys, BootCrypto, BuildParams, FuncBlock, LoadParams, Lz4Codec, Mcpx,
    McpxRevision, PtrBlock, PublicKey, RsaHeader, XboxCrypto,
};

pub const BLDR_KEY: [u8; KEY_SIZE] = *b"bootloader-key-0";
pub const KERNEL_KEY: [u8; KEY_SIZE] = *b"kernel-key-00001";
pub const EEPROM_KEY: [u8; KEY_SIZE] = *b"eeprom-key-00002";
pub const CERT_KEY: [u8; KEY_SIZE] = *b"cert-key-0000003";
pub const SBKEY: [u8; KEY_SIZE] = *b"secret-boot-key!";

pub const INIT_TBL_SIZE: usize = 0x1000;
pub const INIT_TBL_IDENTIFIER: u16 = 0x46;
pub const KERNEL_DATA_SIZE: usize = 0x800;
pub const KEYS_OFFSET: usize = 0x100;
pub const COMMAND_LINE: &[u8] = b"/SHADOW /HDBOOT";

pub const FUNC_BLOCK_OFFSET: usize = 0x2000;
pub const PUBLIC_KEY_OFFSET: usize = 0x2100;
pub const NONCE: [u8; 16] = *b"preloader-nonce!";

/// Deterministic filler so blocks are not all zero.
pub fn filler(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

pub fn init_table() -> Vec<u8> {
    let mut tbl = filler(INIT_TBL_SIZE, 0x1111);
    tbl[0x78..0x7A].copy_from_slice(&INIT_TBL_IDENTIFIER.to_le_bytes());
    tbl[0x7A..0x7C].copy_from_slice(&0x1625u16.to_le_bytes());
    tbl
}

/// A full bootloader block with loader params, a keys block at [`KEYS_OFFSET`] and an entry
/// record pointing at it. Boot params are left for the builder.
pub fn bootloader() -> Vec<u8> {
    let mut bldr = filler(BLDR_BLOCK_SIZE, 0x2222);
    bldr[..4].copy_from_slice(&BLDR_BASE.to_le_bytes());
    bldr[4..4 + 64].fill(0);
    bldr[4..4 + COMMAND_LINE.len()].copy_from_slice(COMMAND_LINE);

    let keys = BldrKeys {
        eeprom_key: [0xEE; KEY_SIZE],
        cert_key: [0xCE; KEY_SIZE],
        krnl_key: KERNEL_KEY,
    };
    bldr[KEYS_OFFSET..KEYS_OFFSET + 48].copy_from_slice(&keys.to_bytes());
    bldr[BFM_KEY_OFFSET..BFM_KEY_OFFSET + KEY_SIZE].fill(0);

    let entry = BldrEntry {
        keys_ptr: BLDR_RELOC + KEYS_OFFSET as u32,
        bfm_entry_point: 0,
    };
    bldr[BLDR_ENTRY_OFFSET..BLDR_ENTRY_OFFSET + 8].copy_from_slice(&entry.to_bytes());
    bldr
}

/// Compressible stand-in for a kernel image.
pub fn kernel_image() -> Vec<u8> {
    let mut img = Vec::new();
    for i in 0..0x800u32 {
        img.extend_from_slice(format!("section {i:04x} ").as_bytes());
    }
    img.extend_from_slice(&filler(0x400, 0x3333));
    img
}

pub fn compressed_kernel() -> Vec<u8> {
    Lz4Codec::compress(&kernel_image())
}

pub fn kernel_data() -> Vec<u8> {
    filler(KERNEL_DATA_SIZE, 0x4444)
}

pub fn public_key() -> PublicKey {
    let mut modulus = [0u8; RSA_MODULUS_SIZE];
    modulus.copy_from_slice(&filler(RSA_MODULUS_SIZE, 0x5555));
    PublicKey {
        header: RsaHeader {
            magic: layout::RSA1_MAGIC,
            mod_size: RSA_MODULUS_SIZE as u32,
            bits: 2048,
            max_bytes: 255,
            exponent: 65537,
        },
        modulus,
    }
}

/// A preloader block whose tables lead to an encrypted, well-formed public key.
pub fn preloader() -> Vec<u8> {
    let base = layout::preldr_real_base(DEFAULT_MCPX_BLOCK_SIZE);
    let mut block = filler(PRELDR_BLOCK_SIZE, 0x6666);

    block[0] = PRELDR_JMP_OPCODE;
    block[1..5].copy_from_slice(&0x0000_1234u32.to_le_bytes());

    let ptr = PtrBlock {
        func_block_ptr: base + FUNC_BLOCK_OFFSET as u32,
        reserved: 0,
    };
    block[PRELDR_PTR_BLOCK_OFFSET..PRELDR_PTR_BLOCK_OFFSET + 8].copy_from_slice(&ptr.to_bytes());

    let func = FuncBlock {
        pubkey_ptr: base + PUBLIC_KEY_OFFSET as u32,
        sha1_ptr: base + 0x400,
        rc4_ptr: base + 0x800,
        rsa_verify_ptr: base + 0xC00,
    };
    block[FUNC_BLOCK_OFFSET..FUNC_BLOCK_OFFSET + 16].copy_from_slice(&func.to_bytes());

    let mut key = public_key().to_bytes();
    XboxCrypto.public_key_cipher(&mut key);
    block[PUBLIC_KEY_OFFSET..PUBLIC_KEY_OFFSET + PUBLIC_KEY_SIZE].copy_from_slice(&key);

    let digest = View::new(layout::ROM_DIGEST_OFFSET, layout::ROM_DIGEST_SIZE);
    block[digest.range()].fill(0);
    block[PRELDR_PARAMS_OFFSET..PRELDR_PARAMS_OFFSET + 0x80].fill(0);
    block[PRELDR_PARAMS_OFFSET..PRELDR_PARAMS_OFFSET + 16].copy_from_slice(&NONCE);
    block
}

pub fn build_params() -> BuildParams {
    BuildParams {
        init_tbl: init_table(),
        preldr: None,
        bldr: bootloader(),
        compressed_kernel: compressed_kernel(),
        kernel_data: kernel_data(),
        eeprom_key: Some(EEPROM_KEY),
        cert_key: Some(CERT_KEY),
        ..BuildParams::default()
    }
}

pub fn v1_0_params() -> LoadParams {
    LoadParams {
        bldr_key: Some(BLDR_KEY),
        ..LoadParams::default()
    }
}

pub fn v1_1_params() -> LoadParams {
    LoadParams {
        mcpx: Mcpx::new(McpxRevision::V1_1).with_sbkey(SBKEY),
        ..LoadParams::default()
    }
}

pub fn build_image(build: &BuildParams, binsize: usize, params: &LoadParams) -> Vec<u8> {
    let mut bios = Bios::new();
    bios.build(build, binsize as u32, params)
        .expect("fixture components build");
    bios.data().to_vec()
}
