use crate::layout::{INIT_TBL_HEADER_SIZE, INIT_TBL_IDENTIFIER_OFFSET, INIT_TBL_KERNEL_VER_OFFSET};

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

/// The fields of the init table header worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitTable {
    pub identifier: u16,
    pub kernel_ver: u16,
}

impl InitTable {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < INIT_TBL_HEADER_SIZE {
            return None;
        }
        Some(Self {
            identifier: read_u16(bytes, INIT_TBL_IDENTIFIER_OFFSET),
            kernel_ver: read_u16(bytes, INIT_TBL_KERNEL_VER_OFFSET),
        })
    }
}

/// Invert the identifier so the boot ROM rejects the table.
pub(crate) fn corrupt(bytes: &mut [u8]) {
    let range = INIT_TBL_IDENTIFIER_OFFSET..INIT_TBL_IDENTIFIER_OFFSET + 2;
    if let Some(identifier) = bytes.get_mut(range) {
        identifier.iter_mut().for_each(|b| *b = !*b);
    }
}
