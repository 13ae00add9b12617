use crate::layout::{DEFAULT_MCPX_BLOCK_SIZE, KEY_SIZE};

/// Boot ROM revision baked into the MCPX chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum McpxRevision {
    /// Decrypts the bootloader directly; no preloader.
    #[default]
    V1_0,
    /// Hands off to a preloader stored in flash, which derives the bootloader key.
    V1_1,
}

impl McpxRevision {
    pub fn has_preldr(self) -> bool {
        matches!(self, McpxRevision::V1_1)
    }
}

/// Read-only facts supplied by the boot ROM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mcpx {
    pub revision: McpxRevision,
    /// Size of the boot ROM block mapped at the top of the address space.
    pub block_size: usize,
    /// Secret boot key; only present when the boot ROM has been dumped.
    pub sbkey: Option<[u8; KEY_SIZE]>,
}

impl Mcpx {
    pub fn new(revision: McpxRevision) -> Self {
        Self {
            revision,
            block_size: DEFAULT_MCPX_BLOCK_SIZE,
            sbkey: None,
        }
    }

    pub fn with_sbkey(mut self, sbkey: [u8; KEY_SIZE]) -> Self {
        self.sbkey = Some(sbkey);
        self
    }
}

impl Default for Mcpx {
    fn default() -> Self {
        Self::new(McpxRevision::default())
    }
}
