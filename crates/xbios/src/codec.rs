use crate::error::DecompressError;

/// Largest kernel image a stream may declare.
pub const MAX_KERNEL_IMAGE_SIZE: usize = 0x0100_0000;

const SIZE_PREFIX_LEN: usize = 4;

/// Kernel compression used by the image.
pub trait KernelCodec: Send + Sync {
    /// Decompress a whole compressed kernel stream.
    fn decompress(&self, src: &[u8]) -> Result<Vec<u8>, DecompressError>;
}

/// LZ4 block framed by a little-endian `u32` of the decompressed size.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Codec;

impl Lz4Codec {
    pub fn compress(data: &[u8]) -> Vec<u8> {
        lz4_flex::block::compress_prepend_size(data)
    }
}

impl KernelCodec for Lz4Codec {
    fn decompress(&self, src: &[u8]) -> Result<Vec<u8>, DecompressError> {
        let (prefix, block) = src
            .split_first_chunk::<SIZE_PREFIX_LEN>()
            .ok_or(DecompressError::Truncated)?;
        let declared = u32::from_le_bytes(*prefix) as usize;
        if declared > MAX_KERNEL_IMAGE_SIZE {
            return Err(DecompressError::TooLarge(declared));
        }

        let out = lz4_flex::block::decompress(block, declared)?;
        if out.len() != declared {
            return Err(DecompressError::SizeMismatch {
                declared,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..0x4000u32).map(|i| (i % 251) as u8 ^ (i >> 8) as u8).collect()
    }

    #[test]
    fn compressed_stream_decompresses() {
        let data = sample();
        let packed = Lz4Codec::compress(&data);
        assert_eq!(Lz4Codec.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn short_stream_is_truncated() {
        assert!(matches!(
            Lz4Codec.decompress(&[1, 2]),
            Err(DecompressError::Truncated)
        ));
    }

    #[test]
    fn oversized_declaration_is_rejected() {
        let mut packed = Lz4Codec::compress(&sample());
        packed[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            Lz4Codec.decompress(&packed),
            Err(DecompressError::TooLarge(_))
        ));
    }

    #[test]
    fn declared_size_must_match_output() {
        let data = sample();
        let mut packed = Lz4Codec::compress(&data);
        let bigger = (data.len() as u32 + 16).to_le_bytes();
        packed[..4].copy_from_slice(&bigger);
        assert!(Lz4Codec.decompress(&packed).is_err());
    }
}
