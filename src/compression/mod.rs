//! 列数据压缩/解压（LZ4 / None）

use crate::common::{MetaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None,
    Lz4,
}

impl CompressionType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4  => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            _ => Err(MetaError::Compression(format!("unknown codec tag {v}"))),
        }
    }
}

pub fn compress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  =>
            lz4::block::compress(data, None, false)
                .map_err(|e| MetaError::Compression(e.to_string())),
    }
}

pub fn decompress(
    data:             &[u8],
    codec:            CompressionType,
    uncompressed_len: usize,
) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  => {
            // 空输入压缩后仍有字节，但 uncompressed_size=0 时 lz4 会拒绝
            if uncompressed_len == 0 {
                return Ok(Vec::new());
            }
            let size = i32::try_from(uncompressed_len).map_err(|_| {
                MetaError::Compression(format!("block too large: {uncompressed_len} bytes"))
            })?;
            lz4::block::decompress(data, Some(size))
                .map_err(|e| MetaError::Compression(e.to_string()))
        }
    }
}
