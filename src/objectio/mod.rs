//! Block / 列数据 object 文件读写
//!
//! 文件格式：
//! ```text
//! ┌────────────────────────────────────┐
//! │  MAGIC  (8 bytes) "OLAPOBJ\0"      │
//! │  Version(4 bytes) = 1              │
//! ├────────────────────────────────────┤
//! │  BLOCK 0                           │
//! │    [Column 0 payload]              │ ← LZ4
//! │    [Column 1 payload]              │
//! │    ...                             │
//! │    BlockMeta                       │ ← write_block 返回它的 Extent
//! │      table/segment/block id        │
//! │      column extents + crc32        │
//! │      Meta CRC32 (4 bytes)          │
//! ├────────────────────────────────────┤
//! │  BLOCK 1 ...                       │
//! └────────────────────────────────────┘
//! ```
//!
//! 读取端只依赖 Extent（offset + length），不访问 Catalog。

use std::io::{Cursor, Write};
use std::path::Path;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crate::common::{BlockId, MetaError, Result, SegmentId, TableId};
use crate::compression::{self, CompressionType};
use crate::meta::BlockSnapshot;

const MAGIC: &[u8; 8] = b"OLAPOBJ\0";
const VERSION: u32     = 1;
const HEADER_LEN: u64  = 12;
/// 每列在 BlockMeta 中占用的字节数
const COLUMN_META_LEN: usize = 8 + 8 + 4 + 4 + 1;

fn io_err(e: std::io::Error) -> MetaError {
    MetaError::ObjectIo(e.to_string())
}

// ── Extent ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

impl Extent {
    pub fn new(offset: u64, length: u64) -> Self { Self { offset, length } }
    /// 越过 u64 时为 None
    pub fn end(&self) -> Option<u64> { self.offset.checked_add(self.length) }
}

// ── BlockMeta ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnExtent {
    pub extent:    Extent,
    pub orig_size: u32,
    /// 存储字节（压缩后）的 CRC32
    pub checksum:  u32,
    pub codec:     CompressionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockObject {
    pub table_id:   TableId,
    pub segment_id: SegmentId,
    pub block_id:   BlockId,
    pub columns:    Vec<ColumnExtent>,
}

impl BlockObject {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(26 + self.columns.len() * COLUMN_META_LEN + 4);
        out.write_u64::<LittleEndian>(self.table_id).map_err(io_err)?;
        out.write_u64::<LittleEndian>(self.segment_id).map_err(io_err)?;
        out.write_u64::<LittleEndian>(self.block_id).map_err(io_err)?;
        out.write_u16::<LittleEndian>(self.columns.len() as u16).map_err(io_err)?;
        for c in &self.columns {
            out.write_u64::<LittleEndian>(c.extent.offset).map_err(io_err)?;
            out.write_u64::<LittleEndian>(c.extent.length).map_err(io_err)?;
            out.write_u32::<LittleEndian>(c.orig_size).map_err(io_err)?;
            out.write_u32::<LittleEndian>(c.checksum).map_err(io_err)?;
            out.write_u8(c.codec.as_u8()).map_err(io_err)?;
        }
        let crc = crc32fast::hash(&out);
        out.write_u32::<LittleEndian>(crc).map_err(io_err)?;
        Ok(out)
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(MetaError::ObjectIo("block meta too short".into()));
        }
        let (body, tail) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        if crc32fast::hash(body) != stored {
            return Err(MetaError::ChecksumMismatch);
        }

        let mut cur = Cursor::new(body);
        let table_id    = cur.read_u64::<LittleEndian>().map_err(io_err)?;
        let segment_id  = cur.read_u64::<LittleEndian>().map_err(io_err)?;
        let block_id    = cur.read_u64::<LittleEndian>().map_err(io_err)?;
        let num_columns = cur.read_u16::<LittleEndian>().map_err(io_err)?;
        let mut columns = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let offset    = cur.read_u64::<LittleEndian>().map_err(io_err)?;
            let length    = cur.read_u64::<LittleEndian>().map_err(io_err)?;
            let orig_size = cur.read_u32::<LittleEndian>().map_err(io_err)?;
            let checksum  = cur.read_u32::<LittleEndian>().map_err(io_err)?;
            let codec     = CompressionType::from_u8(cur.read_u8().map_err(io_err)?)?;
            columns.push(ColumnExtent {
                extent: Extent::new(offset, length), orig_size, checksum, codec,
            });
        }
        Ok(Self { table_id, segment_id, block_id, columns })
    }
}

/// 列原始长度落盘为 u32
fn column_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| MetaError::ObjectIo(format!("column too large: {len} bytes")))
}

// ── ObjectWriter ──────────────────────────────────────────────────────────────

pub struct ObjectWriter<W: Write> {
    inner:  W,
    pos:    u64,
    blocks: u32,
}

impl<W: Write> ObjectWriter<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(MAGIC).map_err(io_err)?;
        inner.write_u32::<LittleEndian>(VERSION).map_err(io_err)?;
        Ok(Self { inner, pos: HEADER_LEN, blocks: 0 })
    }

    /// 写入一个 Block 的全部列，返回 BlockMeta 的 Extent
    pub fn write_block(
        &mut self,
        meta:    &BlockSnapshot,
        columns: &[&[u8]],
        codec:   CompressionType,
    ) -> Result<Extent> {
        if columns.len() > u16::MAX as usize {
            return Err(MetaError::ObjectIo(format!("too many columns: {}", columns.len())));
        }
        let mut extents = Vec::with_capacity(columns.len());
        for raw in columns {
            let stored = compression::compress(raw, codec)?;
            self.inner.write_all(&stored).map_err(io_err)?;
            extents.push(ColumnExtent {
                extent:    Extent::new(self.pos, stored.len() as u64),
                orig_size: column_size(raw.len())?,
                checksum:  crc32fast::hash(&stored),
                codec,
            });
            self.pos += stored.len() as u64;
        }

        let object = BlockObject {
            table_id:   meta.table_id,
            segment_id: meta.segment_id,
            block_id:   meta.block_id,
            columns:    extents,
        };
        let bytes  = object.serialize()?;
        let extent = Extent::new(self.pos, bytes.len() as u64);
        self.inner.write_all(&bytes).map_err(io_err)?;
        self.pos    += bytes.len() as u64;
        self.blocks += 1;
        Ok(extent)
    }

    pub fn position(&self) -> u64 { self.pos }
    pub fn block_count(&self) -> u32 { self.blocks }

    pub fn finish(mut self) -> Result<W> {
        self.inner.flush().map_err(io_err)?;
        Ok(self.inner)
    }
}

// ── ObjectReader ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoEntry {
    pub extent: Extent,
    pub data:   Vec<u8>,
}

pub struct ObjectReader {
    name: String,
    data: Vec<u8>,
}

impl ObjectReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(io_err)?;
        Self::from_bytes(&path.display().to_string(), data)
    }

    pub fn from_bytes(name: &str, data: Vec<u8>) -> Result<Self> {
        if (data.len() as u64) < HEADER_LEN || &data[..8] != MAGIC {
            return Err(MetaError::ObjectIo(format!("{name}: invalid object magic")));
        }
        let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if version != VERSION {
            return Err(MetaError::ObjectIo(format!("{name}: unsupported version {version}")));
        }
        Ok(Self { name: name.into(), data })
    }

    pub fn name(&self) -> &str { &self.name }

    fn slice(&self, extent: Extent) -> Result<&[u8]> {
        match extent.end() {
            Some(end) if extent.offset >= HEADER_LEN && end <= self.data.len() as u64 => {
                Ok(&self.data[extent.offset as usize..end as usize])
            }
            _ => Err(MetaError::ObjectIo(format!(
                "{}: extent offset={} length={} out of range",
                self.name, extent.offset, extent.length,
            ))),
        }
    }

    pub fn read_meta(&self, extents: &[Extent]) -> Result<Vec<BlockObject>> {
        extents.iter()
            .map(|e| BlockObject::deserialize(self.slice(*e)?))
            .collect()
    }

    /// 返回所请求列的原始存储字节（未解压）
    pub fn read(&self, extent: Extent, idxs: &[u16]) -> Result<Vec<IoEntry>> {
        let block = BlockObject::deserialize(self.slice(extent)?)?;
        idxs.iter()
            .map(|&idx| {
                let col = block.columns.get(idx as usize).ok_or_else(|| {
                    MetaError::ObjectIo(format!("column {idx} not in block {}", block.block_id))
                })?;
                Ok(IoEntry { extent: col.extent, data: self.slice(col.extent)?.to_vec() })
            })
            .collect()
    }

    /// 解压并校验后的列数据
    pub fn read_columns(&self, extent: Extent, idxs: &[u16]) -> Result<Vec<Vec<u8>>> {
        let block = BlockObject::deserialize(self.slice(extent)?)?;
        idxs.iter()
            .map(|&idx| {
                let col = block.columns.get(idx as usize).ok_or_else(|| {
                    MetaError::ObjectIo(format!("column {idx} not in block {}", block.block_id))
                })?;
                let stored = self.slice(col.extent)?;
                if crc32fast::hash(stored) != col.checksum {
                    return Err(MetaError::ChecksumMismatch);
                }
                compression::decompress(stored, col.codec, col.orig_size as usize)
            })
            .collect()
    }
}
