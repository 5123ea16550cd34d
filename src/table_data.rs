//! 内存表数据与物理 Block 物化
//!
//! CreateSegmentDataEvent 通过 [`TableData`] 把 Block 元数据物化为带列缓冲的
//! [`PhysicalBlock`]。物化失败直接返回错误，不在内部重试。

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use crate::common::{BlockId, MetaError, Result, SegmentId, TableId};
use crate::compression::CompressionType;
use crate::meta::{BlockSnapshot, TableSchema};
use crate::objectio::{Extent, ObjectWriter};
use crate::table::Table;

/// 变长列预分配时按该宽度估算
const VARLEN_ESTIMATE: usize = 16;

// ── 物化接口 ──────────────────────────────────────────────────────────────────

pub trait TableData: Send + Sync {
    fn table_id(&self) -> TableId;

    fn materialize(&self, meta: &BlockSnapshot) -> Result<PhysicalBlock>;
}

// ── PhysicalBlock ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ColumnBuffer {
    pub column_id: u32,
    pub data:      Vec<u8>,
}

struct PhysicalBlockInner {
    meta:    BlockSnapshot,
    columns: RwLock<Vec<ColumnBuffer>>,
}

#[derive(Clone)]
pub struct PhysicalBlock(Arc<PhysicalBlockInner>);

impl PhysicalBlock {
    pub fn new(meta: BlockSnapshot, columns: Vec<ColumnBuffer>) -> Self {
        Self(Arc::new(PhysicalBlockInner { meta, columns: RwLock::new(columns) }))
    }

    pub fn meta(&self)       -> &BlockSnapshot { &self.0.meta }
    pub fn block_id(&self)   -> BlockId        { self.0.meta.block_id }
    pub fn segment_id(&self) -> SegmentId      { self.0.meta.segment_id }

    pub fn num_columns(&self) -> usize {
        self.0.columns.read().len()
    }

    pub fn append(&self, col_idx: usize, bytes: &[u8]) -> Result<()> {
        let mut cols = self.0.columns.write();
        let col = cols.get_mut(col_idx).ok_or_else(|| {
            MetaError::Materialize(format!("column {col_idx} out of range"))
        })?;
        col.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn column(&self, col_idx: usize) -> Option<Vec<u8>> {
        self.0.columns.read().get(col_idx).map(|c| c.data.clone())
    }

    pub fn capacity(&self, col_idx: usize) -> Option<usize> {
        self.0.columns.read().get(col_idx).map(|c| c.data.capacity())
    }

    pub fn same_as(&self, other: &PhysicalBlock) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// 把所有列写进 object 文件，返回 BlockMeta 的 Extent
    pub fn write_to<W: Write>(
        &self,
        writer: &mut ObjectWriter<W>,
        codec:  CompressionType,
    ) -> Result<Extent> {
        let cols = self.0.columns.read();
        let raw: Vec<&[u8]> = cols.iter().map(|c| c.data.as_slice()).collect();
        writer.write_block(&self.0.meta, &raw, codec)
    }
}

impl std::fmt::Debug for PhysicalBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalBlock")
            .field("segment_id", &self.0.meta.segment_id)
            .field("block_id", &self.0.meta.block_id)
            .field("columns", &self.num_columns())
            .finish()
    }
}

// ── MemTableData ──────────────────────────────────────────────────────────────

/// 单表的内存数据，最多同时持有 `capacity` 个物理 Block
pub struct MemTableData {
    table_id: TableId,
    schema:   TableSchema,
    capacity: usize,
    blocks:   Mutex<HashMap<(SegmentId, BlockId), PhysicalBlock>>,
}

impl MemTableData {
    pub fn new(table: &Table, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            table_id: table.id(),
            schema:   table.schema().clone(),
            capacity,
            blocks:   Mutex::new(HashMap::new()),
        })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn get(&self, segment_id: SegmentId, block_id: BlockId) -> Option<PhysicalBlock> {
        self.blocks.lock().get(&(segment_id, block_id)).cloned()
    }
}

impl TableData for MemTableData {
    fn table_id(&self) -> TableId { self.table_id }

    fn materialize(&self, meta: &BlockSnapshot) -> Result<PhysicalBlock> {
        if meta.table_id != self.table_id {
            return Err(MetaError::Materialize(format!(
                "block of table {} handed to table data {}", meta.table_id, self.table_id,
            )));
        }

        let key = (meta.segment_id, meta.block_id);
        let mut blocks = self.blocks.lock();
        if let Some(existing) = blocks.get(&key) {
            return Ok(existing.clone());
        }
        if blocks.len() >= self.capacity {
            return Err(MetaError::Materialize(format!(
                "table {} data capacity {} exhausted", self.table_id, self.capacity,
            )));
        }

        let rows = self.schema.block_max_rows as usize;
        let columns = self.schema.columns.iter()
            .map(|c| ColumnBuffer {
                column_id: c.column_id,
                data: Vec::with_capacity(
                    rows * c.column_type.fixed_size().unwrap_or(VARLEN_ESTIMATE),
                ),
            })
            .collect();
        let block = PhysicalBlock::new(*meta, columns);
        blocks.insert(key, block.clone());
        debug!(
            table_id = self.table_id, segment_id = meta.segment_id, block_id = meta.block_id,
            "physical block materialized"
        );
        Ok(block)
    }
}
