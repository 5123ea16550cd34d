//! Block / Segment 运行时句柄

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use crate::common::{
    BlockId, BlockState, LogIndex, MetaError, OpType, Result, SegmentId, TableId, Version,
};
use crate::meta::{BlockSnapshot, CommitInfo, VersionChain};

// ── Block 内部状态 ────────────────────────────────────────────────────────────

pub struct BlockInner {
    id:         BlockId,
    segment_id: SegmentId,
    table_id:   TableId,
    max_rows:   u64,
    /// 行数由写入路径直接更新，不产生新版本
    count:      AtomicU64,
    chain:      RwLock<VersionChain>,
}

// ── Block 句柄 ────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Block(Arc<BlockInner>);

impl Block {
    pub(crate) fn new(
        table_id:   TableId,
        segment_id: SegmentId,
        id:         BlockId,
        max_rows:   u64,
        origin:     Option<BlockSnapshot>,
    ) -> Self {
        Self(Arc::new(BlockInner {
            id, segment_id, table_id, max_rows,
            count: AtomicU64::new(0),
            chain: RwLock::new(VersionChain::new(table_id, segment_id, id, origin)),
        }))
    }

    pub fn id(&self)         -> BlockId   { self.0.id }
    pub fn segment_id(&self) -> SegmentId { self.0.segment_id }
    pub fn table_id(&self)   -> TableId   { self.0.table_id }
    pub fn max_rows(&self)   -> u64       { self.0.max_rows }

    pub fn count(&self) -> u64 {
        self.0.count.load(Ordering::Acquire)
    }

    /// 写入路径的行数更新：只增不减，且不超过 max_rows
    pub fn set_count(&self, n: u64) -> Result<()> {
        let max_rows = self.0.max_rows;
        self.0.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (n >= cur && n <= max_rows).then_some(n)
            })
            .map(|_| ())
            .map_err(|current| MetaError::InvalidRowCount {
                block_id: self.0.id, current, requested: n, max_rows,
            })
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.0.max_rows
    }

    pub fn commit_info(&self) -> CommitInfo {
        self.0.chain.read().head().commit
    }

    /// 当前 head 快照
    pub fn snapshot(&self) -> BlockSnapshot {
        *self.0.chain.read().head()
    }

    pub fn snapshot_at(&self, version: Version) -> Option<BlockSnapshot> {
        self.0.chain.read().get(version).copied()
    }

    /// 创建时传入的 PrevMeta
    pub fn prev_meta(&self) -> Option<BlockSnapshot> {
        self.0.chain.read().origin().copied()
    }

    /// head → 版本 0
    pub fn history(&self) -> Vec<BlockSnapshot> {
        self.0.chain.read().history().copied().collect()
    }

    pub fn state(&self) -> BlockState {
        match self.commit_info().op {
            OpType::Commit                   => BlockState::Committed,
            OpType::Create if self.is_full() => BlockState::Full,
            OpType::Create                   => BlockState::Created,
        }
    }

    pub fn same_as(&self, other: &Block) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// 写满则追加 {op=Commit, version+1}；否则原样返回错误
    pub(crate) fn upgrade(&self, hint: Option<LogIndex>) -> Result<BlockSnapshot> {
        let mut chain = self.0.chain.write();
        let count = self.count();
        if count < self.0.max_rows {
            return Err(MetaError::NotFull {
                block_id: self.0.id, count, max_rows: self.0.max_rows,
            });
        }
        if chain.head().op() == OpType::Commit {
            return Err(MetaError::AlreadyCommitted(self.0.id));
        }
        Ok(chain.append(OpType::Commit, count, hint))
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("table_id", &self.0.table_id)
            .field("segment_id", &self.0.segment_id)
            .field("id", &self.0.id)
            .field("count", &self.count())
            .field("commit", &self.commit_info())
            .finish()
    }
}

// ── Segment ───────────────────────────────────────────────────────────────────

pub struct SegmentInner {
    id:         SegmentId,
    table_id:   TableId,
    max_blocks: u64,
    blocks:     RwLock<Vec<Block>>,
}

#[derive(Clone)]
pub struct Segment(Arc<SegmentInner>);

impl Segment {
    pub(crate) fn new(table_id: TableId, id: SegmentId, max_blocks: u64) -> Self {
        Self(Arc::new(SegmentInner {
            id, table_id, max_blocks,
            blocks: RwLock::new(Vec::new()),
        }))
    }

    pub fn id(&self)       -> SegmentId { self.0.id }
    pub fn table_id(&self) -> TableId   { self.0.table_id }

    pub fn block_count(&self) -> usize {
        self.0.blocks.read().len()
    }

    pub fn has_max_blocks(&self) -> bool {
        self.block_count() as u64 >= self.0.max_blocks
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.0.blocks.read().clone()
    }

    pub fn get_block(&self, block_id: BlockId) -> Option<Block> {
        self.0.blocks.read().iter().find(|b| b.id() == block_id).cloned()
    }

    pub(crate) fn push(&self, block: Block) {
        self.0.blocks.write().push(block);
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("table_id", &self.0.table_id)
            .field("id", &self.0.id)
            .field("blocks", &self.block_count())
            .finish()
    }
}
