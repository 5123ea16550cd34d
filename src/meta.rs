//! 表结构定义与 Block 元数据版本链

use crate::common::{
    BlockId, ColumnType, LogIndex, OpType, SegmentId, TableId, Version,
};
use crate::options::{DEFAULT_BLOCK_MAX_ROWS, DEFAULT_SEGMENT_MAX_BLOCKS};

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub column_id:   u32,
    pub name:        String,
    pub column_type: ColumnType,
    pub is_nullable: bool,
}

impl ColumnSchema {
    pub fn new(id: u32, name: &str, column_type: ColumnType) -> Self {
        Self { column_id: id, name: name.into(), column_type, is_nullable: false }
    }

    pub fn nullable(mut self) -> Self {
        self.is_nullable = true; self
    }
}

// ── Table Schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name:               String,
    pub columns:            Vec<ColumnSchema>,
    /// 行数达到该值时 Block 视为写满
    pub block_max_rows:     u64,
    /// 每个 Segment 最多容纳的 Block 数
    pub segment_max_blocks: u64,
}

impl TableSchema {
    pub fn new(name: &str, columns: Vec<ColumnSchema>) -> Self {
        Self {
            name: name.into(), columns,
            block_max_rows:     DEFAULT_BLOCK_MAX_ROWS,
            segment_max_blocks: DEFAULT_SEGMENT_MAX_BLOCKS,
        }
    }

    pub fn with_block_max_rows(mut self, rows: u64) -> Self {
        self.block_max_rows = rows; self
    }
    pub fn with_segment_max_blocks(mut self, blocks: u64) -> Self {
        self.segment_max_blocks = blocks; self
    }

    pub fn num_columns(&self) -> usize { self.columns.len() }
}

// ── CommitInfo / 快照 ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    pub op:        OpType,
    pub version:   Version,
    /// 前一个快照的版本号（同一条链内），版本 0 为 None
    pub prev:      Option<Version>,
    pub log_index: Option<LogIndex>,
}

/// 某一时刻 Block 元数据的不可变快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub table_id:   TableId,
    pub segment_id: SegmentId,
    pub block_id:   BlockId,
    pub count:      u64,
    pub commit:     CommitInfo,
}

impl BlockSnapshot {
    pub fn version(&self) -> Version { self.commit.version }
    pub fn op(&self) -> OpType { self.commit.op }

    /// 是否描述同一个 Block（忽略版本）
    pub fn same_block(&self, other: &BlockSnapshot) -> bool {
        self.table_id == other.table_id
            && self.segment_id == other.segment_id
            && self.block_id == other.block_id
    }
}

// ── 版本链 ────────────────────────────────────────────────────────────────────
//
// 以版本号为下标的快照数组，只追加不修改。
// 每个快照的 prev 严格小于自身版本号，因此链天然无环。

#[derive(Debug)]
pub struct VersionChain {
    snapshots: Vec<BlockSnapshot>,
    /// 创建时指定的 PrevMeta（来自另一个 Block 的快照）
    origin:    Option<BlockSnapshot>,
}

impl VersionChain {
    /// 以 {op=Create, version=0} 起始
    pub fn new(
        table_id:   TableId,
        segment_id: SegmentId,
        block_id:   BlockId,
        origin:     Option<BlockSnapshot>,
    ) -> Self {
        let initial = BlockSnapshot {
            table_id, segment_id, block_id,
            count: 0,
            commit: CommitInfo { op: OpType::Create, version: 0, prev: None, log_index: None },
        };
        Self { snapshots: vec![initial], origin }
    }

    pub fn head(&self) -> &BlockSnapshot {
        // new() 保证至少有一个快照
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub fn get(&self, version: Version) -> Option<&BlockSnapshot> {
        self.snapshots.get(version as usize)
    }

    pub fn origin(&self) -> Option<&BlockSnapshot> { self.origin.as_ref() }

    pub fn len(&self) -> usize { self.snapshots.len() }

    /// 链上至少有版本 0，永不为空
    pub fn is_empty(&self) -> bool { false }

    /// 追加一个新快照，prev 指向当前 head
    pub fn append(
        &mut self,
        op:        OpType,
        count:     u64,
        log_index: Option<LogIndex>,
    ) -> BlockSnapshot {
        let head = *self.head();
        let next = BlockSnapshot {
            count,
            commit: CommitInfo {
                op,
                version: head.commit.version + 1,
                prev: Some(head.commit.version),
                log_index,
            },
            ..head
        };
        debug_assert_eq!(next.commit.version as usize, self.snapshots.len());
        self.snapshots.push(next);
        next
    }

    /// 从 head 沿 prev 回溯到版本 0
    pub fn history(&self) -> impl Iterator<Item = &BlockSnapshot> + '_ {
        std::iter::successors(Some(self.head()), move |s| {
            s.commit.prev.and_then(|p| self.get(p))
        })
    }
}
