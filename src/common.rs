//! 全局基础类型与错误定义

use thiserror::Error;

// ── ID 类型别名 ───────────────────────────────────────────────────────────────

pub type DbId      = u64;
pub type TableId   = u64;
pub type SegmentId = u64;
pub type BlockId   = u64;
pub type EventId   = u64;
/// Block 版本链内的版本号，同时是快照在链中的下标
pub type Version   = u64;
/// 提交日志序号（UpgradeBlock 的 hint）
pub type LogIndex  = u64;

// ── 枚举 ──────────────────────────────────────────────────────────────────────

/// CommitInfo 记录的操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// 逻辑创建
    Create,
    /// 写满后提升为已提交
    Commit,
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Block 生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState { Created, Full, Committed }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int8, Int16, Int32, Int64,
    Float32, Float64,
    Varchar,
    Date,
}

impl ColumnType {
    /// 固定字节宽度；变长类型返回 None
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Int8               => Some(1),
            Self::Int16              => Some(2),
            Self::Int32 | Self::Date => Some(4),
            Self::Int64              => Some(8),
            Self::Float32            => Some(4),
            Self::Float64            => Some(8),
            Self::Varchar            => None,
        }
    }
}

// ── 错误 ──────────────────────────────────────────────────────────────────────

/// 同一个事件的错误会被多个等待者读取，因此要求 Clone
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    #[error("database not found: db_id={0}")]
    DatabaseNotFound(DbId),
    #[error("database already exists: {0}")]
    DuplicateDatabase(String),
    #[error("table not found: table_id={0}")]
    TableNotFound(TableId),
    #[error("table not found: db_id={0} name={1}")]
    TableNameNotFound(DbId, String),
    #[error("table already exists: db_id={0} name={1}")]
    DuplicateTable(DbId, String),
    #[error("segment not found: table_id={0} segment_id={1}")]
    SegmentNotFound(TableId, SegmentId),
    #[error("block not found: segment_id={0} block_id={1}")]
    BlockNotFound(SegmentId, BlockId),
    #[error("block not full: block_id={block_id} count={count} max_rows={max_rows}")]
    NotFull { block_id: BlockId, count: u64, max_rows: u64 },
    #[error("invalid row count for block {block_id}: {current} -> {requested} (max_rows={max_rows})")]
    InvalidRowCount { block_id: BlockId, current: u64, requested: u64, max_rows: u64 },
    #[error("block already committed: block_id={0}")]
    AlreadyCommitted(BlockId),
    #[error("scheduler stopped")]
    SchedulerStopped,
    #[error("event already scheduled: event_id={0}")]
    EventAlreadyScheduled(EventId),
    #[error("scope {0} is already held by the submitting event")]
    ScopeHeldByParent(String),
    #[error("event nesting depth {depth} exceeds limit {max}")]
    NestingTooDeep { depth: usize, max: usize },
    #[error("nested event failed: {0}")]
    NestedEventFailed(Box<MetaError>),
    #[error("event is not waitable")]
    NotWaitable,
    #[error("event panicked: {0}")]
    EventPanicked(String),
    #[error("event finished without output: event_id={0}")]
    EventOutputMissing(EventId),
    #[error("materialize error: {0}")]
    Materialize(String),
    #[error("object I/O error: {0}")]
    ObjectIo(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl MetaError {
    /// 剥掉 NestedEventFailed 包装，返回最内层的错误
    pub fn root_cause(&self) -> &MetaError {
        let mut cur = self;
        while let Self::NestedEventFailed(inner) = cur {
            cur = inner;
        }
        cur
    }
}

impl From<std::io::Error> for MetaError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, MetaError>;
