//! 引擎配置

use std::path::PathBuf;
use crate::common::{MetaError, Result};

pub const DEFAULT_BLOCK_MAX_ROWS:     u64   = 4096;
pub const DEFAULT_SEGMENT_MAX_BLOCKS: u64   = 4;
pub const DEFAULT_WORKERS:            usize = 4;
pub const DEFAULT_NESTED_WORKERS:     usize = 2;
/// 允许的事件嵌套层数：CreateBlock → CreateSegmentData 只需一层
pub const DEFAULT_MAX_NESTING_DEPTH:  usize = 1;

#[derive(Debug, Clone)]
pub struct Options {
    /// 物理 object 文件所在目录
    pub data_dir:           PathBuf,
    /// 根层（深度 0）worker 数
    pub workers:            usize,
    /// 每个嵌套层的 worker 数
    pub nested_workers:     usize,
    pub max_nesting_depth:  usize,
    /// 新建 Schema 的默认值
    pub block_max_rows:     u64,
    pub segment_max_blocks: u64,
    /// worker 线程名前缀
    pub thread_name:        String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            data_dir:           PathBuf::from("data/meta"),
            workers:            DEFAULT_WORKERS,
            nested_workers:     DEFAULT_NESTED_WORKERS,
            max_nesting_depth:  DEFAULT_MAX_NESTING_DEPTH,
            block_max_rows:     DEFAULT_BLOCK_MAX_ROWS,
            segment_max_blocks: DEFAULT_SEGMENT_MAX_BLOCKS,
            thread_name:        "meta-sched".into(),
        }
    }
}

impl Options {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n; self
    }
    pub fn with_nested_workers(mut self, n: usize) -> Self {
        self.nested_workers = n; self
    }
    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth; self
    }
    pub fn with_block_max_rows(mut self, rows: u64) -> Self {
        self.block_max_rows = rows; self
    }
    pub fn with_segment_max_blocks(mut self, blocks: u64) -> Self {
        self.segment_max_blocks = blocks; self
    }
    pub fn with_thread_name(mut self, name: &str) -> Self {
        self.thread_name = name.into(); self
    }

    /// 调度器线程总数 = 根层 + 每个嵌套层
    pub fn total_workers(&self) -> usize {
        self.workers + self.nested_workers * self.max_nesting_depth
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(MetaError::InvalidOptions("workers must be > 0".into()));
        }
        if self.max_nesting_depth > 0 && self.nested_workers == 0 {
            return Err(MetaError::InvalidOptions(
                "nested_workers must be > 0 when nesting is allowed".into(),
            ));
        }
        if self.block_max_rows == 0 {
            return Err(MetaError::InvalidOptions("block_max_rows must be > 0".into()));
        }
        if self.segment_max_blocks == 0 {
            return Err(MetaError::InvalidOptions("segment_max_blocks must be > 0".into()));
        }
        Ok(())
    }
}
