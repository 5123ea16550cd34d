//! # olap-meta-engine
//!
//! 列存引擎的元数据控制面：Database → Table → Segment → Block 的内存 Catalog，
//! 只通过调度器执行的事件做结构变更。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        StorageEngine                          │
//! │   ┌───────────────────────┐      ┌─────────────────────────┐  │
//! │   │       Scheduler       │      │        Catalog          │  │
//! │   │  scope FIFO 队列       │ ───▶ │  Database → Table       │  │
//! │   │  tier0 / tier1 … 线程  │      │     Table → Segment     │  │
//! │   └──────────┬────────────┘      │       Segment → Block   │  │
//! │              │ Event::run         └────────────┬────────────┘  │
//! │   ┌──────────┴────────────┐                    │               │
//! │   │ CreateTable/DropTable │            Block: count +          │
//! │   │ CreateBlock ──┐       │            VersionChain            │
//! │   │ CommitBlock   │ 嵌套  │          (Create v0 → Commit v1)   │
//! │   │ CreateSegmentData ◀┘  │                                    │
//! │   └──────────┬────────────┘                                    │
//! │              ▼                                                 │
//! │   TableData::materialize → PhysicalBlock → ObjectWriter        │
//! │                                       ObjectReader (extent I/O)│
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod common;
pub mod options;
pub mod meta;
pub mod block;
pub mod table;
pub mod context;
pub mod scheduler;
pub mod event;
pub mod storage;

// ── 数据层协作方 ──────────────────────────────────────────────────────────────
pub mod compression;
pub mod objectio;
pub mod table_data;

pub use common::{MetaError, Result};
pub use context::Context;
pub use event::{Event, EventOutput, EventStatus};
pub use options::Options;
pub use scheduler::{Scheduler, Scope};
pub use storage::StorageEngine;
