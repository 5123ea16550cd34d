//! Table 元数据与 Catalog
//!
//! Catalog 树：Database → Table → Segment → Block。
//! 内部的读写锁只保证内存安全；同一张表上的结构变更由调度器的 scope 串行化，
//! 因此 `create_or_get_next_block` / `upgrade_block` 只对事件开放。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use tracing::debug;
use crate::block::{Block, Segment};
use crate::common::{BlockId, DbId, LogIndex, MetaError, Result, SegmentId, TableId};
use crate::meta::{BlockSnapshot, TableSchema};

// ── Table ─────────────────────────────────────────────────────────────────────

pub struct TableInner {
    id:              TableId,
    db_id:           DbId,
    schema:          TableSchema,
    segments:        RwLock<Vec<Segment>>,
    next_segment_id: AtomicU64,
    /// Block id 的唯一分配者（表内唯一）
    next_block_id:   AtomicU64,
}

#[derive(Clone)]
pub struct Table(Arc<TableInner>);

impl Table {
    fn new(id: TableId, db_id: DbId, schema: TableSchema) -> Self {
        Self(Arc::new(TableInner {
            id, db_id, schema,
            segments:        RwLock::new(Vec::new()),
            next_segment_id: AtomicU64::new(1),
            next_block_id:   AtomicU64::new(1),
        }))
    }

    pub fn id(&self)     -> TableId      { self.0.id }
    pub fn db_id(&self)  -> DbId         { self.0.db_id }
    pub fn name(&self)   -> &str         { &self.0.schema.name }
    pub fn schema(&self) -> &TableSchema { &self.0.schema }

    pub fn segments(&self) -> Vec<Segment> {
        self.0.segments.read().clone()
    }

    pub fn segment_count(&self) -> usize {
        self.0.segments.read().len()
    }

    pub fn block_count(&self) -> usize {
        self.0.segments.read().iter().map(|s| s.block_count()).sum()
    }

    pub fn get_segment(&self, segment_id: SegmentId) -> Result<Segment> {
        self.0.segments.read()
            .iter()
            .find(|s| s.id() == segment_id)
            .cloned()
            .ok_or(MetaError::SegmentNotFound(self.0.id, segment_id))
    }

    pub fn get_block(&self, segment_id: SegmentId, block_id: BlockId) -> Result<Block> {
        self.get_segment(segment_id)
            .map_err(|_| MetaError::BlockNotFound(segment_id, block_id))?
            .get_block(block_id)
            .ok_or(MetaError::BlockNotFound(segment_id, block_id))
    }

    /// 分配下一个 Block；当前 Segment 写满或不存在时新建 Segment。
    ///
    /// 若给出 `prev` 且已有以它为 PrevMeta 的 Block，直接返回该 Block。
    pub(crate) fn create_or_get_next_block(&self, prev: Option<&BlockSnapshot>) -> Block {
        if let Some(prev) = prev {
            if let Some(existing) = self.find_successor(prev) {
                debug!(
                    table_id = self.0.id, block_id = existing.id(),
                    "reuse block created from prev meta"
                );
                return existing;
            }
        }

        let segment  = self.current_or_new_segment();
        let block_id = self.0.next_block_id.fetch_add(1, Ordering::SeqCst);
        let block    = Block::new(
            self.0.id, segment.id(), block_id,
            self.0.schema.block_max_rows, prev.copied(),
        );
        segment.push(block.clone());
        debug!(
            table_id = self.0.id, segment_id = segment.id(), block_id,
            "block created"
        );
        block
    }

    pub(crate) fn upgrade_block(
        &self,
        block: &Block,
        hint:  Option<LogIndex>,
    ) -> Result<BlockSnapshot> {
        let owned = self.get_block(block.segment_id(), block.id())?;
        if !owned.same_as(block) {
            return Err(MetaError::BlockNotFound(block.segment_id(), block.id()));
        }
        block.upgrade(hint)
    }

    fn find_successor(&self, prev: &BlockSnapshot) -> Option<Block> {
        self.0.segments.read().iter()
            .flat_map(|s| s.blocks())
            .find(|b| b.prev_meta().is_some_and(|m| m.same_block(prev)))
    }

    fn current_or_new_segment(&self) -> Segment {
        let mut segments = self.0.segments.write();
        if let Some(last) = segments.last() {
            if !last.has_max_blocks() {
                return last.clone();
            }
        }
        let id  = self.0.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let seg = Segment::new(self.0.id, id, self.0.schema.segment_max_blocks);
        segments.push(seg.clone());
        debug!(table_id = self.0.id, segment_id = id, "segment created");
        seg
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.0.id)
            .field("db_id", &self.0.db_id)
            .field("name", &self.0.schema.name)
            .field("segments", &self.segment_count())
            .finish()
    }
}

// ── Database ──────────────────────────────────────────────────────────────────

struct Database {
    name:   String,
    /// table_name → table_id
    tables: HashMap<String, TableId>,
}

// ── Catalog ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CatalogInner {
    databases: HashMap<DbId, Database>,
    tables:    HashMap<TableId, Table>,
}

pub struct Catalog {
    inner:         RwLock<CatalogInner>,
    next_db_id:    AtomicU64,
    next_table_id: AtomicU64,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            inner:         RwLock::new(CatalogInner::default()),
            next_db_id:    AtomicU64::new(1),
            next_table_id: AtomicU64::new(1),
        }
    }

    pub fn create_database(&self, name: &str) -> Result<DbId> {
        let mut inner = self.inner.write();
        if inner.databases.values().any(|d| d.name == name) {
            return Err(MetaError::DuplicateDatabase(name.into()));
        }
        let db_id = self.next_db_id.fetch_add(1, Ordering::SeqCst);
        inner.databases.insert(db_id, Database { name: name.into(), tables: HashMap::new() });
        Ok(db_id)
    }

    pub fn database_id(&self, name: &str) -> Option<DbId> {
        self.inner.read().databases.iter()
            .find(|(_, d)| d.name == name)
            .map(|(id, _)| *id)
    }

    pub fn get_table(&self, table_id: TableId) -> Result<Table> {
        self.inner.read().tables.get(&table_id)
            .cloned()
            .ok_or(MetaError::TableNotFound(table_id))
    }

    pub fn get_table_by_name(&self, db_id: DbId, name: &str) -> Result<Table> {
        let inner = self.inner.read();
        let db = inner.databases.get(&db_id).ok_or(MetaError::DatabaseNotFound(db_id))?;
        db.tables.get(name)
            .and_then(|tid| inner.tables.get(tid))
            .cloned()
            .ok_or_else(|| MetaError::TableNameNotFound(db_id, name.into()))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.inner.read().tables.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn table_count(&self) -> usize {
        self.inner.read().tables.len()
    }

    pub fn get_block(
        &self,
        table_id:   TableId,
        segment_id: SegmentId,
        block_id:   BlockId,
    ) -> Result<Block> {
        self.get_table(table_id)?.get_block(segment_id, block_id)
    }

    // ── 仅供事件调用的结构变更 ────────────────────────────────────────────────

    pub(crate) fn create_table(&self, db_id: DbId, schema: TableSchema) -> Result<Table> {
        let mut inner = self.inner.write();
        let db = inner.databases.get_mut(&db_id).ok_or(MetaError::DatabaseNotFound(db_id))?;
        if db.tables.contains_key(&schema.name) {
            return Err(MetaError::DuplicateTable(db_id, schema.name));
        }
        let table_id = self.next_table_id.fetch_add(1, Ordering::SeqCst);
        db.tables.insert(schema.name.clone(), table_id);
        let table = Table::new(table_id, db_id, schema);
        inner.tables.insert(table_id, table.clone());
        Ok(table)
    }

    pub(crate) fn drop_table(&self, table_id: TableId) -> Result<Table> {
        let mut inner = self.inner.write();
        let table = inner.tables.remove(&table_id).ok_or(MetaError::TableNotFound(table_id))?;
        if let Some(db) = inner.databases.get_mut(&table.db_id()) {
            db.tables.remove(table.name());
        }
        Ok(table)
    }

    pub(crate) fn create_or_get_next_block(
        &self,
        table_id: TableId,
        prev:     Option<&BlockSnapshot>,
    ) -> Result<Block> {
        Ok(self.get_table(table_id)?.create_or_get_next_block(prev))
    }

    pub(crate) fn upgrade_block(
        &self,
        block: &Block,
        hint:  Option<LogIndex>,
    ) -> Result<BlockSnapshot> {
        self.get_table(block.table_id())?.upgrade_block(block, hint)
    }
}

impl Default for Catalog {
    fn default() -> Self { Self::new() }
}
