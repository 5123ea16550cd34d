//! 顶层存储协调器

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use crate::block::Block;
use crate::common::{DbId, MetaError, Result, SegmentId, TableId};
use crate::context::Context;
use crate::event::{CommitBlockEvent, CreateBlockEvent, CreateTableEvent, DropTableEvent, Event};
use crate::meta::{BlockSnapshot, ColumnSchema, TableSchema};
use crate::options::Options;
use crate::scheduler::Scheduler;
use crate::table::{Catalog, Table};
use crate::table_data::TableData;

/// 单节点元数据引擎：持有 Catalog 与 Scheduler，所有结构变更都以事件提交
pub struct StorageEngine {
    opts:      Arc<Options>,
    catalog:   Arc<Catalog>,
    scheduler: Arc<Scheduler>,
}

impl StorageEngine {
    pub fn open(opts: Options) -> Result<Self> {
        let scheduler = Scheduler::new(&opts)?;
        info!(data_dir = %opts.data_dir.display(), "storage engine opened");
        Ok(Self { opts: Arc::new(opts), catalog: Arc::new(Catalog::new()), scheduler })
    }

    pub fn options(&self)   -> &Options         { &self.opts }
    pub fn catalog(&self)   -> &Arc<Catalog>    { &self.catalog }
    pub fn scheduler(&self) -> &Arc<Scheduler>  { &self.scheduler }

    /// 可等待、无额外 scope 的上下文
    pub fn context(&self) -> Context {
        Context::new(self.opts.clone(), self.catalog.clone(), self.scheduler.clone())
            .with_waitable(true)
    }

    /// 按引擎默认的 Block / Segment 上限构造 Schema
    pub fn schema(&self, name: &str, columns: Vec<ColumnSchema>) -> TableSchema {
        TableSchema::new(name, columns)
            .with_block_max_rows(self.opts.block_max_rows)
            .with_segment_max_blocks(self.opts.segment_max_blocks)
    }

    /// 提交并阻塞到完成
    pub fn run(&self, event: &Event) -> Result<()> {
        self.scheduler.schedule(event)?;
        event.wait_done()
    }

    // ── DDL ───────────────────────────────────────────────────────────────────

    pub fn create_database(&self, name: &str) -> Result<DbId> {
        self.catalog.create_database(name)
    }

    pub fn create_table(&self, db_id: DbId, schema: TableSchema) -> Result<Table> {
        let ev = CreateTableEvent::new(&self.context(), db_id, schema);
        self.run(&ev)?;
        ev.table().ok_or(MetaError::EventOutputMissing(ev.id()))
    }

    pub fn drop_table(&self, table_id: TableId) -> Result<()> {
        self.run(&DropTableEvent::new(&self.context(), table_id))
    }

    pub fn get_table(&self, table_id: TableId) -> Result<Table> {
        self.catalog.get_table(table_id)
    }

    // ── Block 生命周期 ────────────────────────────────────────────────────────

    pub fn create_block(&self, table_id: TableId, prev: Option<BlockSnapshot>) -> Result<Block> {
        let ev = CreateBlockEvent::new(&self.context(), table_id, prev, None);
        self.run(&ev)?;
        ev.block().ok_or(MetaError::EventOutputMissing(ev.id()))
    }

    /// 创建 Block 并物化物理数据；物化失败时 Block 仍保留在 Catalog
    pub fn create_block_with_data(
        &self,
        table_id:   TableId,
        table_data: Arc<dyn TableData>,
    ) -> Result<Event> {
        let ev = CreateBlockEvent::new(&self.context(), table_id, None, Some(table_data));
        self.run(&ev)?;
        Ok(ev)
    }

    pub fn commit_block(&self, block: &Block) -> Result<BlockSnapshot> {
        let ev = CommitBlockEvent::new(&self.context(), block.clone());
        self.run(&ev)?;
        ev.committed_snapshot().ok_or(MetaError::EventOutputMissing(ev.id()))
    }

    // ── 辅助 ─────────────────────────────────────────────────────────────────

    /// Segment object 文件在磁盘上的路径
    pub fn object_path(&self, table_id: TableId, segment_id: SegmentId) -> PathBuf {
        self.opts.data_dir.join(table_id.to_string()).join(format!("{segment_id}.obj"))
    }

    /// 停止调度器；已接受的事件执行完才返回
    pub fn shutdown(&self) {
        self.scheduler.stop();
        info!(tables = self.catalog.table_count(), "storage engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{BlockState, ColumnType};

    fn engine() -> StorageEngine {
        StorageEngine::open(
            Options::new("/tmp/meta").with_workers(2).with_block_max_rows(8),
        )
        .unwrap()
    }

    #[test]
    fn schema_uses_engine_defaults() {
        let e = engine();
        let s = e.schema("t", vec![ColumnSchema::new(0, "a", ColumnType::Int8)]);
        assert_eq!(s.block_max_rows, 8);
        assert_eq!(s.segment_max_blocks, e.options().segment_max_blocks);
    }

    #[test]
    fn block_lifecycle_through_facade() {
        let e  = engine();
        let db = e.create_database("db").unwrap();
        let t  = e.create_table(db, e.schema("t", vec![])).unwrap();

        let b = e.create_block(t.id(), None).unwrap();
        assert_eq!(b.state(), BlockState::Created);
        assert!(matches!(e.commit_block(&b), Err(MetaError::NotFull { .. })));

        b.set_count(8).unwrap();
        assert_eq!(b.state(), BlockState::Full);
        let snap = e.commit_block(&b).unwrap();
        assert_eq!(snap.count, 8);
        assert_eq!(b.state(), BlockState::Committed);
        assert!(e.catalog().get_block(t.id(), b.segment_id(), b.id()).unwrap().same_as(&b));

        e.drop_table(t.id()).unwrap();
        assert_eq!(e.get_table(t.id()).err(), Some(MetaError::TableNotFound(t.id())));
        e.shutdown();
        assert_eq!(e.create_block(t.id(), None).err(), Some(MetaError::SchedulerStopped));
    }

    #[test]
    fn object_path_layout() {
        let e = engine();
        assert_eq!(e.object_path(3, 7), PathBuf::from("/tmp/meta/3/7.obj"));
    }
}
