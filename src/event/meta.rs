//! 元数据事件：表的创建/删除，Block 的创建/提交

use std::sync::Arc;
use tracing::info;
use crate::block::Block;
use crate::common::{DbId, LogIndex, MetaError, Result, TableId};
use crate::context::Context;
use crate::meta::{BlockSnapshot, TableSchema};
use crate::table_data::TableData;
use super::{CreateSegmentDataEvent, Event, EventKind, EventOutput};

// ── CreateTable ───────────────────────────────────────────────────────────────

pub struct CreateTableEvent {
    pub(crate) db_id:  DbId,
    pub(crate) schema: TableSchema,
}

impl CreateTableEvent {
    pub fn new(ctx: &Context, db_id: DbId, schema: TableSchema) -> Event {
        Event::new(ctx, EventKind::CreateTable(Self { db_id, schema }))
    }

    pub(crate) fn execute(&self, ctx: &Context, slot: &mut Option<EventOutput>) -> Result<()> {
        let table = ctx.catalog.create_table(self.db_id, self.schema.clone())?;
        info!(db_id = self.db_id, table_id = table.id(), name = table.name(), "table created");
        *slot = Some(EventOutput::Table(table));
        Ok(())
    }
}

// ── DropTable ─────────────────────────────────────────────────────────────────

pub struct DropTableEvent {
    pub(crate) table_id: TableId,
}

impl DropTableEvent {
    pub fn new(ctx: &Context, table_id: TableId) -> Event {
        Event::new(ctx, EventKind::DropTable(Self { table_id }))
    }

    pub(crate) fn execute(&self, ctx: &Context, slot: &mut Option<EventOutput>) -> Result<()> {
        let table = ctx.catalog.drop_table(self.table_id)?;
        info!(table_id = self.table_id, name = table.name(), "table dropped");
        *slot = Some(EventOutput::Dropped(self.table_id));
        Ok(())
    }
}

// ── CreateBlock ───────────────────────────────────────────────────────────────

/// 分配下一个 Block；给出表数据时再嵌套物化物理 Block。
///
/// 物化失败不回滚已创建的 Block：事件以 `NestedEventFailed` 失败，
/// 但 Block 仍留在 Catalog 中，并可通过 [`Event::output`] 取得。
pub struct CreateBlockEvent {
    pub(crate) table_id:   TableId,
    pub(crate) prev:       Option<BlockSnapshot>,
    pub(crate) table_data: Option<Arc<dyn TableData>>,
}

impl CreateBlockEvent {
    pub fn new(
        ctx:        &Context,
        table_id:   TableId,
        prev:       Option<BlockSnapshot>,
        table_data: Option<Arc<dyn TableData>>,
    ) -> Event {
        Event::new(ctx, EventKind::CreateBlock(Self { table_id, prev, table_data }))
    }

    pub(crate) fn execute(&self, ctx: &Context, slot: &mut Option<EventOutput>) -> Result<()> {
        let block = ctx.catalog.create_or_get_next_block(self.table_id, self.prev.as_ref())?;
        *slot = Some(EventOutput::Block { block: block.clone(), data: None });

        let Some(table_data) = &self.table_data else { return Ok(()) };

        let child = CreateSegmentDataEvent::new(&ctx.child(), block.snapshot(), table_data.clone());
        ctx.scheduler.schedule(&child)?;
        child.wait_done().map_err(|e| MetaError::NestedEventFailed(Box::new(e)))?;

        let data = child.physical_block().ok_or(MetaError::EventOutputMissing(child.id()))?;
        *slot = Some(EventOutput::Block { block, data: Some(data) });
        Ok(())
    }
}

// ── CommitBlock ───────────────────────────────────────────────────────────────

pub struct CommitBlockEvent {
    pub(crate) block: Block,
    pub(crate) hint:  Option<LogIndex>,
}

impl CommitBlockEvent {
    pub fn new(ctx: &Context, block: Block) -> Event {
        Self::with_hint(ctx, block, None)
    }

    /// `hint` 记为新 CommitInfo 的日志位置
    pub fn with_hint(ctx: &Context, block: Block, hint: Option<LogIndex>) -> Event {
        Event::new(ctx, EventKind::CommitBlock(Self { block, hint }))
    }

    pub(crate) fn execute(&self, ctx: &Context, slot: &mut Option<EventOutput>) -> Result<()> {
        let snapshot = ctx.catalog.upgrade_block(&self.block, self.hint)?;
        info!(
            table_id = snapshot.table_id, segment_id = snapshot.segment_id,
            block_id = snapshot.block_id, version = snapshot.version(), "block committed"
        );
        *slot = Some(EventOutput::Committed { block: self.block.clone(), snapshot });
        Ok(())
    }
}
