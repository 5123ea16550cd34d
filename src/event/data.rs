//! 数据事件：把 Block 元数据物化为物理 Block

use std::sync::Arc;
use tracing::debug;
use crate::common::Result;
use crate::context::Context;
use crate::meta::BlockSnapshot;
use crate::table_data::TableData;
use super::{Event, EventKind, EventOutput};

/// 只由 CreateBlockEvent 嵌套提交；失败直接报告给父事件，不重试
pub struct CreateSegmentDataEvent {
    pub(crate) meta:       BlockSnapshot,
    pub(crate) table_data: Arc<dyn TableData>,
}

impl CreateSegmentDataEvent {
    pub(crate) fn new(ctx: &Context, meta: BlockSnapshot, table_data: Arc<dyn TableData>) -> Event {
        Event::new(ctx, EventKind::CreateSegmentData(Self { meta, table_data }))
    }

    pub(crate) fn execute(&self, _ctx: &Context, slot: &mut Option<EventOutput>) -> Result<()> {
        let block = self.table_data.materialize(&self.meta)?;
        debug!(
            table_id = self.meta.table_id, segment_id = self.meta.segment_id,
            block_id = self.meta.block_id, columns = block.num_columns(),
            "segment data created"
        );
        *slot = Some(EventOutput::Materialized(block));
        Ok(())
    }
}
