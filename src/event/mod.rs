//! 事件框架
//!
//! 事件是对 Catalog 的一次异步变更：由 [`Scheduler`](crate::scheduler::Scheduler)
//! 在 worker 上执行，执行结果写入事件自身的结果槽，等待者通过 [`Event::wait_done`]
//! 阻塞到完成。事件种类是封闭集合，执行时按 [`EventKind`] 分派。

pub mod data;
pub mod meta;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use crate::block::Block;
use crate::common::{EventId, MetaError, Result, TableId};
use crate::context::Context;
use crate::meta::BlockSnapshot;
use crate::scheduler::{Lineage, Scope};
use crate::table::Table;
use crate::table_data::PhysicalBlock;

pub use data::CreateSegmentDataEvent;
pub use meta::{CommitBlockEvent, CreateBlockEvent, CreateTableEvent, DropTableEvent};

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

// ── 状态与结果 ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// 已构造，未提交
    Pending,
    /// 已被调度器接受
    Queued,
    Running,
    Done,
    Failed,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone)]
pub enum EventOutput {
    Table(Table),
    Block { block: Block, data: Option<PhysicalBlock> },
    Committed { block: Block, snapshot: BlockSnapshot },
    Materialized(PhysicalBlock),
    Dropped(TableId),
}

// ── 事件种类 ──────────────────────────────────────────────────────────────────

pub(crate) enum EventKind {
    CreateTable(CreateTableEvent),
    DropTable(DropTableEvent),
    CreateBlock(CreateBlockEvent),
    CommitBlock(CommitBlockEvent),
    CreateSegmentData(CreateSegmentDataEvent),
}

impl EventKind {
    fn name(&self) -> &'static str {
        match self {
            Self::CreateTable(_)       => "create_table",
            Self::DropTable(_)         => "drop_table",
            Self::CreateBlock(_)       => "create_block",
            Self::CommitBlock(_)       => "commit_block",
            Self::CreateSegmentData(_) => "create_segment_data",
        }
    }

    /// 事件种类自带的 scope，与 Context 声明的合并
    fn implied_scopes(&self) -> Vec<Scope> {
        match self {
            Self::CreateTable(_)       => vec![Scope::Catalog],
            Self::DropTable(e)         => vec![
                Scope::Catalog, Scope::Meta(e.table_id), Scope::Data(e.table_id),
            ],
            Self::CreateBlock(e)       => vec![Scope::Meta(e.table_id)],
            Self::CommitBlock(e)       => vec![Scope::Meta(e.block.table_id())],
            Self::CreateSegmentData(e) => vec![Scope::Data(e.meta.table_id)],
        }
    }

    /// 结果在出错前写入槽位；出错时槽位保留已完成的部分
    fn execute(&self, ctx: &Context, slot: &mut Option<EventOutput>) -> Result<()> {
        match self {
            Self::CreateTable(e)       => e.execute(ctx, slot),
            Self::DropTable(e)         => e.execute(ctx, slot),
            Self::CreateBlock(e)       => e.execute(ctx, slot),
            Self::CommitBlock(e)       => e.execute(ctx, slot),
            Self::CreateSegmentData(e) => e.execute(ctx, slot),
        }
    }
}

// ── Event 句柄 ────────────────────────────────────────────────────────────────

struct EventState {
    status:  EventStatus,
    output:  Option<EventOutput>,
    error:   Option<MetaError>,
    lineage: Lineage,
}

struct EventInner {
    id:     EventId,
    ctx:    Context,
    kind:   EventKind,
    scopes: Vec<Scope>,
    state:  Mutex<EventState>,
    done:   Condvar,
}

#[derive(Clone)]
pub struct Event(Arc<EventInner>);

impl Event {
    pub(crate) fn new(ctx: &Context, kind: EventKind) -> Self {
        let mut scopes = kind.implied_scopes();
        for s in ctx.scopes() {
            if !scopes.contains(s) {
                scopes.push(s.clone());
            }
        }
        Self(Arc::new(EventInner {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            ctx: ctx.clone(),
            kind,
            scopes,
            state: Mutex::new(EventState {
                status:  EventStatus::Pending,
                output:  None,
                error:   None,
                lineage: Lineage::default(),
            }),
            done: Condvar::new(),
        }))
    }

    pub fn id(&self)        -> EventId       { self.0.id }
    pub fn scopes(&self)    -> &[Scope]      { &self.0.scopes }
    pub fn context(&self)   -> &Context      { &self.0.ctx }
    pub fn kind_name(&self) -> &'static str  { self.0.kind.name() }

    pub fn status(&self) -> EventStatus {
        self.0.state.lock().status
    }

    pub fn error(&self) -> Option<MetaError> {
        self.0.state.lock().error.clone()
    }

    /// 嵌套深度，根事件为 0
    pub fn depth(&self) -> usize {
        self.0.state.lock().lineage.depth
    }

    /// 阻塞到事件完成，返回事件的错误。
    ///
    /// 可在提交前调用，也可被多个线程同时调用。不可等待的 Context 立即返回
    /// `NotWaitable`。没有超时。
    pub fn wait_done(&self) -> Result<()> {
        if !self.0.ctx.waitable {
            return Err(MetaError::NotWaitable);
        }
        let mut st = self.0.state.lock();
        while !st.status.is_terminal() {
            self.0.done.wait(&mut st);
        }
        match &st.error {
            Some(e) => Err(e.clone()),
            None    => Ok(()),
        }
    }

    // ── 结果访问 ──────────────────────────────────────────────────────────────

    /// 结果槽原样返回，失败的事件也可能带有部分结果
    pub fn output(&self) -> Option<EventOutput> {
        self.0.state.lock().output.clone()
    }

    /// 成功完成时的结果
    fn success(&self) -> Option<EventOutput> {
        let st = self.0.state.lock();
        if st.status != EventStatus::Done {
            return None;
        }
        st.output.clone()
    }

    /// CreateBlock / CommitBlock 的 Block；失败时为 None
    pub fn block(&self) -> Option<Block> {
        match self.success()? {
            EventOutput::Block { block, .. }     => Some(block),
            EventOutput::Committed { block, .. } => Some(block),
            _                                    => None,
        }
    }

    pub fn table(&self) -> Option<Table> {
        match self.success()? {
            EventOutput::Table(t) => Some(t),
            _                     => None,
        }
    }

    /// CreateBlock 附带的或 CreateSegmentData 产出的物理 Block
    pub fn physical_block(&self) -> Option<PhysicalBlock> {
        match self.success()? {
            EventOutput::Block { data, .. }     => data,
            EventOutput::Materialized(pb)       => Some(pb),
            _                                   => None,
        }
    }

    pub fn committed_snapshot(&self) -> Option<BlockSnapshot> {
        match self.success()? {
            EventOutput::Committed { snapshot, .. } => Some(snapshot),
            _                                       => None,
        }
    }

    // ── 调度器回调 ────────────────────────────────────────────────────────────

    /// Pending → Queued；事件已被提交过则返回 false
    pub(crate) fn mark_queued(&self, lineage: Lineage) -> bool {
        let mut st = self.0.state.lock();
        if st.status != EventStatus::Pending {
            return false;
        }
        st.status  = EventStatus::Queued;
        st.lineage = lineage;
        true
    }

    pub(crate) fn lineage(&self) -> Lineage {
        self.0.state.lock().lineage.clone()
    }

    /// 提交被拒绝：尚未被接受的事件以该错误结束
    pub(crate) fn reject(&self, err: MetaError) {
        {
            let mut st = self.0.state.lock();
            if st.status != EventStatus::Pending {
                return;
            }
            st.status = EventStatus::Failed;
            st.error  = Some(err);
        }
        self.0.done.notify_all();
        self.invoke_done_cb();
    }

    /// worker 上执行；panic 被捕获为 EventPanicked
    pub(crate) fn run(&self) {
        self.0.state.lock().status = EventStatus::Running;
        debug!(event_id = self.0.id, kind = self.kind_name(), "event running");

        let mut slot = None;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.0.kind.execute(&self.0.ctx, &mut slot)
        }))
        .unwrap_or_else(|payload| Err(MetaError::EventPanicked(panic_message(payload))));

        self.complete(slot, result.err());
    }

    fn complete(&self, output: Option<EventOutput>, error: Option<MetaError>) {
        match &error {
            None    => debug!(event_id = self.0.id, kind = self.kind_name(), "event done"),
            Some(e) => warn!(event_id = self.0.id, kind = self.kind_name(), error = %e, "event failed"),
        }
        {
            let mut st = self.0.state.lock();
            st.status = if error.is_some() { EventStatus::Failed } else { EventStatus::Done };
            st.output = output;
            st.error  = error;
        }
        self.0.done.notify_all();
        self.invoke_done_cb();
    }

    fn invoke_done_cb(&self) {
        let Some(cb) = self.0.ctx.done_cb() else { return };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| cb(self))) {
            warn!(event_id = self.0.id, panic = %panic_message(payload), "done callback panicked");
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.0.id)
            .field("kind", &self.kind_name())
            .field("scopes", &self.0.scopes)
            .field("status", &self.status())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
