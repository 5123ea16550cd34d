//! 事件调度器
//!
//! - 分层 worker 池：深度 d 的事件只在第 d 层执行。最深一层的事件不能再嵌套，
//!   所以每一层都能前进，父事件阻塞等待子事件不会耗尽线程。
//! - Scope 串行化：每个 scope 一条 FIFO 队列。事件只有在自己所有 scope 队列的
//!   队头且无人持有时才被放行；入队在同一把锁内完成，各队列顺序一致，不会循环等待。
//!   嵌套子事件插到队头，先于尚未开始的根事件执行。
//! - `stop()` 不抢占：已接受的事件（包括在 scope 上排队的）全部执行完才退出。

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use crate::common::{EventId, MetaError, Result, TableId};
use crate::event::Event;
use crate::options::Options;

// ── Scope ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Database / Table 集合
    Catalog,
    /// 表 T 的元数据（Segment / Block 树）
    Meta(TableId),
    /// 表 T 的物理数据
    Data(TableId),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catalog     => write!(f, "catalog"),
            Self::Meta(tid)   => write!(f, "meta({tid})"),
            Self::Data(tid)   => write!(f, "data({tid})"),
        }
    }
}

// ── 嵌套谱系 ──────────────────────────────────────────────────────────────────

/// 事件在嵌套链中的位置，以及所有祖先持有的 scope
#[derive(Debug, Clone, Default)]
pub(crate) struct Lineage {
    pub depth:    usize,
    pub parent:   Option<EventId>,
    pub event_id: EventId,
    pub held:     Vec<Scope>,
}

impl Lineage {
    fn root(event: &Event) -> Self {
        Self { depth: 0, parent: None, event_id: event.id(), held: event.scopes().to_vec() }
    }

    fn child(&self, event: &Event, max_depth: usize) -> Result<Self> {
        let depth = self.depth + 1;
        if depth > max_depth {
            return Err(MetaError::NestingTooDeep { depth, max: max_depth });
        }
        if let Some(s) = event.scopes().iter().find(|s| self.held.contains(s)) {
            return Err(MetaError::ScopeHeldByParent(s.to_string()));
        }
        let mut held = self.held.clone();
        held.extend(event.scopes().iter().cloned());
        Ok(Self { depth, parent: Some(self.event_id), event_id: event.id(), held })
    }
}

thread_local! {
    /// 当前 worker 正在执行的事件
    static CURRENT: RefCell<Option<Lineage>> = RefCell::new(None);
}

// ── 队列状态 ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ScopeQueue {
    holder:  Option<EventId>,
    waiters: VecDeque<EventId>,
}

struct QueueState {
    /// ready[d]：深度 d 的可执行事件
    ready:   Vec<VecDeque<Event>>,
    /// 在 scope 上排队的事件
    blocked: HashMap<EventId, Event>,
    scopes:  HashMap<Scope, ScopeQueue>,
    running: usize,
    stopped: bool,
}

impl QueueState {
    fn admissible(&self, event: &Event) -> bool {
        event.scopes().iter().all(|s| {
            self.scopes.get(s).map_or(true, |q| {
                q.holder.is_none() && q.waiters.front() == Some(&event.id())
            })
        })
    }

    fn admit(&mut self, event: Event) {
        for s in event.scopes() {
            if let Some(q) = self.scopes.get_mut(s) {
                q.waiters.pop_front();
                q.holder = Some(event.id());
            }
        }
        let depth = event.depth().min(self.ready.len() - 1);
        self.ready[depth].push_back(event);
    }

    /// 子事件插到队头：父事件持有 scope 等它完成，排在后来的根事件之后会互相等待
    fn enqueue(&mut self, event: Event) {
        let nested = event.depth() > 0;
        for s in event.scopes() {
            let q = self.scopes.entry(s.clone()).or_default();
            if nested {
                q.waiters.push_front(event.id());
            } else {
                q.waiters.push_back(event.id());
            }
        }
        if self.admissible(&event) {
            self.admit(event);
        } else {
            debug!(event_id = event.id(), kind = event.kind_name(), "event waits for scope");
            self.blocked.insert(event.id(), event);
        }
    }

    /// 释放 scope，并放行各队列的新队头
    fn release(&mut self, event: &Event) {
        let mut candidates = Vec::new();
        for s in event.scopes() {
            let Some(q) = self.scopes.get_mut(s) else { continue };
            q.holder = None;
            match q.waiters.front().copied() {
                Some(next) => candidates.push(next),
                None       => { self.scopes.remove(s); }
            }
        }
        for id in candidates {
            if self.blocked.get(&id).is_some_and(|e| self.admissible(e)) {
                if let Some(next) = self.blocked.remove(&id) {
                    self.admit(next);
                }
            }
        }
    }

    fn pending(&self) -> usize {
        self.ready.iter().map(|q| q.len()).sum::<usize>() + self.blocked.len()
    }
}

struct Shared {
    state:      Mutex<QueueState>,
    work_ready: Condvar,
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

pub struct Scheduler {
    shared:            Arc<Shared>,
    workers:           Mutex<Vec<JoinHandle<()>>>,
    max_nesting_depth: usize,
}

impl Scheduler {
    pub fn new(opts: &Options) -> Result<Arc<Self>> {
        opts.validate()?;
        let tiers  = opts.max_nesting_depth + 1;
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                ready:   (0..tiers).map(|_| VecDeque::new()).collect(),
                blocked: HashMap::new(),
                scopes:  HashMap::new(),
                running: 0,
                stopped: false,
            }),
            work_ready: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(opts.total_workers());
        for tier in 0..tiers {
            let n = if tier == 0 { opts.workers } else { opts.nested_workers };
            for i in 0..n {
                let worker_shared = shared.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-{tier}-{i}", opts.thread_name))
                    .spawn(move || worker_loop(worker_shared, tier));
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        shared.state.lock().stopped = true;
                        shared.work_ready.notify_all();
                        return Err(e.into());
                    }
                }
            }
        }
        info!(workers = handles.len(), tiers, "scheduler started");

        Ok(Arc::new(Self {
            shared,
            workers: Mutex::new(handles),
            max_nesting_depth: opts.max_nesting_depth,
        }))
    }

    /// 提交事件。被拒绝时事件同时以该错误完成，已在等待的调用方会被唤醒。
    pub fn schedule(&self, event: &Event) -> Result<()> {
        let lineage = CURRENT.with(|cur| match &*cur.borrow() {
            None         => Ok(Lineage::root(event)),
            Some(parent) => parent.child(event, self.max_nesting_depth),
        });
        let lineage = match lineage {
            Ok(l)  => l,
            Err(e) => {
                event.reject(e.clone());
                return Err(e);
            }
        };

        {
            let mut st = self.shared.state.lock();
            // 已接受事件派生的子事件在停止后仍可提交
            if !st.stopped || lineage.parent.is_some() {
                if !event.mark_queued(lineage) {
                    return Err(MetaError::EventAlreadyScheduled(event.id()));
                }
                st.enqueue(event.clone());
                self.shared.work_ready.notify_all();
                return Ok(());
            }
        }
        event.reject(MetaError::SchedulerStopped);
        Err(MetaError::SchedulerStopped)
    }

    /// 停止接收新事件，等已接受的事件跑完后回收线程
    pub fn stop(&self) {
        {
            let mut st = self.shared.state.lock();
            if !st.stopped {
                st.stopped = true;
                info!(pending = st.pending(), running = st.running, "scheduler stopping");
            }
        }
        self.shared.work_ready.notify_all();

        // 事件内部调用：其余 worker 要等本事件结束才退出，不能在这里 join
        if CURRENT.with(|cur| cur.borrow().is_some()) {
            return;
        }
        let handles = std::mem::take(&mut *self.workers.lock());
        let me = thread::current().id();
        for h in handles {
            // 事件内部调用 stop 时不能 join 自己
            if h.thread().id() == me {
                continue;
            }
            if h.join().is_err() {
                warn!("scheduler worker exited abnormally");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopped
    }

    /// 已接受但尚未开始执行的事件数
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending()
    }

    pub fn running_count(&self) -> usize {
        self.shared.state.lock().running
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("pending", &st.pending())
            .field("running", &st.running)
            .field("stopped", &st.stopped)
            .finish()
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

fn worker_loop(shared: Arc<Shared>, tier: usize) {
    debug!(tier, "scheduler worker started");
    loop {
        let event = {
            let mut st = shared.state.lock();
            loop {
                if let Some(ev) = st.ready[tier].pop_front() {
                    st.running += 1;
                    break ev;
                }
                if st.stopped && st.running == 0 && st.pending() == 0 {
                    debug!(tier, "scheduler worker exit");
                    return;
                }
                shared.work_ready.wait(&mut st);
            }
        };

        let lineage = event.lineage();
        CURRENT.with(|cur| *cur.borrow_mut() = Some(lineage));
        event.run();
        CURRENT.with(|cur| *cur.borrow_mut() = None);

        let mut st = shared.state.lock();
        st.running -= 1;
        st.release(&event);
        shared.work_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::common::ColumnType;
    use crate::context::Context;
    use crate::event::{CreateBlockEvent, CreateTableEvent, EventStatus};
    use crate::meta::{ColumnSchema, TableSchema};
    use crate::table::Catalog;
    use crate::table_data::MemTableData;

    fn setup(opts: Options) -> (Context, TableId) {
        let scheduler = Scheduler::new(&opts).unwrap();
        let ctx = Context::new(Arc::new(opts), Arc::new(Catalog::new()), scheduler)
            .with_waitable(true);
        let db = ctx.catalog.create_database("db").unwrap();
        let schema = TableSchema::new("t", vec![ColumnSchema::new(0, "a", ColumnType::Int32)])
            .with_block_max_rows(16);
        let ev = CreateTableEvent::new(&ctx, db, schema);
        ctx.scheduler.schedule(&ev).unwrap();
        ev.wait_done().unwrap();
        let tid = ev.table().unwrap().id();
        (ctx, tid)
    }

    #[test]
    fn lineage_rejects_deep_or_overlapping_children() {
        let (ctx, tid) = setup(Options::default());
        let parent = CreateBlockEvent::new(&ctx, tid, None, None);
        let root   = Lineage::root(&parent);
        assert_eq!(root.held, vec![Scope::Meta(tid)]);

        let same = CreateBlockEvent::new(&ctx, tid, None, None);
        assert!(matches!(root.child(&same, 1), Err(MetaError::ScopeHeldByParent(_))));

        let other = CreateBlockEvent::new(&ctx, tid + 1, None, None);
        assert_eq!(
            root.child(&other, 0).err(),
            Some(MetaError::NestingTooDeep { depth: 1, max: 0 })
        );
        let child = root.child(&other, 1).unwrap();
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent, Some(parent.id()));
        assert!(child.held.contains(&Scope::Meta(tid)));
    }

    #[test]
    fn same_scope_runs_in_submission_order() {
        let (ctx, tid) = setup(Options::default().with_workers(4));
        let order = Arc::new(Mutex::new(Vec::new()));
        let recorder = order.clone();
        let cb_ctx = ctx.clone().with_done_cb(move |ev| {
            if let Some(b) = ev.block() {
                recorder.lock().push(b.id());
            }
        });

        let events: Vec<_> = (0..32)
            .map(|_| CreateBlockEvent::new(&cb_ctx, tid, None, None))
            .collect();
        for ev in &events {
            ctx.scheduler.schedule(ev).unwrap();
        }
        for ev in &events {
            ev.wait_done().unwrap();
        }
        // 回调在唤醒等待者之后执行，stop 之后才全部完成
        ctx.scheduler.stop();

        let seen = order.lock().clone();
        let expected: Vec<_> = events.iter().map(|e| e.block().unwrap().id()).collect();
        assert_eq!(seen, expected);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn rejects_double_schedule() {
        let (ctx, tid) = setup(Options::default());
        let ev = CreateBlockEvent::new(&ctx, tid, None, None);
        ctx.scheduler.schedule(&ev).unwrap();
        assert_eq!(
            ctx.scheduler.schedule(&ev),
            Err(MetaError::EventAlreadyScheduled(ev.id()))
        );
        ev.wait_done().unwrap();
        assert_eq!(ev.status(), EventStatus::Done);
    }

    #[test]
    fn schedule_after_stop_fails_the_event() {
        let (ctx, tid) = setup(Options::default());
        ctx.scheduler.stop();
        assert!(ctx.scheduler.is_stopped());

        let ev = CreateBlockEvent::new(&ctx, tid, None, None);
        assert_eq!(ctx.scheduler.schedule(&ev), Err(MetaError::SchedulerStopped));
        assert_eq!(ev.status(), EventStatus::Failed);
        assert_eq!(ev.wait_done(), Err(MetaError::SchedulerStopped));
        assert_eq!(ctx.scheduler.pending_count(), 0);
        assert_eq!(ctx.scheduler.running_count(), 0);
        // 重复 stop 无副作用
        ctx.scheduler.stop();
    }

    #[test]
    fn stop_drains_accepted_events() {
        let (ctx, tid) = setup(Options::default().with_workers(1));
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let cb_ctx = ctx.clone().with_done_cb(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        for _ in 0..20 {
            ctx.scheduler.schedule(&CreateBlockEvent::new(&cb_ctx, tid, None, None)).unwrap();
        }
        ctx.scheduler.stop();
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert_eq!(ctx.catalog.get_table(tid).unwrap().block_count(), 20);
    }

    #[test]
    fn nesting_disabled_rejects_child() {
        let (ctx, tid) = setup(
            Options::default().with_max_nesting_depth(0).with_nested_workers(0),
        );
        let table = ctx.catalog.get_table(tid).unwrap();
        let data  = MemTableData::new(&table, 4);
        let ev    = CreateBlockEvent::new(&ctx, tid, None, Some(data.clone()));
        ctx.scheduler.schedule(&ev).unwrap();
        assert_eq!(ev.wait_done(), Err(MetaError::NestingTooDeep { depth: 1, max: 0 }));
        assert_eq!(table.block_count(), 1);
        assert_eq!(data.block_count(), 0);
    }
}
