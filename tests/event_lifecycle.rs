//! 事件生命周期集成测试：Block 状态机、scope 串行化、嵌套事件

use std::collections::HashSet;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use olap_meta_engine::{
    common::{BlockState, ColumnType, OpType, TableId},
    event::{CommitBlockEvent, CreateBlockEvent, DropTableEvent},
    meta::{BlockSnapshot, ColumnSchema},
    table::Table,
    table_data::{MemTableData, PhysicalBlock, TableData},
    EventOutput, EventStatus, MetaError, Options, Result, Scope, StorageEngine,
};
use proptest::prelude::*;

const MAX_ROWS: u64 = 16;

fn engine() -> StorageEngine {
    StorageEngine::open(
        Options::new("/tmp/olap-meta-test")
            .with_workers(4)
            .with_nested_workers(2)
            .with_block_max_rows(MAX_ROWS)
            .with_segment_max_blocks(4),
    )
    .unwrap()
}

fn table(engine: &StorageEngine) -> Table {
    let db = engine.create_database("db").unwrap();
    let schema = engine.schema("t", vec![
        ColumnSchema::new(0, "id", ColumnType::Int64),
        ColumnSchema::new(1, "v",  ColumnType::Float32),
    ]);
    engine.create_table(db, schema).unwrap()
}

/// 总是失败或 panic 的表数据
struct BrokenData {
    table_id: TableId,
    panic:    bool,
}

impl TableData for BrokenData {
    fn table_id(&self) -> TableId { self.table_id }

    fn materialize(&self, _meta: &BlockSnapshot) -> Result<PhysicalBlock> {
        if self.panic {
            panic!("materialize exploded");
        }
        Err(MetaError::Materialize("disk full".into()))
    }
}

/// 物化前先通知测试线程，再等放行信号
struct GatedData {
    inner:   Arc<MemTableData>,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedData {
    fn new(table: &Table) -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gated = Arc::new(Self {
            inner:   MemTableData::new(table, 4),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        (gated, entered_rx, release_tx)
    }
}

impl TableData for GatedData {
    fn table_id(&self) -> TableId { self.inner.table_id() }

    fn materialize(&self, meta: &BlockSnapshot) -> Result<PhysicalBlock> {
        let _ = self.entered.lock().unwrap().send(());
        self.release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| MetaError::Materialize("gate never opened".into()))?;
        self.inner.materialize(meta)
    }
}

const WAIT: Duration = Duration::from_secs(10);

// ── 场景 ──────────────────────────────────────────────────────────────────────

#[test]
fn create_fill_commit_then_stop() {
    let e = engine();
    let t = table(&e);

    let block = e.create_block(t.id(), None).unwrap();
    assert_eq!(block.count(), 0);
    assert_eq!(block.commit_info().op, OpType::Create);

    block.set_count(MAX_ROWS).unwrap();
    e.commit_block(&block).unwrap();
    assert!(block.is_full());
    assert_eq!(block.state(), BlockState::Committed);

    let mut ids = HashSet::new();
    ids.insert((block.segment_id(), block.id()));
    for _ in 0..100 {
        let b = e.create_block(t.id(), None).unwrap();
        assert!(ids.insert((b.segment_id(), b.id())));
    }
    assert_eq!(ids.len(), 101);

    e.shutdown();
    assert!(e.scheduler().is_stopped());
    assert_eq!(e.create_block(t.id(), None).err(), Some(MetaError::SchedulerStopped));
}

// ── P1 / P5 ───────────────────────────────────────────────────────────────────

#[test]
fn concurrent_creates_get_distinct_ids() {
    let e = Arc::new(engine());
    let t = table(&e);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let e   = e.clone();
            let tid = t.id();
            thread::spawn(move || {
                (0..25).map(|_| e.create_block(tid, None).unwrap().id()).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for h in handles {
        for id in h.join().unwrap() {
            assert!(ids.insert(id), "duplicate block id {id}");
        }
    }
    assert_eq!(ids.len(), 200);
    assert_eq!(t.block_count(), 200);
    for seg in t.segments() {
        assert!(seg.block_count() <= 4);
    }
}

#[test]
fn same_table_events_allocate_in_submission_order() {
    let e   = engine();
    let t   = table(&e);
    let ctx = e.context();

    let events: Vec<_> = (0..50)
        .map(|_| CreateBlockEvent::new(&ctx, t.id(), None, None))
        .collect();
    for ev in &events {
        e.scheduler().schedule(ev).unwrap();
    }
    let ids: Vec<_> = events
        .iter()
        .map(|ev| {
            ev.wait_done().unwrap();
            ev.block().unwrap().id()
        })
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "{ids:?}");
}

// ── P2 / P3 / P4 ──────────────────────────────────────────────────────────────

#[test]
fn commit_below_threshold_never_mutates() {
    let e = engine();
    let t = table(&e);

    proptest!(ProptestConfig::with_cases(32), |(count in 0..MAX_ROWS)| {
        let block = e.create_block(t.id(), None).unwrap();
        block.set_count(count).unwrap();
        let before = block.commit_info();

        let ev = CommitBlockEvent::new(&e.context(), block.clone());
        let err = e.run(&ev).unwrap_err();
        prop_assert_eq!(err, MetaError::NotFull { block_id: block.id(), count, max_rows: MAX_ROWS });
        prop_assert_eq!(block.commit_info(), before);
        prop_assert_eq!(block.history().len(), 1);
        prop_assert_eq!(ev.status(), EventStatus::Failed);
    });
}

#[test]
fn committed_block_visible_with_version_chain() {
    let e = engine();
    let t = table(&e);

    let block = e.create_block(t.id(), None).unwrap();
    let created = block.snapshot();
    block.set_count(MAX_ROWS).unwrap();
    let committed = e.commit_block(&block).unwrap();

    let fetched = e.catalog().get_block(t.id(), block.segment_id(), block.id()).unwrap();
    assert!(fetched.same_as(&block));
    assert!(fetched.is_full());
    assert_eq!(fetched.commit_info(), committed.commit);

    // 新快照的 prev 指向提交前的快照
    assert_eq!(committed.commit.prev, Some(created.version()));
    assert_eq!(block.snapshot_at(created.version()), Some(created));

    let history = block.history();
    assert_eq!(history.len(), 2);
    assert!(history.windows(2).all(|w| w[1].version() < w[0].version()));
    assert_eq!(history.last().map(|s| s.commit.prev), Some(None));
}

#[test]
fn create_from_prev_meta_is_idempotent() {
    let e = engine();
    let t = table(&e);

    let old = e.create_block(t.id(), None).unwrap();
    let prev = old.snapshot();
    let a = e.create_block(t.id(), Some(prev)).unwrap();
    let b = e.create_block(t.id(), Some(prev)).unwrap();
    assert!(a.same_as(&b));
    assert_eq!(a.prev_meta(), Some(prev));
    assert_ne!(a.id(), old.id());
}

// ── 嵌套事件 ──────────────────────────────────────────────────────────────────

#[test]
fn create_block_materializes_physical_data() {
    let e = engine();
    let t = table(&e);
    let data = MemTableData::new(&t, 4);

    let ev = e.create_block_with_data(t.id(), data.clone()).unwrap();
    let block = ev.block().unwrap();
    let physical = ev.physical_block().unwrap();
    assert_eq!(physical.block_id(), block.id());
    assert_eq!(physical.num_columns(), 2);
    assert!(data.get(block.segment_id(), block.id()).unwrap().same_as(&physical));
}

#[test]
fn nested_failure_keeps_created_block() {
    let e = engine();
    let t = table(&e);
    let broken = Arc::new(BrokenData { table_id: t.id(), panic: false });

    let ev = CreateBlockEvent::new(&e.context(), t.id(), None, Some(broken));
    let err = e.run(&ev).unwrap_err();
    assert!(matches!(err, MetaError::NestedEventFailed(_)));
    assert_eq!(err.root_cause(), &MetaError::Materialize("disk full".into()));
    assert!(ev.block().is_none());

    // 元数据不回滚
    let Some(EventOutput::Block { block, data: None }) = ev.output() else {
        panic!("expected partial block output, got {:?}", ev.output());
    };
    assert!(e.catalog().get_block(t.id(), block.segment_id(), block.id()).is_ok());
    assert_eq!(t.block_count(), 1);
}

#[test]
fn nested_panic_is_reported_not_fatal() {
    let e = engine();
    let t = table(&e);
    let broken = Arc::new(BrokenData { table_id: t.id(), panic: true });

    let ev = CreateBlockEvent::new(&e.context(), t.id(), None, Some(broken));
    let err = e.run(&ev).unwrap_err();
    assert_eq!(
        err.root_cause(),
        &MetaError::EventPanicked("materialize exploded".into())
    );
    // worker 仍然可用
    assert!(e.create_block(t.id(), None).is_ok());
}

#[test]
fn child_sharing_parent_scope_is_rejected() {
    let e = engine();
    let t = table(&e);
    let data = MemTableData::new(&t, 4);

    let ctx = e.context().with_scope(Scope::Data(t.id()));
    let ev  = CreateBlockEvent::new(&ctx, t.id(), None, Some(data.clone()));
    assert!(matches!(e.run(&ev), Err(MetaError::ScopeHeldByParent(_))));
    assert_eq!(data.block_count(), 0);
    assert_eq!(t.block_count(), 1);
}

#[test]
fn child_overtakes_drop_queued_on_same_scope() {
    let e = engine();
    let t = table(&e);
    let ctx = e.context();
    let (gated, entered, release) = GatedData::new(&t);

    // holder 占住 Meta(t)，其子事件占住 Data(t) 并停在闸门处
    let holder = CreateBlockEvent::new(&ctx, t.id(), None, Some(gated));
    e.scheduler().schedule(&holder).unwrap();
    entered.recv_timeout(WAIT).unwrap();

    // parent 排在 Meta(t) 上；drop 排在 Meta(t)、Data(t) 与 Catalog 上
    let parent  = CreateBlockEvent::new(&ctx, t.id(), None, Some(MemTableData::new(&t, 4)));
    let dropper = DropTableEvent::new(&ctx, t.id());
    e.scheduler().schedule(&parent).unwrap();
    e.scheduler().schedule(&dropper).unwrap();
    release.send(()).unwrap();

    // parent 的子事件必须排到 drop 前面，否则三者互相等待
    let (tx, rx) = mpsc::channel();
    {
        let (holder, parent, dropper) = (holder.clone(), parent.clone(), dropper.clone());
        thread::spawn(move || {
            let _ = tx.send((holder.wait_done(), parent.wait_done(), dropper.wait_done()));
        });
    }
    let (h, p, d) = rx.recv_timeout(WAIT).expect("nested child stuck behind drop_table");
    assert_eq!(h, Ok(()));
    assert_eq!(p, Ok(()));
    assert_eq!(d, Ok(()));
    assert!(holder.physical_block().is_some());
    assert!(parent.physical_block().is_some());
    assert_eq!(e.get_table(t.id()).err(), Some(MetaError::TableNotFound(t.id())));
}

#[test]
fn children_still_run_after_shutdown() {
    let e = Arc::new(engine());
    let t = table(&e);
    let ctx = e.context();
    let (gated, entered, release) = GatedData::new(&t);

    let holder = CreateBlockEvent::new(&ctx, t.id(), None, Some(gated));
    e.scheduler().schedule(&holder).unwrap();
    entered.recv_timeout(WAIT).unwrap();

    // parent 已被接受，但它的子事件要到 stop 之后才提交
    let data   = MemTableData::new(&t, 4);
    let parent = CreateBlockEvent::new(&ctx, t.id(), None, Some(data.clone()));
    e.scheduler().schedule(&parent).unwrap();

    let stopper = {
        let e = e.clone();
        thread::spawn(move || e.shutdown())
    };
    while !e.scheduler().is_stopped() {
        thread::yield_now();
    }
    assert_eq!(
        e.create_block(t.id(), None).err(),
        Some(MetaError::SchedulerStopped)
    );
    release.send(()).unwrap();
    stopper.join().unwrap();

    assert_eq!(holder.status(), EventStatus::Done);
    assert_eq!(parent.wait_done(), Ok(()));
    let block    = parent.block().unwrap();
    let physical = parent.physical_block().unwrap();
    assert_eq!(physical.block_id(), block.id());
    assert!(data.get(block.segment_id(), block.id()).is_some());
    assert_eq!(e.scheduler().running_count(), 0);
    assert_eq!(e.scheduler().pending_count(), 0);
}

// ── 等待与回调 ────────────────────────────────────────────────────────────────

#[test]
fn fire_and_forget_reports_through_callback() {
    let e = engine();
    let t = table(&e);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);

    let ctx = e.context().with_waitable(false).with_done_cb(move |ev| {
        let _ = tx.lock().unwrap().send((ev.status(), ev.block().map(|b| b.id())));
    });
    let ev = CreateBlockEvent::new(&ctx, t.id(), None, None);
    assert_eq!(ev.wait_done(), Err(MetaError::NotWaitable));

    e.scheduler().schedule(&ev).unwrap();
    let (status, id) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(status, EventStatus::Done);
    assert!(id.is_some());
}

#[test]
fn many_waiters_see_same_result() {
    let e = engine();
    let t = table(&e);
    let ev = CreateBlockEvent::new(&e.context(), t.id() + 100, None, None);

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let ev = ev.clone();
            thread::spawn(move || ev.wait_done())
        })
        .collect();
    thread::sleep(Duration::from_millis(20));
    e.scheduler().schedule(&ev).unwrap();

    for w in waiters {
        assert_eq!(w.join().unwrap(), Err(MetaError::TableNotFound(t.id() + 100)));
    }
}
