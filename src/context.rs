//! 事件执行上下文

use std::sync::Arc;
use crate::common::TableId;
use crate::event::Event;
use crate::options::Options;
use crate::scheduler::{Scheduler, Scope};
use crate::table::Catalog;

/// 事件完成后在 worker 线程上回调
pub type DoneCallback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
pub struct Context {
    pub opts:      Arc<Options>,
    pub catalog:   Arc<Catalog>,
    pub scheduler: Arc<Scheduler>,
    /// 提交者是否会阻塞等待完成
    pub waitable:  bool,
    done_cb:       Option<DoneCallback>,
    scopes:        Vec<Scope>,
}

impl Context {
    pub fn new(opts: Arc<Options>, catalog: Arc<Catalog>, scheduler: Arc<Scheduler>) -> Self {
        Self { opts, catalog, scheduler, waitable: false, done_cb: None, scopes: Vec::new() }
    }

    pub fn with_waitable(mut self, waitable: bool) -> Self {
        self.waitable = waitable; self
    }

    pub fn with_done_cb(mut self, cb: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.done_cb = Some(Arc::new(cb)); self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.add_scope(scope); self
    }

    pub fn add_scope(&mut self, scope: Scope) {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
    }

    /// 声明表 T 的元数据独占
    pub fn add_meta_scope(&mut self, table_id: TableId) {
        self.add_scope(Scope::Meta(table_id));
    }

    pub fn scopes(&self) -> &[Scope] { &self.scopes }

    pub(crate) fn done_cb(&self) -> Option<&DoneCallback> { self.done_cb.as_ref() }

    /// 嵌套事件用：共享句柄，可等待，不继承 scope 与回调
    pub fn child(&self) -> Self {
        Self::new(self.opts.clone(), self.catalog.clone(), self.scheduler.clone())
            .with_waitable(true)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("waitable", &self.waitable)
            .field("scopes", &self.scopes)
            .field("done_cb", &self.done_cb.is_some())
            .finish()
    }
}
