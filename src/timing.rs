//! Timing-attack coordinator
//!
//! Modules register deferred timing operations while the regular audit
//! runs; the phase itself executes between the two page-queue drains so
//! delay measurements are not polluted by the scan's own traffic.

use crate::error::Result;
use crate::issue::ElementKind;
use crate::modules::AuditContext;
use futures::future::BoxFuture;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{error, info};

/// Deferred job run during the timing phase
pub type TimingJob = Box<dyn FnOnce(AuditContext) -> BoxFuture<'static, Result<()>> + Send>;

/// One deferred timing probe
pub struct TimingOperation {
    /// Id of the registering module
    pub module: String,
    /// Element class the probe targets
    pub kind: ElementKind,
    /// Target element action; may be empty when there is no single target
    pub action: String,
    /// Injected payload
    pub payload: String,
    job: TimingJob,
}

impl TimingOperation {
    pub fn new<F, Fut>(
        module: impl Into<String>,
        kind: ElementKind,
        action: impl Into<String>,
        payload: impl Into<String>,
        job: F,
    ) -> Self
    where
        F: FnOnce(AuditContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            module: module.into(),
            kind,
            action: action.into(),
            payload: payload.into(),
            job: Box::new(move |ctx| -> BoxFuture<'static, Result<()>> { Box::pin(job(ctx)) }),
        }
    }
}

type OperationHook = Box<dyn Fn(&TimingOperation) + Send + Sync>;

/// Collects timing operations during the regular audit and runs them as a
/// distinct phase with its own progress accounting.
pub struct TimingCoordinator {
    modules: Mutex<HashSet<String>>,
    blocks: Mutex<VecDeque<TimingOperation>>,
    total_operations: AtomicU64,
    remaining_operations: AtomicU64,
    running: AtomicBool,
    hook: Mutex<Option<OperationHook>>,
}

impl TimingCoordinator {
    pub fn new() -> Self {
        Self {
            modules: Mutex::new(HashSet::new()),
            blocks: Mutex::new(VecDeque::new()),
            total_operations: AtomicU64::new(0),
            remaining_operations: AtomicU64::new(0),
            running: AtomicBool::new(false),
            hook: Mutex::new(None),
        }
    }

    /// Registers a deferred operation and remembers the registering module
    pub fn schedule(&self, op: TimingOperation) {
        self.modules
            .lock()
            .expect("modules lock poisoned")
            .insert(op.module.clone());
        self.blocks.lock().expect("blocks lock poisoned").push_back(op);
    }

    /// True when any module has registered a timing operation this scan
    pub fn has_timing_modules(&self) -> bool {
        !self.modules.lock().expect("modules lock poisoned").is_empty()
    }

    /// True when operations are waiting to run
    pub fn has_operations(&self) -> bool {
        !self.blocks.lock().expect("blocks lock poisoned").is_empty()
    }

    /// Operation count snapshotted when the phase started
    pub fn total_operations(&self) -> u64 {
        self.total_operations.load(Ordering::Relaxed)
    }

    pub fn remaining_operations(&self) -> u64 {
        self.remaining_operations.load(Ordering::Relaxed)
    }

    /// True while the phase is active
    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Installs the per-operation hook fired at each dispatch
    pub fn on_operation<F>(&self, hook: F)
    where
        F: Fn(&TimingOperation) + Send + Sync + 'static,
    {
        *self.hook.lock().expect("hook lock poisoned") = Some(Box::new(hook));
    }

    /// Runs every pending operation to completion.
    ///
    /// Operations run one at a time so each delay measurement sees a quiet
    /// wire. A failing operation is logged and the phase continues.
    pub async fn run(&self, ctx: &AuditContext) {
        let count = self.blocks.lock().expect("blocks lock poisoned").len() as u64;
        self.total_operations.store(count, Ordering::SeqCst);
        self.remaining_operations.store(count, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        info!("timing phase: {count} operations pending");

        loop {
            let op = match self.blocks.lock().expect("blocks lock poisoned").pop_front() {
                Some(op) => op,
                None => break,
            };

            {
                let hook = self.hook.lock().expect("hook lock poisoned");
                if let Some(hook) = hook.as_ref() {
                    hook(&op);
                }
            }

            let module = op.module.clone();
            let job = op.job;
            let handle = tokio::spawn(job(ctx.clone()));
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("timing operation from '{module}' failed: {e}"),
                Err(e) if e.is_panic() => error!("timing operation from '{module}' panicked: {e}"),
                Err(e) => error!("timing operation from '{module}' aborted: {e}"),
            }

            self.remaining_operations.fetch_sub(1, Ordering::SeqCst);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("timing phase complete");
    }
}

impl Default for TimingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_op(module: &str, action: &str) -> TimingOperation {
        TimingOperation::new(module, ElementKind::Link, action, "", |_ctx| async {
            Ok(())
        })
    }

    #[test]
    fn test_schedule_tracks_modules_and_blocks() {
        let coordinator = TimingCoordinator::new();
        assert!(!coordinator.has_timing_modules());
        assert!(!coordinator.has_operations());

        coordinator.schedule(noop_op("sqli_timing", "http://t/a"));
        coordinator.schedule(noop_op("sqli_timing", "http://t/b"));

        assert!(coordinator.has_timing_modules());
        assert!(coordinator.has_operations());
        assert_eq!(coordinator.total_operations(), 0, "totals set at phase start");
    }
}
