use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use davsync_core::{DeleteRequest, lock_condition};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::item::{ItemStatus, SyncItem};
use super::journal::SyncJournal;
use super::paths::{VfsMode, full_remote_path};
use super::remote_delete::{JobRun, RemoteDeleteJob};
use super::transport::DeleteTransport;

pub type JobId = u64;

/// Messages jobs send to whoever keeps track of running work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Started { id: JobId, file: String },
    Finished { id: JobId, status: ItemStatus },
    Aborted { id: JobId },
    AbortFinished { id: JobId },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagateOptions {
    /// Folder on the server the sync root maps to.
    pub remote_root: String,
    pub vfs: VfsMode,
}

/// State shared by every job of one sync run.
pub struct PropagateContext<T, J> {
    pub transport: T,
    pub journal: J,
    pub options: PropagateOptions,
    abort: CancellationToken,
    another_sync_needed: AtomicBool,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl<T: DeleteTransport, J: SyncJournal> PropagateContext<T, J> {
    pub fn abort_requested(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn another_sync_needed(&self) -> &AtomicBool {
        &self.another_sync_needed
    }

    pub(crate) fn notify(&self, event: JobEvent) {
        // The receiver may already be gone during shutdown.
        let _ = self.events.send(event);
    }

    /// Request for `path`, carrying the item's lock and trash-bin choices.
    pub fn delete_request(&self, item: &SyncItem, path: String) -> DeleteRequest {
        let if_condition = item.lock_token().map(|token| {
            let locked = full_remote_path(&self.options.remote_root, &item.file)
                .unwrap_or_else(|_| item.file.clone());
            lock_condition(self.transport.dav_url(), &locked, token)
        });
        DeleteRequest {
            path,
            if_condition,
            skip_trashbin: item.wants_permanent_deletion(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortType {
    Synchronous,
    /// The caller waits for [`JobEvent::AbortFinished`].
    Asynchronous,
}

#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
    aborted: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Cancels the outstanding request. Only the first call has an effect.
    pub fn abort(&self, kind: AbortType) -> bool {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        if kind == AbortType::Asynchronous {
            let _ = self.events.send(JobEvent::AbortFinished { id: self.id });
        }
        true
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct Propagator<T, J> {
    ctx: Arc<PropagateContext<T, J>>,
    next_id: AtomicU64,
}

impl<T: DeleteTransport, J: SyncJournal> Propagator<T, J> {
    pub fn new(
        transport: T,
        journal: J,
        options: PropagateOptions,
    ) -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let ctx = PropagateContext {
            transport,
            journal,
            options,
            abort: CancellationToken::new(),
            another_sync_needed: AtomicBool::new(false),
            events,
        };
        (
            Self {
                ctx: Arc::new(ctx),
                next_id: AtomicU64::new(1),
            },
            receiver,
        )
    }

    pub fn context(&self) -> &Arc<PropagateContext<T, J>> {
        &self.ctx
    }

    pub fn journal(&self) -> &J {
        &self.ctx.journal
    }

    pub fn remote_delete(&self, item: SyncItem) -> (RemoteDeleteJob<T, J>, JobHandle) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.ctx.abort.child_token();
        let handle = JobHandle {
            id,
            cancel: cancel.clone(),
            aborted: Arc::new(AtomicBool::new(false)),
            events: self.ctx.events.clone(),
        };
        let job = RemoteDeleteJob::new(id, item, Arc::clone(&self.ctx), cancel);
        (job, handle)
    }

    /// Runs one job at a time; the journal sees a single writer.
    pub async fn run_remote_deletes(&self, items: Vec<SyncItem>) -> Vec<JobRun> {
        let mut runs = Vec::with_capacity(items.len());
        for item in items {
            let (job, _handle) = self.remote_delete(item);
            debug!(
                id = job.id(),
                file = %job.item().file,
                quick = job.is_likely_finished_quickly(),
                "running remote delete"
            );
            runs.push(job.run().await);
        }
        runs
    }

    pub fn abort_all(&self) {
        self.ctx.abort.cancel();
    }

    pub fn another_sync_needed(&self) -> bool {
        self.ctx.another_sync_needed.load(Ordering::Relaxed)
    }
}

/// Running jobs, folded from [`JobEvent`]s.
#[derive(Debug, Default)]
pub struct ActiveJobs {
    running: BTreeMap<JobId, String>,
}

impl ActiveJobs {
    pub fn apply(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Started { id, file } => {
                self.running.insert(*id, file.clone());
            }
            JobEvent::Finished { id, .. } | JobEvent::Aborted { id } => {
                self.running.remove(id);
            }
            JobEvent::AbortFinished { .. } => {}
        }
    }

    pub fn drain(&mut self, receiver: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            self.apply(&event);
            seen.push(event);
        }
        seen
    }

    pub fn is_running(&self, id: JobId) -> bool {
        self.running.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::journal::JournalStore;
    use davsync_core::{Credentials, DavClient};

    async fn make_propagator() -> (
        Propagator<DavClient, JournalStore>,
        mpsc::UnboundedReceiver<JobEvent>,
    ) {
        let client = DavClient::new(
            "https://cloud.example/remote.php/dav/files/alice/",
            Credentials::Anonymous,
        )
        .unwrap();
        let journal = JournalStore::in_memory().await.unwrap();
        Propagator::new(
            client,
            journal,
            PropagateOptions {
                remote_root: "Sync".into(),
                vfs: VfsMode::Off,
            },
        )
    }

    #[test]
    fn active_jobs_track_start_and_finish() {
        let mut active = ActiveJobs::default();
        active.apply(&JobEvent::Started {
            id: 1,
            file: "A".into(),
        });
        active.apply(&JobEvent::Started {
            id: 2,
            file: "B".into(),
        });
        assert_eq!(active.len(), 2);

        active.apply(&JobEvent::Finished {
            id: 1,
            status: ItemStatus::Success,
        });
        active.apply(&JobEvent::AbortFinished { id: 2 });
        assert!(!active.is_running(1));
        assert!(active.is_running(2));

        active.apply(&JobEvent::Aborted { id: 2 });
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn second_abort_is_absorbed() {
        let (propagator, mut events) = make_propagator().await;
        let (_job, handle) = propagator.remote_delete(SyncItem::file("A.txt"));

        assert!(handle.abort(AbortType::Asynchronous));
        assert!(!handle.abort(AbortType::Asynchronous));
        assert!(handle.is_aborted());

        let mut active = ActiveJobs::default();
        let seen = active.drain(&mut events);
        assert_eq!(seen, vec![JobEvent::AbortFinished { id: handle.id() }]);
    }

    #[tokio::test]
    async fn synchronous_abort_emits_nothing() {
        let (propagator, mut events) = make_propagator().await;
        let (_job, handle) = propagator.remote_delete(SyncItem::file("A.txt"));

        assert!(handle.abort(AbortType::Synchronous));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn global_abort_reaches_job_handles() {
        let (propagator, _events) = make_propagator().await;
        let (_job, handle) = propagator.remote_delete(SyncItem::file("A.txt"));
        propagator.abort_all();
        assert!(handle.is_aborted());
        assert!(propagator.context().abort_requested());
    }

    #[tokio::test]
    async fn job_ids_are_unique() {
        let (propagator, _events) = make_propagator().await;
        let (_a, first) = propagator.remote_delete(SyncItem::file("A.txt"));
        let (_b, second) = propagator.remote_delete(SyncItem::file("B.txt"));
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn delete_request_binds_lock_to_item_and_honours_permanent_flag() {
        let (propagator, _events) = make_propagator().await;
        let item = SyncItem::file("Docs/A.txt")
            .with_lock("tok")
            .with_deletion(crate::sync::item::DeletionMode::PermanentDelete);
        let request = propagator
            .context()
            .delete_request(&item, "Sync/Docs/A.txt".into());

        assert_eq!(request.path, "Sync/Docs/A.txt");
        assert!(request.skip_trashbin);
        assert_eq!(
            request.if_condition.as_deref(),
            Some(
                "<https://cloud.example/remote.php/dav/files/alice/Sync/Docs/A.txt> (<opaquelocktoken:tok>)"
            )
        );
    }
}
