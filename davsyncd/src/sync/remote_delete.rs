use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::classify::classify;
use super::encrypted::EncryptedDelete;
use super::inflight::{Aborted, InFlight};
use super::item::{ErrorCategory, ItemStatus, SyncItem};
use super::journal::{SyncJournal, SyncedDescendant};
use super::paths::{full_remote_path, remote_file_name};
use super::propagator::{JobEvent, JobId, PropagateContext};
use super::transport::DeleteTransport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub status: ItemStatus,
    pub message: String,
    pub category: ErrorCategory,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            status: ItemStatus::Success,
            message: String::new(),
            category: ErrorCategory::NoError,
        }
    }

    pub fn error(status: ItemStatus, message: impl Into<String>, category: ErrorCategory) -> Self {
        Self {
            status,
            message: message.into(),
            category,
        }
    }
}

#[derive(Debug)]
pub struct JobReport {
    pub id: JobId,
    pub item: SyncItem,
    pub outcome: Outcome,
}

#[derive(Debug)]
pub enum JobRun {
    Finished(JobReport),
    /// No outcome was produced; the item is handed back untouched by it.
    Aborted { item: SyncItem },
}

impl JobRun {
    pub fn report(&self) -> Option<&JobReport> {
        match self {
            JobRun::Finished(report) => Some(report),
            JobRun::Aborted { .. } => None,
        }
    }
}

/// Synced descendants of a partially excluded directory, consumed in order.
#[derive(Debug)]
struct PartialDelete {
    entries: Vec<SyncedDescendant>,
    cursor: usize,
}

impl PartialDelete {
    fn new(entries: Vec<SyncedDescendant>) -> Self {
        Self { entries, cursor: 0 }
    }

    fn current(&self) -> Option<&SyncedDescendant> {
        self.entries.get(self.cursor)
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1).min(self.entries.len());
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub(crate) fn unexpected_status_message(status: u16, reason: &str) -> String {
    format!(
        "Wrong HTTP code returned by server. Expected 204, but received \"{status} {reason}\"."
    )
}

/// Propagates a local deletion to the server for one item.
pub struct RemoteDeleteJob<T, J> {
    id: JobId,
    item: SyncItem,
    ctx: Arc<PropagateContext<T, J>>,
    in_flight: InFlight,
}

impl<T: DeleteTransport, J: SyncJournal> RemoteDeleteJob<T, J> {
    pub(crate) fn new(
        id: JobId,
        item: SyncItem,
        ctx: Arc<PropagateContext<T, J>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            item,
            ctx,
            in_flight: InFlight::new(cancel),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn item(&self) -> &SyncItem {
        &self.item
    }

    pub fn is_likely_finished_quickly(&self) -> bool {
        !self.item.is_directory()
    }

    pub async fn run(mut self) -> JobRun {
        info!(file = %self.item.file, "start propagate remote delete");
        if self.ctx.abort_requested() || self.in_flight.is_cancelled() {
            return JobRun::Aborted { item: self.item };
        }
        self.ctx.notify(JobEvent::Started {
            id: self.id,
            file: self.item.file.clone(),
        });

        match self.propagate().await {
            // An abort that lands during journal bookkeeping still wins.
            Ok(_) if self.in_flight.is_cancelled() => self.aborted(),
            Ok(outcome) => JobRun::Finished(self.done(outcome)),
            Err(Aborted) => self.aborted(),
        }
    }

    fn aborted(self) -> JobRun {
        info!(file = %self.item.file, "remote delete aborted");
        self.ctx.notify(JobEvent::Aborted { id: self.id });
        JobRun::Aborted { item: self.item }
    }

    async fn propagate(&mut self) -> Result<Outcome, Aborted> {
        if self.item.is_directory() {
            match self
                .ctx
                .journal
                .has_selective_sync_descendants(&self.item.file)
                .await
            {
                Ok(true) => return self.start_partial_delete().await,
                Ok(false) => {}
                Err(err) => {
                    return Ok(Outcome::error(
                        ItemStatus::NormalError,
                        format!(
                            "Could not read selective sync state of {} from local DB: {err}",
                            self.item.file
                        ),
                        ErrorCategory::GenericError,
                    ));
                }
            }
        }

        if let Some(delegate) = EncryptedDelete::for_item(&self.item) {
            return self.encrypted_delete(delegate).await;
        }
        self.direct_delete().await
    }

    async fn start_partial_delete(&mut self) -> Result<Outcome, Aborted> {
        info!(
            folder = %self.item.file,
            "folder has unsynced descendants, performing partial deletion"
        );
        let entries = match self.ctx.journal.synced_descendants(&self.item.file).await {
            Ok(entries) => entries,
            Err(err) => {
                return Ok(Outcome::error(
                    ItemStatus::NormalError,
                    format!(
                        "Could not list synced items of {} from local DB: {err}",
                        self.item.file
                    ),
                    ErrorCategory::GenericError,
                ));
            }
        };

        if entries.is_empty() {
            // Nothing below the folder was ever synced locally.
            info!(folder = %self.item.file, "no synced items to delete, skipping");
            return Ok(Outcome::success());
        }

        info!(
            folder = %self.item.file,
            count = entries.len(),
            "partial deletion: deleting synced items while keeping unsynced content"
        );
        self.partial_delete(PartialDelete::new(entries)).await
    }

    async fn partial_delete(&mut self, mut partial: PartialDelete) -> Result<Outcome, Aborted> {
        let ctx = Arc::clone(&self.ctx);
        while let Some(entry) = partial.current() {
            let entry = entry.clone();
            debug!(
                index = partial.cursor + 1,
                total = partial.len(),
                path = %entry.path,
                "partial deletion: deleting item"
            );

            let path = match full_remote_path(&ctx.options.remote_root, &entry.path) {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = %entry.path, %err, "partial deletion failed");
                    return Ok(Outcome::error(
                        ItemStatus::SoftError,
                        err.to_string(),
                        ErrorCategory::GenericError,
                    ));
                }
            };
            let request = ctx.delete_request(&self.item, path);
            let reply = self.in_flight.run(ctx.transport.delete(request)).await?;

            if !reply.error.is_success_or_not_found() {
                warn!(
                    index = partial.cursor,
                    path = %entry.path,
                    error = ?reply.error,
                    "partial deletion failed"
                );
                return Ok(Outcome::error(
                    ItemStatus::SoftError,
                    reply.error_message,
                    ErrorCategory::GenericError,
                ));
            }

            if let Err(err) = ctx
                .journal
                .delete_file_record(&entry.path, entry.is_directory)
                .await
            {
                warn!(path = %entry.path, %err, "could not delete file record from local DB");
            } else if let Err(err) = ctx.journal.commit("Remote Remove (partial)").await {
                warn!(path = %entry.path, %err, "could not commit local DB");
            }

            partial.advance();
        }

        info!(
            folder = %self.item.file,
            count = partial.len(),
            "partial deletion complete, unsynced content preserved"
        );
        Ok(Outcome::success())
    }

    async fn direct_delete(&mut self) -> Result<Outcome, Aborted> {
        let ctx = Arc::clone(&self.ctx);
        let remote_name = remote_file_name(&self.item, &ctx.options.vfs);
        let path = match full_remote_path(&ctx.options.remote_root, remote_name) {
            Ok(path) => path,
            Err(err) => {
                return Ok(Outcome::error(
                    ItemStatus::NormalError,
                    err.to_string(),
                    ErrorCategory::GenericError,
                ));
            }
        };

        info!(
            local = %self.item.file,
            remote = %path,
            permanent = self.item.wants_permanent_deletion(),
            "deleting file"
        );
        let request = ctx.delete_request(&self.item, path);
        let reply = self.in_flight.run(ctx.transport.delete(request)).await?;

        self.item.http_error_code = reply.status;
        self.item.response_timestamp = reply.response_timestamp;
        self.item.request_id = reply.request_id.clone();

        if !reply.error.is_success_or_not_found() {
            let status = classify(
                reply.error,
                reply.status,
                &reply.body,
                ctx.another_sync_needed(),
            );
            return Ok(Outcome::error(
                status,
                reply.error_message,
                ErrorCategory::from_transport(reply.error),
            ));
        }

        // 404 is fine: the file is supposed to be gone from the server.
        if reply.status != 204 && reply.status != 404 {
            return Ok(Outcome::error(
                ItemStatus::NormalError,
                unexpected_status_message(reply.status, &reply.reason),
                ErrorCategory::GenericError,
            ));
        }

        if let Err(err) = ctx
            .journal
            .delete_file_record(&self.item.original_file, self.item.is_directory())
            .await
        {
            warn!(file = %self.item.original_file, %err, "could not delete file from local DB");
            return Ok(Outcome::error(
                ItemStatus::NormalError,
                format!(
                    "Could not delete file record {} from local DB",
                    self.item.original_file
                ),
                ErrorCategory::GenericError,
            ));
        }
        if let Err(err) = ctx.journal.commit("Remote Remove").await {
            return Ok(Outcome::error(
                ItemStatus::NormalError,
                format!("Could not commit local DB: {err}"),
                ErrorCategory::GenericError,
            ));
        }

        Ok(Outcome::success())
    }

    async fn encrypted_delete(&mut self, mut delegate: EncryptedDelete) -> Result<Outcome, Aborted> {
        let ctx = Arc::clone(&self.ctx);
        let success = self
            .in_flight
            .run(delegate.start(&*ctx, &self.item))
            .await?;
        if delegate.http_status() != 0 {
            self.item.http_error_code = delegate.http_status();
        }

        if success {
            return Ok(Outcome::success());
        }

        let error = delegate.network_error();
        let status = if error.is_success_or_not_found() {
            ItemStatus::NormalError
        } else {
            classify(
                error,
                self.item.http_error_code,
                "",
                ctx.another_sync_needed(),
            )
        };
        Ok(Outcome::error(
            status,
            delegate.error_string(),
            ErrorCategory::GenericError,
        ))
    }

    /// Terminal step. Consumes the job, so it can only happen once.
    fn done(mut self, outcome: Outcome) -> JobReport {
        self.item.status = outcome.status;
        self.item.error_string = outcome.message.clone();
        if outcome.status == ItemStatus::Success {
            info!(file = %self.item.file, "remote delete done");
        } else {
            warn!(
                file = %self.item.file,
                status = ?outcome.status,
                message = %outcome.message,
                "remote delete failed"
            );
        }
        self.ctx.notify(JobEvent::Finished {
            id: self.id,
            status: outcome.status,
        });
        JobReport {
            id: self.id,
            item: self.item,
            outcome,
        }
    }
}

#[cfg(test)]
#[path = "remote_delete_tests.rs"]
mod tests;
