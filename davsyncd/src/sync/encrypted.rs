use davsync_core::TransportError;
use tracing::{info, warn};

use super::item::SyncItem;
use super::journal::SyncJournal;
use super::paths::{full_remote_path, parent_path};
use super::propagator::PropagateContext;
use super::remote_delete::unexpected_status_message;
use super::transport::DeleteTransport;

/// Deletion of an end-to-end encrypted item, picked once from the item's
/// encryption metadata. Each variant finishes exactly once with a success
/// flag and keeps the last error for the caller.
#[derive(Debug)]
pub enum EncryptedDelete {
    /// File or folder whose server-side name is the mangled one.
    File(EncryptedFileDelete),
    /// Encryption-enabled top folder: no mangled name, nested records go too.
    RootFolder(EncryptedRootFolderDelete),
}

impl EncryptedDelete {
    pub fn for_item(item: &SyncItem) -> Option<Self> {
        match item
            .encrypted_file_name
            .as_deref()
            .filter(|name| !name.is_empty())
        {
            Some(name) => Some(Self::File(EncryptedFileDelete::new(name))),
            None if item.encrypted => Some(Self::RootFolder(EncryptedRootFolderDelete::default())),
            None => None,
        }
    }

    pub async fn start<T, J>(&mut self, ctx: &PropagateContext<T, J>, item: &SyncItem) -> bool
    where
        T: DeleteTransport,
        J: SyncJournal,
    {
        match self {
            EncryptedDelete::File(delete) => delete.start(ctx, item).await,
            EncryptedDelete::RootFolder(delete) => delete.start(ctx, item).await,
        }
    }

    pub fn network_error(&self) -> TransportError {
        self.report().network_error
    }

    pub fn error_string(&self) -> &str {
        &self.report().error_string
    }

    pub fn http_status(&self) -> u16 {
        self.report().http_status
    }

    fn report(&self) -> &DelegateReport {
        match self {
            EncryptedDelete::File(delete) => &delete.report,
            EncryptedDelete::RootFolder(delete) => &delete.report,
        }
    }
}

#[derive(Debug)]
pub struct EncryptedFileDelete {
    encrypted_name: String,
    report: DelegateReport,
}

impl EncryptedFileDelete {
    fn new(encrypted_name: &str) -> Self {
        Self {
            encrypted_name: encrypted_name.to_string(),
            report: DelegateReport::default(),
        }
    }

    async fn start<T, J>(&mut self, ctx: &PropagateContext<T, J>, item: &SyncItem) -> bool
    where
        T: DeleteTransport,
        J: SyncJournal,
    {
        let parent = parent_path(&item.file);
        let mangled = if parent.is_empty() {
            self.encrypted_name.clone()
        } else {
            format!("{parent}/{}", self.encrypted_name)
        };
        info!(file = %item.file, remote = %mangled, "deleting encrypted item");
        self.report
            .delete_then_forget(ctx, item, &mangled, item.is_directory(), "Remote Remove (encrypted)")
            .await
    }
}

#[derive(Debug, Default)]
pub struct EncryptedRootFolderDelete {
    report: DelegateReport,
}

impl EncryptedRootFolderDelete {
    async fn start<T, J>(&mut self, ctx: &PropagateContext<T, J>, item: &SyncItem) -> bool
    where
        T: DeleteTransport,
        J: SyncJournal,
    {
        info!(folder = %item.file, "deleting encrypted root folder");
        self.report
            .delete_then_forget(ctx, item, &item.file, true, "Remote Remove (encrypted folder)")
            .await
    }
}

#[derive(Debug)]
struct DelegateReport {
    network_error: TransportError,
    error_string: String,
    http_status: u16,
}

impl Default for DelegateReport {
    fn default() -> Self {
        Self {
            network_error: TransportError::None,
            error_string: String::new(),
            http_status: 0,
        }
    }
}

impl DelegateReport {
    async fn delete_then_forget<T, J>(
        &mut self,
        ctx: &PropagateContext<T, J>,
        item: &SyncItem,
        remote_name: &str,
        recursive: bool,
        label: &str,
    ) -> bool
    where
        T: DeleteTransport,
        J: SyncJournal,
    {
        let path = match full_remote_path(&ctx.options.remote_root, remote_name) {
            Ok(path) => path,
            Err(err) => {
                self.network_error = TransportError::ProtocolFailure;
                self.error_string = err.to_string();
                return false;
            }
        };

        let reply = ctx.transport.delete(ctx.delete_request(item, path)).await;
        self.http_status = reply.status;
        if !reply.error.is_success_or_not_found() {
            self.network_error = reply.error;
            self.error_string = reply.error_message;
            return false;
        }
        if reply.status != 204 && reply.status != 404 {
            self.error_string = unexpected_status_message(reply.status, &reply.reason);
            return false;
        }

        if let Err(err) = ctx
            .journal
            .delete_file_record(&item.original_file, recursive)
            .await
        {
            warn!(file = %item.original_file, %err, "could not delete file from local DB");
            self.error_string = format!(
                "Could not delete file record {} from local DB",
                item.original_file
            );
            return false;
        }
        if let Err(err) = ctx.journal.commit(label).await {
            self.error_string = format!("Could not commit local DB: {err}");
            return false;
        }
        true
    }
}
