use std::sync::atomic::{AtomicBool, Ordering};

use davsync_core::TransportError;

use super::item::{ErrorCategory, ItemStatus};

const MAINTENANCE_MARKER: &str = r">Sabre\DAV\Exception\ServiceUnavailable<";

/// Maps a failed request to the severity of the item's failure. May flag
/// that another sync pass is needed; the flag is advisory for the scheduler.
pub fn classify(
    error: TransportError,
    http_status: u16,
    body: &str,
    another_sync_needed: &AtomicBool,
) -> ItemStatus {
    if error == TransportError::RemoteHostClosed {
        // Servers drop the connection on single files now and then.
        another_sync_needed.store(true, Ordering::Relaxed);
        return ItemStatus::NormalError;
    }

    if error.is_network_level() {
        return ItemStatus::FatalError;
    }

    match http_status {
        503 if body.contains(MAINTENANCE_MARKER) => ItemStatus::FatalError,
        503 => ItemStatus::NormalError,
        // etag changed under us
        412 => ItemStatus::SoftError,
        423 => {
            another_sync_needed.store(true, Ordering::Relaxed);
            ItemStatus::FileLocked
        }
        _ => ItemStatus::NormalError,
    }
}

impl ErrorCategory {
    pub fn from_transport(error: TransportError) -> Self {
        if error == TransportError::None {
            ErrorCategory::NoError
        } else if error.is_network_level() {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::GenericError
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_fatal() {
        let flag = AtomicBool::new(false);
        assert_eq!(
            classify(TransportError::ConnectionRefused, 0, "", &flag),
            ItemStatus::FatalError
        );
        assert_eq!(
            classify(TransportError::Timeout, 0, "", &flag),
            ItemStatus::FatalError
        );
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn closed_connection_requests_another_sync() {
        let flag = AtomicBool::new(false);
        assert_eq!(
            classify(TransportError::RemoteHostClosed, 0, "", &flag),
            ItemStatus::NormalError
        );
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn maintenance_mode_is_fatal_other_503_is_not() {
        let flag = AtomicBool::new(false);
        let body = r"<s:exception>Sabre\DAV\Exception\ServiceUnavailable</s:exception>";
        assert_eq!(
            classify(TransportError::ServiceUnavailable, 503, body, &flag),
            ItemStatus::FatalError
        );
        assert_eq!(
            classify(TransportError::ServiceUnavailable, 503, "busy", &flag),
            ItemStatus::NormalError
        );
    }

    #[test]
    fn precondition_failed_is_soft() {
        let flag = AtomicBool::new(false);
        assert_eq!(
            classify(TransportError::UnknownContent, 412, "", &flag),
            ItemStatus::SoftError
        );
    }

    #[test]
    fn locked_resource_requests_another_sync() {
        let flag = AtomicBool::new(false);
        assert_eq!(
            classify(TransportError::UnknownContent, 423, "", &flag),
            ItemStatus::FileLocked
        );
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn other_http_errors_are_normal() {
        let flag = AtomicBool::new(false);
        assert_eq!(
            classify(TransportError::ContentAccessDenied, 403, "", &flag),
            ItemStatus::NormalError
        );
        assert_eq!(
            ErrorCategory::from_transport(TransportError::ContentAccessDenied),
            ErrorCategory::GenericError
        );
        assert_eq!(
            ErrorCategory::from_transport(TransportError::HostNotFound),
            ErrorCategory::NetworkError
        );
    }
}
