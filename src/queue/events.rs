//! Queue event payloads broadcast to the view layer

use super::types::{BatchResult, EntryId, UploadStatus};
use log::warn;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    EntryAdded {
        entry_id: EntryId,
    },
    Progress {
        entry_id: EntryId,
        percent: u8,
        transferred_bytes: u64,
        total_bytes: u64,
    },
    StatusChanged {
        entry_id: EntryId,
        status: UploadStatus,
        error: Option<String>,
    },
    EntryRemoved {
        entry_id: EntryId,
    },
    QueueCleared,
    BatchFinished {
        succeeded: usize,
        total: usize,
    },
    /// Transient toast, hidden by the view after `dismiss_after_ms`
    Notice {
        message: String,
        dismiss_after_ms: u64,
    },
}

/// Toast text for a finished batch
pub fn upload_notice(succeeded: usize) -> String {
    format!(
        "Uploaded {} file{}.",
        succeeded,
        if succeeded == 1 { "" } else { "s" }
    )
}

/// Hand every event to `on_event` until a batch finishes, returning its
/// summary. A receiver that falls behind skips what it missed and keeps
/// listening; `None` means the queue went away first.
pub async fn follow_batch<F>(events: &mut Receiver<QueueEvent>, mut on_event: F) -> Option<BatchResult>
where
    F: FnMut(&QueueEvent),
{
    loop {
        match events.recv().await {
            Ok(event) => {
                on_event(&event);
                if let QueueEvent::BatchFinished { succeeded, total } = event {
                    return Some(BatchResult { succeeded, total });
                }
            }
            Err(RecvError::Lagged(missed)) => warn!("events_lagged: skipped {} events", missed),
            Err(RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{upload_notice, QueueEvent};
    use crate::queue::types::{EntryId, UploadStatus};

    #[test]
    fn notice_pluralizes() {
        assert_eq!(upload_notice(1), "Uploaded 1 file.");
        assert_eq!(upload_notice(3), "Uploaded 3 files.");
    }

    #[test]
    fn events_serialize_with_tag() {
        let id = EntryId::new();
        let json = serde_json::to_value(QueueEvent::StatusChanged {
            entry_id: id,
            status: UploadStatus::Error,
            error: Some("denied".to_string()),
        })
        .unwrap();

        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["entry_id"], id.to_string());
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "denied");

        let cleared = serde_json::to_value(QueueEvent::QueueCleared).unwrap();
        assert_eq!(cleared["event"], "queue_cleared");
    }
}
