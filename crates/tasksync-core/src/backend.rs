//! Seams to the hosted collaborators: identity, document database and
//! object storage. The core only ever talks to these traits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tasksync_shared::{Fields, RawDocument, TASKS_COLLECTION, UserProfile};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub type Snapshot = Vec<RawDocument>;

/// Query for every document in `collection` whose `userId` equals `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerQuery {
    pub collection: String,
    pub owner: String,
}

impl OwnerQuery {
    pub fn tasks_of(owner: impl Into<String>) -> Self {
        Self {
            collection: TASKS_COLLECTION.to_string(),
            owner: owner.into(),
        }
    }

    pub fn matches(&self, doc: &RawDocument) -> bool {
        doc.str_field(crate::record::FIELD_USER_ID) == Some(self.owner.as_str())
    }
}

/// Lazy, unbounded, non-restartable sequence of full-collection snapshots.
/// Once cancelled (or dropped) it never yields again, and the publisher
/// drops the subscriber on its next push.
#[derive(Debug)]
pub struct SnapshotStream {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    cancelled: bool,
}

impl SnapshotStream {
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self {
            rx,
            cancelled: false,
        }
    }

    /// Creates a connected publisher/stream pair.
    pub fn channel() -> (mpsc::UnboundedSender<Snapshot>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Snapshot> {
        if self.cancelled {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.bytes_transferred as f64 / self.total_bytes as f64
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Returned (inside `anyhow::Error`) by object stores when a transfer is
/// aborted through its [`CancelHandle`].
#[derive(Debug, Error)]
#[error("transfer cancelled")]
pub struct TransferCancelled;

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: String,
    pub bytes: Vec<u8>,
}

pub fn object_path(owner: &str, file_name: &str) -> String {
    format!("{TASKS_COLLECTION}/{owner}/{file_name}")
}

pub trait IdentityProvider {
    fn current_user(&self) -> Option<UserProfile>;

    /// Pushes the signed-in profile (or `None`) on every sign-in/out.
    fn watch(&self) -> watch::Receiver<Option<UserProfile>>;
}

#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    async fn subscribe(&self, query: &OwnerQuery) -> anyhow::Result<SnapshotStream>;

    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<RawDocument>>;

    async fn add(&self, collection: &str, fields: Fields) -> anyhow::Result<String>;

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> anyhow::Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait ObjectStore {
    /// Uploads `request.bytes`, reporting progress, and returns a durable
    /// download URL. A cancelled transfer leaves no object behind.
    async fn upload(
        &self,
        request: UploadRequest,
        progress: &watch::Sender<UploadProgress>,
        cancel: &CancelHandle,
    ) -> anyhow::Result<String>;

    /// Removes an uploaded object. A missing object is not an error.
    async fn remove(&self, path: &str) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use tasksync_shared::RawDocument;

    use super::{OwnerQuery, SnapshotStream, UploadProgress, object_path};

    #[tokio::test]
    async fn cancelled_stream_stops_yielding() {
        let (tx, mut stream) = SnapshotStream::channel();
        tx.send(vec![]).expect("send first");
        assert_eq!(stream.next().await, Some(vec![]));

        tx.send(vec![RawDocument::new("a", Default::default())])
            .expect("send buffered");
        stream.cancel();
        assert!(stream.try_next().is_none());
        assert!(stream.next().await.is_none());
        assert!(tx.send(vec![]).is_err());
    }

    #[test]
    fn owner_query_matches_user_id() {
        let query = OwnerQuery::tasks_of("u1");
        let mut fields = tasksync_shared::Fields::new();
        fields.insert("userId".into(), serde_json::json!("u1"));
        assert!(query.matches(&RawDocument::new("a", fields)));
        assert!(!query.matches(&RawDocument::new("b", Default::default())));
        assert_eq!(query.collection, "tasks");
    }

    #[test]
    fn progress_and_paths() {
        let p = UploadProgress {
            bytes_transferred: 5,
            total_bytes: 10,
        };
        assert!((p.fraction() - 0.5).abs() < f64::EPSILON);
        assert_eq!(object_path("u1", "a.pdf"), "tasks/u1/a.pdf");
    }
}
