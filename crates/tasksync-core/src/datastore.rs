use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tasksync_shared::{Fields, RawDocument, UserProfile};
use tempfile::NamedTempFile;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    CancelHandle, DocumentStore, IdentityProvider, ObjectStore, OwnerQuery, Snapshot,
    SnapshotStream, TransferCancelled, UploadProgress, UploadRequest,
};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// File-backed stand-in for the hosted backend: a JSON-lines document
/// collection with live subscriptions, an object directory, and a persisted
/// sign-in session.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub documents_path: PathBuf,
    pub session_path: PathBuf,
    pub objects_dir: PathBuf,
    subscribers: Mutex<Vec<Subscriber>>,
    last_seen: Mutex<Vec<StoredDocument>>,
    identity: watch::Sender<Option<UserProfile>>,
}

#[derive(Debug)]
struct Subscriber {
    query: OwnerQuery,
    tx: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StoredDocument {
    collection: String,
    id: String,
    #[serde(default)]
    fields: Fields,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let documents_path = data_dir.join("tasks.data");
        let session_path = data_dir.join("session.json");
        let objects_dir = data_dir.join("objects");

        if !documents_path.exists() {
            fs::write(&documents_path, "")?;
        }
        fs::create_dir_all(&objects_dir)
            .with_context(|| format!("failed to create {}", objects_dir.display()))?;

        let session = load_session(&session_path)?;
        let documents = load_jsonl(&documents_path)?;

        info!(
            data_dir = %data_dir.display(),
            documents = %documents_path.display(),
            objects = %objects_dir.display(),
            signed_in = session.is_some(),
            "opened datastore"
        );

        let (identity, _) = watch::channel(session);
        Ok(Self {
            data_dir,
            documents_path,
            session_path,
            objects_dir,
            subscribers: Mutex::new(Vec::new()),
            last_seen: Mutex::new(documents),
            identity,
        })
    }

    #[tracing::instrument(skip(self, profile), fields(uid = %profile.uid))]
    pub fn sign_in(&self, profile: UserProfile) -> anyhow::Result<()> {
        let serialized = serde_json::to_string_pretty(&profile)?;
        fs::write(&self.session_path, serialized)
            .with_context(|| format!("failed writing {}", self.session_path.display()))?;
        self.identity.send_replace(Some(profile));
        info!("signed in");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn sign_out(&self) -> anyhow::Result<()> {
        if self.session_path.exists() {
            fs::remove_file(&self.session_path)
                .with_context(|| format!("failed removing {}", self.session_path.display()))?;
        }
        self.identity.send_replace(None);
        info!("signed out");
        Ok(())
    }

    /// Re-reads the collection file and publishes to subscribers when another
    /// process changed it.
    #[tracing::instrument(skip(self))]
    pub fn refresh(&self) -> anyhow::Result<bool> {
        let documents = load_jsonl(&self.documents_path)?;
        let changed = {
            let mut last = self.last_seen.lock();
            if *last == documents {
                false
            } else {
                *last = documents.clone();
                true
            }
        };
        if changed {
            debug!("collection changed on disk");
            self.publish(&documents);
        }
        Ok(changed)
    }

    /// Re-reads `session.json` so a sign-in or sign-out made by another
    /// process reaches identity watchers.
    #[tracing::instrument(skip(self))]
    pub fn refresh_session(&self) -> anyhow::Result<bool> {
        let session = load_session(&self.session_path)?;
        let changed = self.identity.send_if_modified(|current| {
            if *current == session {
                false
            } else {
                *current = session;
                true
            }
        });
        if changed {
            info!(signed_in = self.identity.borrow().is_some(), "session changed on disk");
        }
        Ok(changed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Resolves an object path under `objects/`. Only plain relative
    /// segments are accepted.
    fn object_target(&self, path: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(path);
        let mut components = relative.components().peekable();
        let plain = components.peek().is_some()
            && components.all(|component| matches!(component, Component::Normal(_)));
        if !plain {
            return Err(anyhow!("invalid object path: {path}"));
        }
        Ok(self.objects_dir.join(relative))
    }

    fn load(&self) -> anyhow::Result<Vec<StoredDocument>> {
        load_jsonl(&self.documents_path).context("failed to load tasks.data")
    }

    fn commit(&self, documents: Vec<StoredDocument>) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.documents_path, &documents).context("failed to save tasks.data")?;
        *self.last_seen.lock() = documents.clone();
        self.publish(&documents);
        Ok(())
    }

    fn publish(&self, documents: &[StoredDocument]) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|sub| sub.tx.send(snapshot_for(&sub.query, documents)).is_ok());
        debug!(
            delivered = subscribers.len(),
            pruned = before - subscribers.len(),
            "published snapshot"
        );
    }
}

impl IdentityProvider for DataStore {
    fn current_user(&self) -> Option<UserProfile> {
        self.identity.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<UserProfile>> {
        self.identity.subscribe()
    }
}

impl DocumentStore for DataStore {
    #[tracing::instrument(skip(self), fields(owner = %query.owner))]
    async fn subscribe(&self, query: &OwnerQuery) -> anyhow::Result<SnapshotStream> {
        let documents = self.load()?;
        let (tx, stream) = SnapshotStream::channel();
        tx.send(snapshot_for(query, &documents))
            .map_err(|_| anyhow!("subscriber closed before first snapshot"))?;
        self.subscribers.lock().push(Subscriber {
            query: query.clone(),
            tx,
        });
        debug!("subscriber registered");
        Ok(stream)
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<RawDocument>> {
        let documents = self.load()?;
        Ok(documents
            .into_iter()
            .find(|doc| doc.collection == collection && doc.id == id)
            .map(|doc| RawDocument::new(doc.id, doc.fields)))
    }

    #[tracing::instrument(skip(self, fields))]
    async fn add(&self, collection: &str, fields: Fields) -> anyhow::Result<String> {
        let mut documents = self.load()?;
        let id = Uuid::new_v4().simple().to_string();
        documents.push(StoredDocument {
            collection: collection.to_string(),
            id: id.clone(),
            fields,
        });
        self.commit(documents)?;
        debug!(id = %id, "document added");
        Ok(id)
    }

    #[tracing::instrument(skip(self, fields))]
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> anyhow::Result<()> {
        let mut documents = self.load()?;
        let doc = documents
            .iter_mut()
            .find(|doc| doc.collection == collection && doc.id == id)
            .ok_or_else(|| anyhow!("document not found: {collection}/{id}"))?;
        for (key, value) in fields {
            doc.fields.insert(key, value);
        }
        self.commit(documents)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<()> {
        let mut documents = self.load()?;
        let before = documents.len();
        documents.retain(|doc| !(doc.collection == collection && doc.id == id));
        if documents.len() == before {
            warn!("delete of missing document");
        }
        self.commit(documents)
    }
}

impl ObjectStore for DataStore {
    #[tracing::instrument(skip(self, request, progress, cancel), fields(path = %request.path, size = request.bytes.len()))]
    async fn upload(
        &self,
        request: UploadRequest,
        progress: &watch::Sender<UploadProgress>,
        cancel: &CancelHandle,
    ) -> anyhow::Result<String> {
        let target = self.object_target(&request.path)?;
        let dir = target
            .parent()
            .ok_or_else(|| anyhow!("invalid object path: {}", request.path))?;
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let total = request.bytes.len() as u64;
        let mut temp = NamedTempFile::new_in(dir)?;
        let mut sent = 0u64;
        progress.send_replace(UploadProgress {
            bytes_transferred: 0,
            total_bytes: total,
        });

        for chunk in request.bytes.chunks(UPLOAD_CHUNK_BYTES) {
            if cancel.is_cancelled() {
                info!(sent, total, "upload cancelled; discarding partial object");
                return Err(TransferCancelled.into());
            }
            temp.write_all(chunk)?;
            sent += chunk.len() as u64;
            progress.send_replace(UploadProgress {
                bytes_transferred: sent,
                total_bytes: total,
            });
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Err(TransferCancelled.into());
        }

        temp.flush()?;
        temp.persist(&target)
            .map_err(|err| anyhow!("failed to persist {}: {}", target.display(), err))?;

        let absolute = target.canonicalize().unwrap_or(target);
        Ok(format!("file://{}", absolute.display()))
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        let target = self.object_target(path)?;
        match fs::remove_file(&target) {
            Ok(()) => {
                debug!("object removed");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!("remove of missing object");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("failed removing {}", target.display())),
        }
    }
}

fn snapshot_for(query: &OwnerQuery, documents: &[StoredDocument]) -> Snapshot {
    documents
        .iter()
        .filter(|doc| doc.collection == query.collection)
        .map(|doc| RawDocument::new(doc.id.clone(), doc.fields.clone()))
        .filter(|doc| query.matches(doc))
        .collect()
}

fn load_session(path: &Path) -> anyhow::Result<Option<UserProfile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let profile = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing session {}", path.display()))?;
    Ok(Some(profile))
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<StoredDocument>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let doc: StoredDocument = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(doc);
    }

    debug!(count = out.len(), "loaded documents from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, documents))]
fn save_jsonl_atomic(path: &Path, documents: &[StoredDocument]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = documents.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for doc in documents {
        let serialized = serde_json::to_string(doc)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tasksync_shared::{Fields, UserProfile};
    use tempfile::tempdir;
    use tokio::sync::watch;

    use super::DataStore;
    use crate::backend::{
        CancelHandle, DocumentStore, IdentityProvider, ObjectStore, OwnerQuery, TransferCancelled,
        UploadProgress, UploadRequest,
    };

    fn owned_by(owner: &str, title: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("userId".into(), json!(owner));
        fields.insert("title".into(), json!(title));
        fields
    }

    #[tokio::test]
    async fn subscription_sees_initial_and_later_snapshots() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        store.add("tasks", owned_by("me", "first")).await.expect("add");
        store.add("tasks", owned_by("other", "theirs")).await.expect("add");

        let mut stream = store
            .subscribe(&OwnerQuery::tasks_of("me"))
            .await
            .expect("subscribe");
        let initial = stream.next().await.expect("initial snapshot");
        assert_eq!(initial.len(), 1);

        let id = store.add("tasks", owned_by("me", "second")).await.expect("add");
        let pushed = stream.next().await.expect("pushed snapshot");
        assert_eq!(pushed.len(), 2);

        store.delete("tasks", &id).await.expect("delete");
        assert_eq!(stream.next().await.expect("after delete").len(), 1);
    }

    #[tokio::test]
    async fn cancelled_subscriber_is_pruned_on_next_publish() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut stream = store
            .subscribe(&OwnerQuery::tasks_of("me"))
            .await
            .expect("subscribe");
        assert_eq!(store.subscriber_count(), 1);

        stream.cancel();
        store.add("tasks", owned_by("me", "x")).await.expect("add");
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn update_merges_fields_and_persists() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let id = store.add("tasks", owned_by("me", "old")).await.expect("add");

        let mut patch = Fields::new();
        patch.insert("title".into(), json!("new"));
        store.update("tasks", &id, patch).await.expect("update");

        let reopened = DataStore::open(temp.path()).expect("reopen");
        let doc = reopened.get("tasks", &id).await.expect("get").expect("present");
        assert_eq!(doc.str_field("title"), Some("new"));
        assert_eq!(doc.str_field("userId"), Some("me"));
    }

    #[tokio::test]
    async fn session_survives_reopen_and_notifies_watchers() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut rx = store.watch();
        assert!(store.current_user().is_none());

        store.sign_in(UserProfile::new("u1")).expect("sign in");
        assert!(rx.has_changed().expect("watch open"));
        assert_eq!(rx.borrow_and_update().as_ref().map(|p| p.uid.as_str()), Some("u1"));

        let reopened = DataStore::open(temp.path()).expect("reopen");
        assert_eq!(reopened.current_user().map(|p| p.uid), Some("u1".to_string()));

        reopened.sign_out().expect("sign out");
        assert!(reopened.current_user().is_none());
    }

    #[tokio::test]
    async fn upload_reports_progress_and_honours_cancel() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let (progress, rx) = watch::channel(UploadProgress::default());

        let url = store
            .upload(
                UploadRequest {
                    path: "tasks/me/notes.txt".to_string(),
                    bytes: vec![7u8; 150_000],
                },
                &progress,
                &CancelHandle::new(),
            )
            .await
            .expect("upload");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("notes.txt"));
        assert_eq!(rx.borrow().bytes_transferred, 150_000);

        let cancel = CancelHandle::new();
        cancel.cancel();
        let err = store
            .upload(
                UploadRequest {
                    path: "tasks/me/aborted.txt".to_string(),
                    bytes: vec![1u8; 10],
                },
                &progress,
                &cancel,
            )
            .await
            .expect_err("cancelled");
        assert!(err.is::<TransferCancelled>());
        assert!(!store.objects_dir.join("tasks/me/aborted.txt").exists());
    }

    #[tokio::test]
    async fn upload_rejects_paths_escaping_the_object_dir() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let (progress, _rx) = watch::channel(UploadProgress::default());

        for path in ["tasks/me/../../../escaped.txt", "/tmp/absolute.txt", "./tasks/x", ""] {
            let err = store
                .upload(
                    UploadRequest {
                        path: path.to_string(),
                        bytes: vec![1u8; 4],
                    },
                    &progress,
                    &CancelHandle::new(),
                )
                .await
                .expect_err(path);
            assert!(format!("{err:#}").contains("invalid object path"), "{path}: {err:#}");
        }
        assert!(!temp.path().join("escaped.txt").exists());
        assert!(store.remove("../tasks.data").await.is_err());
        assert!(store.documents_path.exists());
    }

    #[tokio::test]
    async fn remove_deletes_object_and_tolerates_missing() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let (progress, _rx) = watch::channel(UploadProgress::default());
        store
            .upload(
                UploadRequest {
                    path: "tasks/me/a.txt".to_string(),
                    bytes: vec![2u8; 8],
                },
                &progress,
                &CancelHandle::new(),
            )
            .await
            .expect("upload");

        store.remove("tasks/me/a.txt").await.expect("remove");
        assert!(!store.objects_dir.join("tasks/me/a.txt").exists());
        store.remove("tasks/me/a.txt").await.expect("remove missing");
    }

    #[tokio::test]
    async fn sign_out_from_another_handle_reaches_watchers_on_refresh() {
        let temp = tempdir().expect("tempdir");
        let watcher = DataStore::open(temp.path()).expect("open datastore");
        let other = DataStore::open(temp.path()).expect("open second handle");
        other.sign_in(UserProfile::new("u1")).expect("sign in");

        let mut rx = watcher.watch();
        assert!(watcher.current_user().is_none());
        assert!(watcher.refresh_session().expect("refresh"));
        assert!(rx.has_changed().expect("watch open"));
        assert_eq!(rx.borrow_and_update().as_ref().map(|p| p.uid.as_str()), Some("u1"));
        assert!(!watcher.refresh_session().expect("refresh unchanged"));

        other.sign_out().expect("sign out");
        assert!(watcher.refresh_session().expect("refresh"));
        assert!(rx.has_changed().expect("watch open"));
        assert!(rx.borrow_and_update().is_none());
        assert!(watcher.current_user().is_none());
    }
}
