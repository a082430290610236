// Persistence collaborators: the remote list mirror and the add-history log.

use async_trait::async_trait;

use crate::shopping::{HistoryRecord, ListEntry, MirrorOp};

/// Key-value mirror of the current list. Read authoritatively only at
/// startup; afterwards it receives best-effort writes.
#[async_trait]
pub trait RemoteListStore: Send + Sync {
    async fn set(&self, key: &str, entry: &ListEntry) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn list_all(&self) -> anyhow::Result<Vec<ListEntry>>;
}

/// Append-only log of every successful add.
#[async_trait]
pub trait HistoryMirror: Send + Sync {
    async fn append(&self, record: &HistoryRecord) -> anyhow::Result<()>;
    /// All records, oldest first.
    async fn list_all(&self) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// Apply one reconciler mirror operation to `store`.
pub async fn apply_mirror_op(store: &dyn RemoteListStore, op: &MirrorOp) -> anyhow::Result<()> {
    match op {
        MirrorOp::Set { key, entry } => store.set(key, entry).await,
        MirrorOp::Delete { key } => store.delete(key).await,
    }
}
