use std::collections::{BTreeMap, HashMap};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::host::DownloadId;
use crate::message::DownloadOptions;
use crate::state::{DownloadTask, TaskId, TaskState};

/// A direct download waiting for its rename event.
pub struct PendingDownload {
    pub task: TaskId,
    pub done: oneshot::Sender<()>,
}

/// In-flight tasks plus the download-id → task correlation table.
///
/// Task ids grow monotonically, so iteration follows insertion order.
/// Completed tasks are dropped and their ids are never reused.
#[derive(Default)]
pub struct TaskRegistry {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, DownloadTask>,
    pending: HashMap<DownloadId, PendingDownload>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, images: Vec<String>, options: DownloadOptions) -> TaskId {
        self.next_id += 1;
        let id = self.next_id;
        self.tasks.insert(id, DownloadTask::new(id, images, options));
        debug!(task = id, active = self.tasks.len(), "Task registered");
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&DownloadTask> {
        self.tasks.get(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Advances a task and retires it once every image has been processed.
    pub fn advance(&mut self, id: TaskId) -> Result<TaskState> {
        let task = self.tasks.get_mut(&id).ok_or(Error::UnknownTask(id))?;
        let state = task.advance()?;
        if state == TaskState::Complete {
            self.tasks.remove(&id);
            debug!(task = id, active = self.tasks.len(), "Task retired");
        }
        Ok(state)
    }

    /// Records that download `download` belongs to `task`. The receiver fires
    /// once the download's rename event has been answered.
    pub fn track(&mut self, download: DownloadId, task: TaskId) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        if let Some(stale) = self.pending.insert(download, PendingDownload { task, done }) {
            // Dropping the old sender tells its waiter the rename will never come.
            warn!(download, task = stale.task, "Download id reused before its rename event");
        }
        rx
    }

    pub fn take_pending(&mut self, download: DownloadId) -> Option<PendingDownload> {
        self.pending.remove(&download)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://a.test/{i}.jpg")).collect()
    }

    #[test]
    fn task_is_removed_after_last_advance() {
        let mut registry = TaskRegistry::new();
        let id = registry.insert(images(2), DownloadOptions::default());
        assert!(registry.contains(id));

        assert_eq!(registry.advance(id).unwrap(), TaskState::Active);
        assert!(registry.contains(id));
        assert_eq!(registry.advance(id).unwrap(), TaskState::Complete);
        assert!(!registry.contains(id));
        assert!(registry.is_empty());

        assert!(matches!(registry.advance(id), Err(Error::UnknownTask(i)) if i == id));
    }

    #[test]
    fn ids_are_not_reused() {
        let mut registry = TaskRegistry::new();
        let first = registry.insert(images(1), DownloadOptions::default());
        registry.advance(first).unwrap();
        let second = registry.insert(images(1), DownloadOptions::default());
        assert_ne!(first, second);
    }

    #[test]
    fn concurrent_tasks_are_tracked_independently() {
        let mut registry = TaskRegistry::new();
        let a = registry.insert(images(3), DownloadOptions::default());
        let b = registry.insert(images(1), DownloadOptions::default());
        assert_eq!(registry.len(), 2);

        registry.advance(b).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(a).unwrap().processed(), 0);
    }

    #[tokio::test]
    async fn pending_download_round_trip() {
        let mut registry = TaskRegistry::new();
        let task = registry.insert(images(1), DownloadOptions::default());
        let rx = registry.track(42, task);
        assert_eq!(registry.pending_len(), 1);

        assert!(registry.take_pending(41).is_none());
        let pending = registry.take_pending(42).unwrap();
        assert_eq!(pending.task, task);
        pending.done.send(()).unwrap();
        rx.await.unwrap();
        assert_eq!(registry.pending_len(), 0);
    }

    #[tokio::test]
    async fn reused_download_id_releases_the_old_waiter() {
        let mut registry = TaskRegistry::new();
        let a = registry.insert(images(1), DownloadOptions::default());
        let b = registry.insert(images(1), DownloadOptions::default());

        let first = registry.track(5, a);
        let _second = registry.track(5, b);
        assert!(first.await.is_err());
        assert_eq!(registry.pending_len(), 1);
        assert_eq!(registry.take_pending(5).unwrap().task, b);
    }
}
