// Task registry - shared store of task records
//
// One worker writes a record, any number of pollers read it. Writers go
// through `update` so a group of field changes lands under a single lock;
// readers get cloned snapshots.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;

use super::model::{Task, TaskEvent};
use crate::downloader::errors::DownloadError;

pub trait TaskRegistry: Send + Sync {
    fn create(&self, task: Task) -> Result<(), DownloadError>;

    fn get(&self, id: &str) -> Option<Task>;

    /// Run `f` against the record under the write lock, returning the updated snapshot
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Task)) -> Result<Task, DownloadError>;

    fn delete(&self, id: &str) -> Option<Task>;

    /// Snapshot of every record, oldest first
    fn list(&self) -> Vec<Task>;

    /// Remove records created before `cutoff`, returning their ids
    fn remove_created_before(&self, cutoff: OffsetDateTime) -> Vec<String>;

    /// Apply a state machine event; returns whether the record changed
    fn apply(&self, id: &str, event: TaskEvent) -> Result<bool, DownloadError> {
        let mut event = Some(event);
        let mut changed = false;
        self.update(id, &mut |task| {
            if let Some(event) = event.take() {
                changed = task.apply(event);
            }
        })?;
        Ok(changed)
    }
}

#[derive(Default)]
pub struct InMemoryTaskRegistry {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning only means a panic in another holder; keep serving the map
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Task>> {
        self.tasks.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Task>> {
        self.tasks.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskRegistry for InMemoryTaskRegistry {
    fn create(&self, task: Task) -> Result<(), DownloadError> {
        let mut tasks = self.write();
        if tasks.contains_key(&task.id) {
            return Err(DownloadError::InvalidRequest(format!("duplicate task id {}", task.id)));
        }
        tasks.insert(task.id.clone(), task);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Task> {
        self.read().get(id).cloned()
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Task)) -> Result<Task, DownloadError> {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| DownloadError::TaskNotFound(id.to_string()))?;
        f(task);
        Ok(task.clone())
    }

    fn delete(&self, id: &str) -> Option<Task> {
        self.write().remove(id)
    }

    fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    fn remove_created_before(&self, cutoff: OffsetDateTime) -> Vec<String> {
        let mut tasks = self.write();
        let expired: Vec<String> = tasks
            .values()
            .filter(|t| t.created_at < cutoff)
            .map(|t| t.id.clone())
            .collect();
        for id in &expired {
            tasks.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::{MediaKind, QualityHint};
    use crate::downloader::youtube_url::VideoId;
    use crate::tasks::model::TaskStatus;
    use std::sync::Arc;
    use time::Duration;

    fn task(id: &str) -> Task {
        Task::new(id, &VideoId::parse("ABC123").unwrap(), MediaKind::Video, QualityHint::Best)
    }

    #[test]
    fn test_create_get_delete() {
        let registry = InMemoryTaskRegistry::new();
        registry.create(task("a")).unwrap();
        assert!(registry.create(task("a")).is_err());

        assert_eq!(registry.get("a").unwrap().status, TaskStatus::Preparing);
        assert!(registry.get("missing").is_none());

        assert!(registry.delete("a").is_some());
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_update_unknown_task() {
        let registry = InMemoryTaskRegistry::new();
        let err = registry.update("nope", &mut |_| {}).unwrap_err();
        assert!(matches!(err, DownloadError::TaskNotFound(_)));
    }

    #[test]
    fn test_apply_event_through_registry() {
        let registry = InMemoryTaskRegistry::new();
        registry.create(task("a")).unwrap();

        let changed = registry
            .apply(
                "a",
                TaskEvent::Resolved {
                    title: "t".to_string(),
                    uploader: "u".to_string(),
                    backend: "b".to_string(),
                },
            )
            .unwrap();

        assert!(changed);
        assert_eq!(registry.get("a").unwrap().status, TaskStatus::Downloading);
    }

    #[test]
    fn test_remove_created_before() {
        let registry = InMemoryTaskRegistry::new();
        let mut old = task("old");
        old.created_at -= Duration::hours(48);
        registry.create(old).unwrap();
        registry.create(task("new")).unwrap();

        let removed = registry.remove_created_before(OffsetDateTime::now_utc() - Duration::hours(24));
        assert_eq!(removed, vec!["old".to_string()]);
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_whole_updates() {
        let registry = Arc::new(InMemoryTaskRegistry::new());
        registry.create(task("a")).unwrap();

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    registry
                        .update("a", &mut |t| {
                            t.title = format!("title-{}", i);
                            t.uploader = format!("uploader-{}", i);
                        })
                        .unwrap();
                }
            })
        };

        for _ in 0..200 {
            let snapshot = registry.get("a").unwrap();
            let title_n = snapshot.title.strip_prefix("title-").unwrap_or("");
            let uploader_n = snapshot.uploader.strip_prefix("uploader-").unwrap_or("");
            assert_eq!(title_n, uploader_n);
        }
        writer.join().unwrap();
    }
}
