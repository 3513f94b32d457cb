//! The manager's task pool.
//!
//! One pool holds every dispatchable task, pending or in flight. Dispatch is
//! atomic with respect to report: a task picked by `pop_by_limit` leaves the
//! pool under the same lock that inspected it, and re-enters (as Dispatched)
//! only through `push_dispatched`. Selection is deterministic: priority
//! strictly dominates, then the oldest `update_time`, then the key.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use ospn_rcmgr::Limit;

use crate::task::Task;
use crate::types::TaskKey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue {0} exceeds capacity")]
    Full(String),
    #[error("task {0} already in queue")]
    Repeated(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Dispatched,
}

#[derive(Debug)]
struct Entry {
    task: Task,
    state: TaskState,
}

/// Keyed pool of dispatchable tasks with a capacity bound.
pub struct TaskQueue {
    name: String,
    cap: usize,
    entries: Mutex<HashMap<TaskKey, Entry>>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, cap: usize) -> TaskQueue {
        TaskQueue { name: name.into(), cap, entries: Mutex::new(HashMap::new()) }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Add a new pending task.
    pub fn push(&self, task: Task) -> Result<(), QueueError> {
        let mut map = self.entries.lock();
        if map.len() >= self.cap {
            return Err(QueueError::Full(self.name.clone()));
        }
        if map.contains_key(task.key()) {
            return Err(QueueError::Repeated(task.key().to_string()));
        }
        map.insert(task.key().clone(), Entry { task, state: TaskState::Pending });
        Ok(())
    }

    /// Re-insert a task the manager just dispatched. The key was removed by
    /// `pop_by_limit` moments earlier under the manager's call sequence, so
    /// capacity is not re-checked.
    pub fn push_dispatched(&self, task: Task) {
        let mut map = self.entries.lock();
        map.insert(task.key().clone(), Entry { task, state: TaskState::Dispatched });
    }

    /// Pick and remove the best dispatch candidate fitting `limit`.
    ///
    /// Candidates are pending tasks, plus dispatched tasks whose timeout
    /// expired with retry budget left (timeout surfaces through the retry
    /// counter). Returns `None` when nothing fits.
    pub fn pop_by_limit(&self, limit: &Limit, now: i64) -> Option<Task> {
        let mut map = self.entries.lock();
        let best_key = map
            .values()
            .filter(|e| match e.state {
                TaskState::Pending => true,
                TaskState::Dispatched => {
                    e.task.meta.expired(now) && e.task.meta.retry < e.task.meta.max_retry
                }
            })
            .filter(|e| limit.not_less_than(&e.task.meta.estimate_limit))
            .max_by(|a, b| {
                a.task
                    .meta
                    .priority
                    .cmp(&b.task.meta.priority)
                    .then(b.task.meta.update_time.cmp(&a.task.meta.update_time))
                    .then(b.task.meta.key.cmp(&a.task.meta.key))
            })
            .map(|e| e.task.meta.key.clone())?;
        map.remove(&best_key).map(|e| e.task)
    }

    /// Remove and return dispatched tasks that expired with no retry budget
    /// left. The manager reports these terminally.
    pub fn sweep_exhausted(&self, now: i64) -> Vec<Task> {
        let mut map = self.entries.lock();
        let dead: Vec<TaskKey> = map
            .iter()
            .filter(|(_, e)| {
                e.state == TaskState::Dispatched
                    && e.task.meta.expired(now)
                    && e.task.meta.retry >= e.task.meta.max_retry
            })
            .map(|(k, _)| k.clone())
            .collect();
        dead.into_iter().filter_map(|k| map.remove(&k).map(|e| e.task)).collect()
    }

    /// Remove by key, returning the task if present.
    pub fn pop_by_key(&self, key: &TaskKey) -> Option<Task> {
        self.entries.lock().remove(key).map(|e| e.task)
    }

    pub fn get(&self, key: &TaskKey) -> Option<Task> {
        self.entries.lock().get(key).map(|e| e.task.clone())
    }

    /// Exact-key lookup from a raw key string (RPC query path).
    pub fn get_by_str(&self, key: &str) -> Option<Task> {
        self.entries
            .lock()
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, e)| e.task.clone())
    }

    pub fn state_of(&self, key: &TaskKey) -> Option<TaskState> {
        self.entries.lock().get(key).map(|e| e.state)
    }

    /// Mutate a task in place; returns false when the key is absent.
    pub fn update<F: FnOnce(&mut Task)>(&self, key: &TaskKey, f: F) -> bool {
        let mut map = self.entries.lock();
        match map.get_mut(key) {
            Some(entry) => {
                f(&mut entry.task);
                true
            }
            None => false,
        }
    }

    /// Mark an in-flight task pending again (retry path after a failed
    /// report).
    pub fn requeue(&self, key: &TaskKey) -> bool {
        let mut map = self.entries.lock();
        match map.get_mut(key) {
            Some(entry) => {
                entry.state = TaskState::Pending;
                true
            }
            None => false,
        }
    }

    /// Info lines for every task whose key contains `sub_key`, sorted by key
    /// for stable output.
    pub fn query(&self, sub_key: &str) -> Vec<String> {
        let map = self.entries.lock();
        let mut hits: Vec<(&TaskKey, String)> = map
            .iter()
            .filter(|(k, _)| k.as_str().contains(sub_key))
            .map(|(k, e)| (k, e.task.info()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(b.0));
        hits.into_iter().map(|(_, info)| info).collect()
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("cap", &self.cap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ObjectInfo, StorageParams, TaskBody};
    use crate::types::{TaskType, DEFAULT_SMALLER_PRIORITY, MAX_TASK_PRIORITY};
    use ospn_common::config::TaskPolicyConfig;

    fn replicate_task(name: &str, now: i64) -> Task {
        let mut t = Task::new(
            TaskBody::ReplicatePiece {
                object: ObjectInfo {
                    id: 1,
                    bucket_name: "b".into(),
                    object_name: name.into(),
                    owner: "0x0".into(),
                    payload_size: 128,
                },
                params: StorageParams::default(),
                secondary_endpoints: vec![],
                confirmations: vec![],
            },
            now,
        );
        t.apply_policy(&TaskPolicyConfig::default());
        t
    }

    fn seal_task(name: &str, now: i64) -> Task {
        let mut t = Task::new(
            TaskBody::SealObject {
                object: ObjectInfo {
                    id: 2,
                    bucket_name: "b".into(),
                    object_name: name.into(),
                    owner: "0x0".into(),
                    payload_size: 128,
                },
                params: StorageParams::default(),
                secondary_endpoints: vec![],
                secondary_signatures: vec![],
            },
            now,
        );
        t.apply_policy(&TaskPolicyConfig::default());
        t
    }

    #[test]
    fn push_rejects_duplicates_and_overflow() {
        let q = TaskQueue::new("test", 1);
        let t = replicate_task("o1", 10);
        let dup = t.clone();
        q.push(t).expect("first push");
        assert!(matches!(q.push(dup), Err(QueueError::Repeated(_))));
        assert!(matches!(q.push(replicate_task("o2", 10)), Err(QueueError::Full(_))));
    }

    #[test]
    fn pop_prefers_higher_priority() {
        let q = TaskQueue::new("test", 16);
        let seal = seal_task("o1", 10);
        let repl = replicate_task("o2", 10);
        assert_eq!(seal.meta.priority, DEFAULT_SMALLER_PRIORITY);
        assert_eq!(repl.meta.priority, MAX_TASK_PRIORITY);
        let repl_key = repl.key().clone();
        q.push(seal).expect("push seal");
        q.push(repl).expect("push repl");
        let picked = q.pop_by_limit(&Limit::default_node(), 11).expect("pick");
        assert_eq!(picked.key(), &repl_key);
    }

    #[test]
    fn pop_breaks_priority_ties_by_oldest_update() {
        let q = TaskQueue::new("test", 16);
        let newer = seal_task("newer", 100);
        let older = seal_task("older", 50);
        let older_key = older.key().clone();
        q.push(newer).expect("push");
        q.push(older).expect("push");
        let picked = q.pop_by_limit(&Limit::default_node(), 200).expect("pick");
        assert_eq!(picked.key(), &older_key);
    }

    #[test]
    fn pop_respects_the_limit() {
        let q = TaskQueue::new("test", 16);
        q.push(replicate_task("o1", 10)).expect("push");
        let tiny = Limit { memory: 1, ..Limit::default_node() };
        assert!(q.pop_by_limit(&tiny, 11).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn dispatched_tasks_come_back_only_after_expiry() {
        let q = TaskQueue::new("test", 16);
        let mut t = replicate_task("o1", 10);
        t.meta.retry = 1;
        t.meta.update_time = 100;
        t.meta.timeout_secs = 30;
        q.push_dispatched(t);
        assert!(q.pop_by_limit(&Limit::default_node(), 120).is_none());
        assert!(q.pop_by_limit(&Limit::default_node(), 131).is_some());
    }

    #[test]
    fn sweep_collects_exhausted_dispatched_tasks() {
        let q = TaskQueue::new("test", 16);
        let mut t = replicate_task("o1", 10);
        t.meta.retry = t.meta.max_retry;
        t.meta.update_time = 100;
        t.meta.timeout_secs = 30;
        q.push_dispatched(t);
        assert!(q.pop_by_limit(&Limit::default_node(), 131).is_none());
        let dead = q.sweep_exhausted(131);
        assert_eq!(dead.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn query_matches_substring() {
        let q = TaskQueue::new("test", 16);
        q.push(replicate_task("alpha", 10)).expect("push");
        q.push(seal_task("beta", 10)).expect("push");
        assert_eq!(q.query("object:alpha").len(), 1);
        assert_eq!(q.query("object:").len(), 2);
        assert!(q.query("object:missing").is_empty());
    }
}
