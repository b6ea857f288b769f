//! Durable priority time-queue.
//!
//! Tasks are ordered by `(timestamp, priority, insertion order)` in a
//! min-heap, indexed by id in a map, and mirrored to a JSON file that is
//! rewritten atomically (temp file + rename) after every mutation. The heap,
//! the index and the file all live behind one lock; log records are emitted
//! only after that lock is released (the logger has its own lock).
//!
//! Cancellation tombstones the task in place and drops it from the index;
//! stale heap entries are skipped at pop time. On reload, tombstones are
//! discarded and both structures are rebuilt from the file, which is the
//! sole durable state.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::AgentError;

/// Default priority when the caller does not provide one (lower is sooner).
pub const DEFAULT_PRIORITY: i64 = 5;

/// What to run when a task fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskData {
    pub target_agent: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Value,
}

/// One queued task. `timestamp == 0` marks a tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    /// Epoch seconds of the next (or only) run.
    pub timestamp: u64,
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub task_data: TaskData,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurrence_interval_s: Option<u64>,
    /// Insertion counter, breaking ordering ties. Derived on reload from
    /// file order; not part of the durable record.
    #[serde(skip)]
    seq: u64,
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// Heap key; `Ord` is ascending so the heap holds `Reverse<QueueKey>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    timestamp: u64,
    priority: i64,
    seq: u64,
    task_id: String,
}

impl QueueKey {
    fn for_task(task: &ScheduledTask) -> Self {
        Self {
            timestamp: task.timestamp,
            priority: task.priority,
            seq: task.seq,
            task_id: task.task_id.clone(),
        }
    }
}

/// Executes due tasks. The Overseer is the production implementation; tests
/// substitute their own.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run `action` on `target_agent`; returns the result record.
    async fn execute_task(&self, target_agent: &str, action: &str, parameters: Value) -> Value;
}

struct SchedulerState {
    heap: BinaryHeap<Reverse<QueueKey>>,
    by_id: HashMap<String, ScheduledTask>,
    next_seq: u64,
}

/// The scheduler. All mutations go through one lock; `start`/`stop` manage
/// the worker that pops due tasks every `check_interval`.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    tasks_file: PathBuf,
    check_interval: Duration,
    running: AtomicBool,
    stop_signal: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Current epoch seconds.
pub fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl Scheduler {
    /// Open (or create) the scheduler over `tasks_file`, rebuilding the heap
    /// and the index from the durable state.
    pub fn new(tasks_file: PathBuf, check_interval_seconds: u64) -> Result<Self, AgentError> {
        let mut state = SchedulerState {
            heap: BinaryHeap::new(),
            by_id: HashMap::new(),
            next_seq: 0,
        };

        if tasks_file.exists() {
            let raw = std::fs::read_to_string(&tasks_file)?;
            let tasks: Vec<ScheduledTask> = serde_json::from_str(&raw).map_err(|e| {
                AgentError::config(format!(
                    "fichier de tâches corrompu {}: {e}",
                    tasks_file.display()
                ))
            })?;
            for mut task in tasks {
                if task.timestamp == 0 {
                    continue; // tombstone
                }
                task.seq = state.next_seq;
                state.next_seq += 1;
                state.heap.push(Reverse(QueueKey::for_task(&task)));
                state.by_id.insert(task.task_id.clone(), task);
            }
        } else if let Some(parent) = tasks_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let restored = state.by_id.len();
        let scheduler = Self {
            state: Mutex::new(state),
            tasks_file,
            check_interval: Duration::from_secs(check_interval_seconds.max(1)),
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
            worker: Mutex::new(None),
        };
        if restored > 0 {
            log::info!(target: "scheduler", "{restored} tâches restaurées depuis le disque");
        }
        Ok(scheduler)
    }

    /// Queue a task for `execution_time` (epoch seconds). Returns the task id.
    ///
    /// Scheduling an id that is already queued replaces the queued task; the
    /// superseded heap entry is skipped at pop time.
    pub fn schedule(
        &self,
        task_data: TaskData,
        execution_time: u64,
        priority: i64,
        task_id: Option<String>,
        recurring: bool,
        recurrence_interval_s: Option<u64>,
    ) -> Result<String, AgentError> {
        if recurring && recurrence_interval_s.map_or(true, |i| i == 0) {
            return Err(AgentError::validation(
                "une tâche récurrente exige un intervalle strictement positif",
            ));
        }
        if execution_time == 0 {
            return Err(AgentError::validation(
                "l'instant d'exécution doit être non nul",
            ));
        }
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let persist_result = {
            let mut state = self.state.lock();
            let task = ScheduledTask {
                task_id: task_id.clone(),
                timestamp: execution_time,
                priority,
                task_data,
                recurring,
                recurrence_interval_s,
                seq: state.next_seq,
            };
            state.next_seq += 1;
            state.heap.push(Reverse(QueueKey::for_task(&task)));
            state.by_id.insert(task_id.clone(), task);
            self.persist(&state)
        };
        persist_result?;

        log::info!(target: "scheduler", "tâche {task_id} planifiée (t={execution_time})");
        Ok(task_id)
    }

    /// Cancel a queued task. The task never fires afterwards; a task already
    /// popped by the worker is not preempted.
    pub fn cancel(&self, task_id: &str) -> Result<(), AgentError> {
        let outcome = {
            let mut state = self.state.lock();
            match state.by_id.remove(task_id) {
                // Dropping the index entry tombstones the task: its heap
                // entry is now stale and is skipped at pop time.
                Some(_) => self.persist(&state).map(|_| true),
                None => Ok(false),
            }
        };

        match outcome? {
            true => {
                log::info!(target: "scheduler", "tâche {task_id} annulée");
                Ok(())
            }
            false => {
                log::warn!(target: "scheduler", "annulation d'une tâche inconnue: {task_id}");
                Err(AgentError::validation(format!("tâche inconnue: {task_id}")))
            }
        }
    }

    /// Snapshot of live tasks, sorted by `(timestamp, priority, insertion)`.
    pub fn list_pending(&self) -> Vec<ScheduledTask> {
        let state = self.state.lock();
        let mut tasks: Vec<ScheduledTask> = state.by_id.values().cloned().collect();
        tasks.sort_by_key(|t| (t.timestamp, t.priority, t.seq));
        tasks
    }

    /// Number of live tasks.
    pub fn pending_count(&self) -> usize {
        self.state.lock().by_id.len()
    }

    /// Pop every task due at `now`, rescheduling recurring ones at
    /// `previous + interval` so cadence is preserved even when late.
    fn pop_due(&self, now: u64) -> Vec<ScheduledTask> {
        let (due, persist_result) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let mut due = Vec::new();

            while let Some(Reverse(key)) = state.heap.peek().cloned() {
                let live = match state.by_id.get(&key.task_id) {
                    // Tombstoned or superseded entries are skipped.
                    None => {
                        state.heap.pop();
                        continue;
                    }
                    Some(task) => {
                        if task.timestamp != key.timestamp || task.priority != key.priority {
                            state.heap.pop();
                            continue;
                        }
                        task.clone()
                    }
                };
                if live.timestamp > now {
                    break;
                }
                state.heap.pop();
                if live.recurring {
                    let interval = live.recurrence_interval_s.unwrap_or(0).max(1);
                    let mut next = live.clone();
                    next.timestamp = live.timestamp + interval;
                    next.seq = state.next_seq;
                    state.next_seq += 1;
                    state.heap.push(Reverse(QueueKey::for_task(&next)));
                    state.by_id.insert(next.task_id.clone(), next);
                } else {
                    state.by_id.remove(&live.task_id);
                }
                due.push(live);
            }

            if due.is_empty() {
                (due, Ok(()))
            } else {
                let persisted = self.persist(&state);
                (due, persisted)
            }
        };

        if let Err(e) = persist_result {
            log::error!(target: "scheduler", "persistance échouée après pop: {e}");
        }
        due
    }

    /// Launch the worker. Idempotent.
    pub fn start(self: &Arc<Self>, executor: Arc<dyn TaskExecutor>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            log::info!(target: "scheduler", "worker démarré");
            loop {
                tokio::select! {
                    _ = scheduler.stop_signal.notified() => break,
                    _ = tokio::time::sleep(scheduler.check_interval) => {}
                }
                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }
                for task in scheduler.pop_due(now_epoch()) {
                    scheduler.run_one(&*executor, task).await;
                }
            }
            log::info!(target: "scheduler", "worker arrêté");
        });
        *self.worker.lock() = Some(handle);
    }

    async fn run_one(&self, executor: &dyn TaskExecutor, task: ScheduledTask) {
        log::info!(
            target: "scheduler",
            "exécution de {} ({} / {})",
            task.task_id,
            task.task_data.target_agent,
            task.task_data.action
        );
        let result = executor
            .execute_task(
                &task.task_data.target_agent,
                &task.task_data.action,
                task.task_data.parameters.clone(),
            )
            .await;
        let status = result.get("status").and_then(Value::as_str).unwrap_or("unknown");
        if status == "success" {
            log::debug!(target: "scheduler", "tâche {} terminée", task.task_id);
        } else {
            // The task is neither removed twice nor re-queued: the error only
            // surfaces through the executor's return channel.
            log::error!(
                target: "scheduler",
                "tâche {} en échec: {}",
                task.task_id,
                result.get("message").and_then(Value::as_str).unwrap_or("?")
            );
        }
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_signal.notify_waiters();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Rewrite the task file atomically: serialize the index (sorted so the
    /// on-disk order is the queue order), write a temp file, rename over.
    fn persist(&self, state: &SchedulerState) -> Result<(), AgentError> {
        let mut tasks: Vec<&ScheduledTask> = state.by_id.values().collect();
        tasks.sort_by_key(|t| (t.timestamp, t.priority, t.seq));
        let payload = serde_json::to_string_pretty(&tasks)?;

        let tmp = self.tasks_file.with_extension("json.tmp");
        std::fs::write(&tmp, payload)?;
        std::fs::rename(&tmp, &self.tasks_file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_task(agent: &str) -> TaskData {
        TaskData {
            target_agent: agent.to_string(),
            action: "noop".to_string(),
            parameters: json!({}),
        }
    }

    fn scheduler_in(dir: &tempfile::TempDir) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(dir.path().join("tasks.json"), 1).unwrap())
    }

    struct RecordingExecutor {
        calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TaskExecutor for RecordingExecutor {
        async fn execute_task(&self, target: &str, action: &str, parameters: Value) -> Value {
            self.calls
                .lock()
                .push((target.to_string(), action.to_string(), parameters));
            json!({"status": "success"})
        }
    }

    #[test]
    fn test_schedule_then_cancel_then_restart() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);

        let id = scheduler
            .schedule(
                noop_task("TestAgent"),
                now_epoch() + 3600,
                DEFAULT_PRIORITY,
                Some("t1".to_string()),
                false,
                None,
            )
            .unwrap();
        assert_eq!(id, "t1");

        let pending = scheduler.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, "t1");

        scheduler.cancel("t1").unwrap();
        assert!(scheduler.list_pending().is_empty());

        // Restart: still empty.
        drop(scheduler);
        let restarted = scheduler_in(&dir);
        assert!(restarted.list_pending().is_empty());
    }

    #[test]
    fn test_live_tasks_survive_restart_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let base = now_epoch() + 100;

        scheduler
            .schedule(noop_task("A"), base + 50, 5, Some("later".into()), false, None)
            .unwrap();
        scheduler
            .schedule(noop_task("B"), base, 5, Some("sooner".into()), false, None)
            .unwrap();
        scheduler
            .schedule(noop_task("C"), base, 1, Some("urgent".into()), false, None)
            .unwrap();

        drop(scheduler);
        let restarted = scheduler_in(&dir);
        let ids: Vec<String> = restarted
            .list_pending()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(ids, vec!["urgent", "sooner", "later"]);
    }

    #[test]
    fn test_ordering_breaks_ties_by_insertion() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let at = now_epoch() + 10;

        for name in ["first", "second", "third"] {
            scheduler
                .schedule(noop_task("X"), at, 5, Some(name.to_string()), false, None)
                .unwrap();
        }
        let ids: Vec<String> = scheduler
            .list_pending()
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_cancel_unknown_task_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        assert!(scheduler.cancel("ghost").is_err());
    }

    #[test]
    fn test_recurring_requires_interval() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        assert!(scheduler
            .schedule(noop_task("X"), now_epoch() + 5, 5, None, true, None)
            .is_err());
    }

    #[test]
    fn test_cancelled_task_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let at = now_epoch();

        scheduler
            .schedule(noop_task("A"), at, 1, Some("dead".into()), false, None)
            .unwrap();
        scheduler
            .schedule(noop_task("B"), at, 5, Some("alive".into()), false, None)
            .unwrap();
        scheduler.cancel("dead").unwrap();

        let due = scheduler.pop_due(at + 1);
        let ids: Vec<&str> = due.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["alive"]);
    }

    #[test]
    fn test_recurring_cadence_preserved_when_late() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let t0 = now_epoch();

        scheduler
            .schedule(noop_task("X"), t0, 5, Some("tick".into()), true, Some(100))
            .unwrap();

        // Worker wakes up late, at t0 + 250: the task catches up at its own
        // cadence (t0, t0+100, t0+200) instead of drifting to "now".
        let due = scheduler.pop_due(t0 + 250);
        let stamps: Vec<u64> = due.iter().map(|t| t.timestamp).collect();
        assert_eq!(stamps, vec![t0, t0 + 100, t0 + 200]);

        let pending = scheduler.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].timestamp, t0 + 300);
    }

    #[test]
    fn test_rescheduling_same_id_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let at = now_epoch() + 100;

        scheduler
            .schedule(noop_task("A"), at, 5, Some("t".into()), false, None)
            .unwrap();
        scheduler
            .schedule(noop_task("B"), at + 500, 5, Some("t".into()), false, None)
            .unwrap();

        let pending = scheduler.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_data.target_agent, "B");

        // The superseded heap entry does not fire.
        assert!(scheduler.pop_due(at + 1).is_empty());
        assert_eq!(scheduler.pop_due(at + 501).len(), 1);
    }

    #[test]
    fn test_task_file_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        scheduler
            .schedule(noop_task("A"), now_epoch() + 60, 5, Some("t1".into()), false, None)
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("tasks.json")).unwrap();
        let tasks: Vec<ScheduledTask> = serde_json::from_str(&raw).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_id, "t1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_executes_due_task_once() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let executor = RecordingExecutor::new();

        scheduler
            .schedule(
                TaskData {
                    target_agent: "TestAgent".to_string(),
                    action: "echo".to_string(),
                    parameters: json!({"x": 1}),
                },
                now_epoch(),
                5,
                Some("now".into()),
                false,
                None,
            )
            .unwrap();

        scheduler.start(executor.clone());
        // Twice the check interval.
        tokio::time::sleep(Duration::from_millis(2200)).await;
        scheduler.stop().await;

        let calls = executor.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "TestAgent");
        assert_eq!(calls[0].1, "echo");
        assert_eq!(calls[0].2, json!({"x": 1}));
        assert!(scheduler.list_pending().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_in(&dir);
        let executor = RecordingExecutor::new();

        scheduler.start(executor.clone());
        scheduler.start(executor.clone());
        assert!(scheduler.is_running());
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }
}
