use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use problems_protocol::{ObjectPath, TaskStatus};

use crate::element::ElementValue;
use crate::error::{ProblemsError, Result};
use crate::session::BusId;

/// Detail keys published by new-problem tasks.
pub const DETAIL_TEMPORARY_ENTRY: &str = "NewProblem.TemporaryEntry";
pub const DETAIL_ENTRY: &str = "NewProblem.Entry";
pub const DETAIL_ERROR_MESSAGE: &str = "Error.Message";

/// One ingestion task. The state here is plain data; the async pipeline
/// driving it lives in the broker and only reaches in under the lock.
pub struct Task {
    pub path: ObjectPath,
    pub session_bus: BusId,
    pub session_path: ObjectPath,
    pub uid: u32,
    pub flags: u32,
    status: TaskStatus,
    pub details: BTreeMap<String, String>,
    pub result_code: u32,
    /// Handle of the temporary entry while the task is in flight.
    pub temp_entry: Option<ObjectPath>,
    /// Input elements; taken by the pipeline when it first runs.
    pub description: Option<BTreeMap<String, ElementValue>>,
    pub cancel: CancellationToken,
    /// Present while the task sits at the stopped checkpoint.
    pub resume: Option<oneshot::Sender<()>>,
    /// Set once a pipeline driver has been spawned for this task.
    pub started: bool,
}

impl Task {
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns true when the status actually changed.
    pub fn set_status(&mut self, status: TaskStatus) -> bool {
        if self.status == status {
            return false;
        }
        info!(task = %self.path, status = ?status, "task status changed");
        self.status = status;
        true
    }
}

/// Tasks keyed by handle, with per-session numbering. Finished handles are
/// remembered so a disposed task reads as gone, not as a bad address.
pub struct TaskRegistry {
    tasks: HashMap<ObjectPath, Task>,
    disposed: HashSet<ObjectPath>,
    session_seq: HashMap<ObjectPath, u64>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            disposed: HashSet::new(),
            session_seq: HashMap::new(),
        }
    }

    pub fn create(
        &mut self,
        session_bus: &str,
        session_path: &str,
        uid: u32,
        flags: u32,
        description: BTreeMap<String, ElementValue>,
        max_pending: usize,
    ) -> Result<ObjectPath> {
        let pending = self
            .tasks
            .values()
            .filter(|t| t.session_path == session_path && !t.status.is_terminal())
            .count();
        if max_pending > 0 && pending >= max_pending {
            return Err(ProblemsError::LimitsExceeded(
                "Too many pending tasks".to_string(),
            ));
        }

        let seq = self.session_seq.entry(session_path.to_string()).or_insert(0);
        *seq += 1;
        let path = format!("{session_path}/task/{seq}");
        self.tasks.insert(
            path.clone(),
            Task {
                path: path.clone(),
                session_bus: session_bus.to_string(),
                session_path: session_path.to_string(),
                uid,
                flags,
                status: TaskStatus::New,
                details: BTreeMap::new(),
                result_code: 0,
                temp_entry: None,
                description: Some(description),
                cancel: CancellationToken::new(),
                resume: None,
                started: false,
            },
        );
        info!(task = %path, uid, "task created");
        Ok(path)
    }

    /// Resolve a task handle for a caller. Tasks are private to their
    /// session; another session's handle resolves like an unknown one.
    pub fn lookup(&self, path: &str, caller_bus: &str) -> Result<&Task> {
        match self.tasks.get(path) {
            Some(task) if task.session_bus == caller_bus => Ok(task),
            Some(_) => Err(ProblemsError::BadAddress),
            None if self.disposed.contains(path) => Err(ProblemsError::ObjectGone),
            None => Err(ProblemsError::BadAddress),
        }
    }

    pub fn lookup_mut(&mut self, path: &str, caller_bus: &str) -> Result<&mut Task> {
        match self.tasks.get_mut(path) {
            Some(task) if task.session_bus == caller_bus => Ok(task),
            Some(_) => Err(ProblemsError::BadAddress),
            None if self.disposed.contains(path) => Err(ProblemsError::ObjectGone),
            None => Err(ProblemsError::BadAddress),
        }
    }

    /// Internal access for the pipeline driver, which holds no bus identity.
    pub fn get(&self, path: &str) -> Option<&Task> {
        self.tasks.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Task> {
        self.tasks.get_mut(path)
    }

    /// Drop the task and leave a tombstone behind.
    pub fn dispose(&mut self, path: &str) -> Option<Task> {
        let task = self.tasks.remove(path);
        if task.is_some() {
            self.disposed.insert(path.to_string());
        }
        task
    }

    /// Detach all tasks of a session, for connection teardown.
    pub fn remove_session_tasks(&mut self, session_path: &str) -> Vec<Task> {
        let paths: Vec<ObjectPath> = self
            .tasks
            .values()
            .filter(|t| t.session_path == session_path)
            .map(|t| t.path.clone())
            .collect();
        let mut removed = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(task) = self.dispose(&path) {
                removed.push(task);
            }
        }
        self.session_seq.remove(session_path);
        removed
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_task(reg: &mut TaskRegistry, bus: &str) -> ObjectPath {
        reg.create(
            bus,
            &format!("/problems/session/{bus}"),
            1000,
            0,
            BTreeMap::new(),
            10,
        )
        .unwrap()
    }

    #[test]
    fn task_numbering_is_per_session_and_monotonic() {
        let mut reg = TaskRegistry::new();
        let t1 = create_task(&mut reg, "bus-1");
        let t2 = create_task(&mut reg, "bus-1");
        let other = create_task(&mut reg, "bus-2");
        assert_eq!(t1, "/problems/session/bus-1/task/1");
        assert_eq!(t2, "/problems/session/bus-1/task/2");
        assert_eq!(other, "/problems/session/bus-2/task/1");
    }

    #[test]
    fn disposed_handles_are_never_reused() {
        let mut reg = TaskRegistry::new();
        let t1 = create_task(&mut reg, "bus-1");
        reg.dispose(&t1);
        let t2 = create_task(&mut reg, "bus-1");
        assert_ne!(t1, t2);
    }

    #[test]
    fn foreign_task_reads_as_bad_address() {
        let mut reg = TaskRegistry::new();
        let t1 = create_task(&mut reg, "bus-1");
        assert!(reg.lookup(&t1, "bus-1").is_ok());
        assert!(matches!(
            reg.lookup(&t1, "bus-2"),
            Err(ProblemsError::BadAddress)
        ));
    }

    #[test]
    fn disposed_task_reads_as_gone() {
        let mut reg = TaskRegistry::new();
        let t1 = create_task(&mut reg, "bus-1");
        reg.dispose(&t1);
        assert!(matches!(
            reg.lookup(&t1, "bus-1"),
            Err(ProblemsError::ObjectGone)
        ));
        assert!(matches!(
            reg.lookup("/problems/session/bus-1/task/99", "bus-1"),
            Err(ProblemsError::BadAddress)
        ));
    }

    #[test]
    fn pending_task_ceiling() {
        let mut reg = TaskRegistry::new();
        for _ in 0..3 {
            reg.create("bus-1", "/s/1", 1000, 0, BTreeMap::new(), 3).unwrap();
        }
        let err = reg
            .create("bus-1", "/s/1", 1000, 0, BTreeMap::new(), 3)
            .unwrap_err();
        assert!(err.to_string().contains("Too many pending tasks"));

        // terminal tasks free up the budget
        let path = "/s/1/task/1".to_string();
        reg.get_mut(&path).unwrap().set_status(TaskStatus::Done);
        assert!(reg.create("bus-1", "/s/1", 1000, 0, BTreeMap::new(), 3).is_ok());
    }

    #[test]
    fn set_status_reports_changes_only() {
        let mut reg = TaskRegistry::new();
        let path = create_task(&mut reg, "bus-1");
        let task = reg.get_mut(&path).unwrap();
        assert_eq!(task.status(), TaskStatus::New);
        assert!(task.set_status(TaskStatus::Running));
        assert!(!task.set_status(TaskStatus::Running));
        assert!(task.set_status(TaskStatus::Done));
    }

    #[test]
    fn session_teardown_detaches_all_tasks() {
        let mut reg = TaskRegistry::new();
        let t1 = create_task(&mut reg, "bus-1");
        let t2 = create_task(&mut reg, "bus-1");
        let keep = create_task(&mut reg, "bus-2");

        let removed = reg.remove_session_tasks("/problems/session/bus-1");
        assert_eq!(removed.len(), 2);
        assert!(matches!(
            reg.lookup(&t1, "bus-1"),
            Err(ProblemsError::ObjectGone)
        ));
        assert!(matches!(
            reg.lookup(&t2, "bus-1"),
            Err(ProblemsError::ObjectGone)
        ));
        assert!(reg.lookup(&keep, "bus-2").is_ok());
    }
}
