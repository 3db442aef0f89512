use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::element::ElementKind;
use crate::error::{ProblemsError, Result};

/// Stable identifier of a stored problem.
pub type ProblemId = String;

/// Persistence backend for problem data. The broker owns all policy (access
/// control, limits, validation); the store only keeps bytes and the kind
/// they were saved as.
pub trait ProblemStore: Send + Sync {
    /// Allocate a new empty problem owned by `owner_uid`.
    fn create(&self, problem_type: &str, owner_uid: u32) -> Result<ProblemId>;

    fn save_element(&self, id: &str, name: &str, data: &[u8], kind: ElementKind) -> Result<()>;

    /// Returns None when the element does not exist.
    fn read_element(&self, id: &str, name: &str) -> Result<Option<Vec<u8>>>;

    /// The kind `name` was saved with, None when it does not exist.
    fn element_kind(&self, id: &str, name: &str) -> Result<Option<ElementKind>>;

    /// Removing a missing element is not an error.
    fn delete_element(&self, id: &str, name: &str) -> Result<()>;

    fn list_elements(&self, id: &str) -> Result<Vec<String>>;

    fn element_size(&self, id: &str, name: &str) -> Result<Option<u64>>;

    /// Aggregate size of all element payloads.
    fn total_size(&self, id: &str) -> Result<u64>;

    fn delete(&self, id: &str) -> Result<()>;

    fn owner(&self, id: &str) -> Result<u32>;
}

struct StoredElement {
    data: Vec<u8>,
    kind: ElementKind,
}

struct StoredProblem {
    owner_uid: u32,
    elements: BTreeMap<String, StoredElement>,
}

/// Heap-backed store used by the daemon and the tests.
pub struct MemoryStore {
    problems: Mutex<HashMap<ProblemId, StoredProblem>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            problems: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(1),
        }
    }

    fn with_problem<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredProblem) -> T,
    ) -> Result<T> {
        let mut problems = self
            .problems
            .lock()
            .map_err(|_| ProblemsError::Store("store lock poisoned".to_string()))?;
        let problem = problems
            .get_mut(id)
            .ok_or_else(|| ProblemsError::Store(format!("no such problem: {id}")))?;
        Ok(f(problem))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProblemStore for MemoryStore {
    fn create(&self, problem_type: &str, owner_uid: u32) -> Result<ProblemId> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let id = format!("{}-{epoch}-{seq}", problem_type.to_lowercase());
        let mut problems = self
            .problems
            .lock()
            .map_err(|_| ProblemsError::Store("store lock poisoned".to_string()))?;
        problems.insert(
            id.clone(),
            StoredProblem {
                owner_uid,
                elements: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn save_element(&self, id: &str, name: &str, data: &[u8], kind: ElementKind) -> Result<()> {
        self.with_problem(id, |p| {
            p.elements.insert(
                name.to_string(),
                StoredElement {
                    data: data.to_vec(),
                    kind,
                },
            );
        })
    }

    fn read_element(&self, id: &str, name: &str) -> Result<Option<Vec<u8>>> {
        self.with_problem(id, |p| p.elements.get(name).map(|e| e.data.clone()))
    }

    fn element_kind(&self, id: &str, name: &str) -> Result<Option<ElementKind>> {
        self.with_problem(id, |p| p.elements.get(name).map(|e| e.kind))
    }

    fn delete_element(&self, id: &str, name: &str) -> Result<()> {
        self.with_problem(id, |p| {
            p.elements.remove(name);
        })
    }

    fn list_elements(&self, id: &str) -> Result<Vec<String>> {
        self.with_problem(id, |p| p.elements.keys().cloned().collect())
    }

    fn element_size(&self, id: &str, name: &str) -> Result<Option<u64>> {
        self.with_problem(id, |p| p.elements.get(name).map(|e| e.data.len() as u64))
    }

    fn total_size(&self, id: &str) -> Result<u64> {
        self.with_problem(id, |p| {
            p.elements.values().map(|e| e.data.len() as u64).sum()
        })
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut problems = self
            .problems
            .lock()
            .map_err(|_| ProblemsError::Store("store lock poisoned".to_string()))?;
        problems.remove(id);
        Ok(())
    }

    fn owner(&self, id: &str) -> Result<u32> {
        self.with_problem(id, |p| p.owner_uid)
    }
}
