use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use problems_protocol::{
    AUTHORIZE_ALREADY, AUTHORIZE_GRANTED, AUTHORIZE_PENDING, AuthStatus, Event, ObjectPath,
    TaskStatus, flags, task_result,
};

use crate::auth::{AuthAgent, AuthDecision};
use crate::element::{
    ElementKind, ElementValue, GATING_ELEMENTS, check_privileged_value, validate_element_name,
};
use crate::entry::{self, EntryRegistry, EntryState, now_epoch};
use crate::error::{ProblemsError, Result};
use crate::limits::Limits;
use crate::ratelimit::RateLimiter;
use crate::session::{AuthState, BusId, SessionRegistry};
use crate::store::ProblemStore;
use crate::task::{
    DETAIL_ENTRY, DETAIL_ERROR_MESSAGE, DETAIL_TEMPORARY_ENTRY, TaskRegistry,
};

/// All broker state behind one lock. Long-running work (the agent round
/// trip, the ingestion pipeline) runs in spawned tasks that reacquire the
/// lock only to apply transitions, so per-object notification order matches
/// transition order.
pub struct ProblemsBroker {
    limits: Limits,
    store: Arc<dyn ProblemStore>,
    agent: Arc<dyn AuthAgent>,
    sessions: SessionRegistry,
    tasks: TaskRegistry,
    entries: EntryRegistry,
    rate: RateLimiter,
    clients: HashMap<BusId, mpsc::UnboundedSender<Event>>,
}

pub type SharedBroker = Arc<Mutex<ProblemsBroker>>;

type Clients = HashMap<BusId, mpsc::UnboundedSender<Event>>;

impl ProblemsBroker {
    pub fn new(limits: Limits, store: Arc<dyn ProblemStore>, agent: Arc<dyn AuthAgent>) -> Self {
        let rate = RateLimiter::new(limits.rate_window, limits.rate_burst);
        Self {
            limits,
            store,
            agent,
            sessions: SessionRegistry::new(),
            tasks: TaskRegistry::new(),
            entries: EntryRegistry::new(),
            rate,
            clients: HashMap::new(),
        }
    }

    pub fn into_shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    /// Attach the event channel of a freshly accepted connection.
    pub fn register_client(&mut self, bus: &str, tx: mpsc::UnboundedSender<Event>) {
        self.clients.insert(bus.to_string(), tx);
    }

    fn notify(clients: &Clients, bus: &str, event: Event) {
        if let Some(tx) = clients.get(bus) {
            let _ = tx.send(event);
        }
    }

    /// Deliver a crash event to every connection that can see the entry.
    fn crash(clients: &Clients, sessions: &SessionRegistry, entry: &str, owner_uid: u32) {
        for session in sessions.iter() {
            let visible =
                session.uid == owner_uid || session.uid == 0 || session.is_authorized();
            if visible {
                Self::notify(
                    clients,
                    &session.bus_id,
                    Event::Crash {
                        entry: entry.to_string(),
                        uid: owner_uid,
                    },
                );
            }
        }
    }

    // ---- sessions --------------------------------------------------------

    pub fn get_session(&mut self, bus: &str, uid: u32) -> Result<ObjectPath> {
        let session = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?;
        Ok(session.path.clone())
    }

    pub fn session_is_authorized(&mut self, bus: &str, uid: u32) -> Result<bool> {
        let session = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?;
        Ok(session.is_authorized())
    }

    pub fn generate_token(&mut self, bus: &str, uid: u32, lifetime_secs: u64) -> Result<String> {
        let session = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?;
        session.generate_token(lifetime_secs)
    }

    pub fn revoke_token(&mut self, bus: &str, uid: u32, token: &str) -> Result<()> {
        let session = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?;
        session.revoke_token(token);
        Ok(())
    }

    pub fn revoke_authorization(&mut self, bus: &str, uid: u32) -> Result<()> {
        let session = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?;
        if session.revoke() {
            let path = session.path.clone();
            Self::notify(
                &self.clients,
                bus,
                Event::AuthorizationChanged {
                    session: path,
                    status: AuthStatus::NotAuthorized,
                },
            );
        }
        Ok(())
    }

    pub fn close_session(&mut self, bus: &str) -> Result<()> {
        self.teardown_session(bus);
        Ok(())
    }

    /// Connection teardown: the transport noticed the peer is gone.
    pub fn disconnect(&mut self, bus: &str) {
        debug!(bus = %bus, "client disconnected");
        self.teardown_session(bus);
        self.clients.remove(bus);
    }

    fn teardown_session(&mut self, bus: &str) {
        let Some(session) = self.sessions.remove(bus) else {
            return;
        };
        for task in self.tasks.remove_session_tasks(&session.path) {
            task.cancel.cancel();
            if let Some(temp) = &task.temp_entry {
                if let Some(record) = self.entries.remove(temp) {
                    if let Err(e) = self.store.delete(&record.problem) {
                        warn!(problem = %record.problem, error = %e, "failed to drop temporary problem");
                    }
                }
            }
        }
        // The rate window is keyed by uid and decays with time only; it is
        // not reset when the uid's sessions go away.
    }

    // ---- authorization ---------------------------------------------------

    /// Request authorization, either through the agent or by redeeming a
    /// delegation token from a peer session of the same user.
    pub async fn authorize(
        shared: &SharedBroker,
        bus: &str,
        uid: u32,
        message: Option<String>,
        peer_bus: Option<String>,
        peer_token: Option<String>,
    ) -> Result<i32> {
        let (generation, agent, message) = {
            let mut broker = shared.lock().await;
            let max_open = broker.limits.max_open_sessions;
            let state = broker.sessions.get_or_create(bus, uid, max_open)?.state();

            match (peer_bus, peer_token) {
                (Some(peer_bus), Some(peer_token)) => {
                    return broker.authorize_via_token(bus, uid, &peer_bus, &peer_token);
                }
                (None, None) => {}
                _ => {
                    return Err(ProblemsError::InvalidRequest(
                        "Both peer bus and peer token must be provided".to_string(),
                    ));
                }
            }

            match state {
                AuthState::Authorized => return Ok(AUTHORIZE_ALREADY),
                AuthState::Pending => return Ok(AUTHORIZE_PENDING),
                AuthState::Anonymous => {}
            }

            let session = broker.sessions.get_or_create(bus, uid, max_open)?;
            let generation = session.begin_pending();
            let path = session.path.clone();
            Self::notify(
                &broker.clients,
                bus,
                Event::AuthorizationChanged {
                    session: path,
                    status: AuthStatus::Pending,
                },
            );
            (generation, Arc::clone(&broker.agent), message)
        };

        let shared = Arc::clone(shared);
        let bus = bus.to_string();
        tokio::spawn(async move {
            let decision = agent.request_authorization(uid, message).await;
            let mut broker = shared.lock().await;
            let Some(session) = broker.sessions.get_mut(&bus) else {
                return;
            };
            let path = session.path.clone();
            let (granted, status) = match decision {
                Ok(AuthDecision::Granted) => (true, AuthStatus::Authorized),
                Ok(AuthDecision::Denied) => (false, AuthStatus::NotAuthorized),
                Err(e) => {
                    warn!(session = %path, error = %e, "authorization agent failed");
                    (false, AuthStatus::Failed)
                }
            };
            if session.resolve_pending(generation, granted) {
                info!(session = %path, granted, "authorization resolved");
                Self::notify(
                    &broker.clients,
                    &bus,
                    Event::AuthorizationChanged {
                        session: path,
                        status,
                    },
                );
            }
        });

        Ok(AUTHORIZE_PENDING)
    }

    fn authorize_via_token(
        &mut self,
        bus: &str,
        uid: u32,
        peer_bus: &str,
        peer_token: &str,
    ) -> Result<i32> {
        // Do not burn a token on a session that already has authorization
        if self.sessions.get(bus).is_some_and(|s| s.is_authorized()) {
            return Ok(AUTHORIZE_ALREADY);
        }
        {
            let peer = self.sessions.peer(peer_bus)?;
            if !peer.is_authorized() {
                return Err(ProblemsError::AuthFailure(
                    "Not authorized session cannot pass authorization".to_string(),
                ));
            }
            if peer.uid != uid {
                return Err(ProblemsError::AuthFailure(
                    "Session owners do not match".to_string(),
                ));
            }
            peer.consume_token(peer_token)?;
        }

        let session = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?;
        session.grant();
        let path = session.path.clone();
        info!(session = %path, peer = %peer_bus, "authorization delegated");
        Self::notify(
            &self.clients,
            bus,
            Event::AuthorizationChanged {
                session: path,
                status: AuthStatus::Authorized,
            },
        );
        Ok(AUTHORIZE_GRANTED)
    }

    // ---- problem ingestion -----------------------------------------------

    /// Validate and sanitize a problem description and create the ingestion
    /// task for it. Depending on the flags the task starts right away, and
    /// with synchronous processing it runs to completion before returning.
    pub async fn new_problem(
        shared: &SharedBroker,
        bus: &str,
        uid: u32,
        elements: BTreeMap<String, ElementValue>,
        bits: u32,
    ) -> Result<ObjectPath> {
        let path = {
            let mut broker = shared.lock().await;
            broker.create_problem_task(bus, uid, elements, bits)?
        };

        if bits & flags::NEW_PROBLEM_SYNC_PROCESSING != 0 {
            Self::launch_pipeline(shared, &path, true).await;
        } else if bits & flags::NEW_PROBLEM_AUTO_START != 0 {
            Self::launch_pipeline(shared, &path, false).await;
        }
        Ok(path)
    }

    fn create_problem_task(
        &mut self,
        bus: &str,
        uid: u32,
        mut elements: BTreeMap<String, ElementValue>,
        bits: u32,
    ) -> Result<ObjectPath> {
        // Synchronous processing holds the caller until the task finishes,
        // and only the caller could resume a checkpointed task; the
        // combination can never make progress.
        if bits & flags::NEW_PROBLEM_SYNC_PROCESSING != 0
            && bits & flags::NEW_PROBLEM_STOP_AFTER_TEMP_ENTRY != 0
        {
            return Err(ProblemsError::InvalidRequest(
                "Cannot stop after the temporary entry when processing synchronously".to_string(),
            ));
        }

        let session_path = {
            let session = self
                .sessions
                .get_or_create(bus, uid, self.limits.max_open_sessions)?;
            session.path.clone()
        };

        if !self.rate.check_and_record(uid) {
            return Err(ProblemsError::LimitsExceeded(
                "Too many problems created in a short time".to_string(),
            ));
        }
        if uid != 0
            && self.limits.max_user_problems > 0
            && self.entries.owned_complete_count(uid) >= self.limits.max_user_problems
        {
            return Err(ProblemsError::LimitsExceeded(
                "No more problems can be created".to_string(),
            ));
        }

        for (name, value) in &elements {
            validate_element_name(name)?;
            if GATING_ELEMENTS.contains(&name.as_str()) {
                let Some(text) = value.as_text() else {
                    return Err(ProblemsError::InvalidElement(format!(
                        "Element '{name}' must be a text value"
                    )));
                };
                check_privileged_value(name, text, uid)?;
            }
        }

        // Claimed identity is overwritten with the connection's; only root
        // may report on behalf of another user.
        let claims_uid = elements.get("uid").and_then(|v| v.as_text()).is_some();
        if uid != 0 || !claims_uid {
            elements.insert("uid".to_string(), ElementValue::Text(uid.to_string()));
        }
        if !elements.contains_key("analyzer") {
            elements.insert(
                "analyzer".to_string(),
                ElementValue::Text("libreport".to_string()),
            );
        }
        if !elements.contains_key("type") {
            let analyzer = elements
                .get("analyzer")
                .and_then(|v| v.as_text())
                .unwrap_or("libreport")
                .to_string();
            elements.insert("type".to_string(), ElementValue::Text(analyzer));
        }

        self.tasks.create(
            bus,
            &session_path,
            uid,
            bits,
            elements,
            self.limits.max_pending_tasks,
        )
    }

    async fn launch_pipeline(shared: &SharedBroker, path: &str, synchronous: bool) {
        {
            let mut broker = shared.lock().await;
            if let Some(task) = broker.tasks.get_mut(path) {
                task.started = true;
            } else {
                return;
            }
        }
        if synchronous {
            run_pipeline(Arc::clone(shared), path.to_string()).await;
        } else {
            tokio::spawn(run_pipeline(Arc::clone(shared), path.to_string()));
        }
    }

    pub async fn start_task(shared: &SharedBroker, bus: &str, path: &str) -> Result<()> {
        let resume = {
            let mut broker = shared.lock().await;
            let task = broker.tasks.lookup_mut(path, bus)?;
            match task.status() {
                TaskStatus::New if !task.started => None,
                TaskStatus::Stopped => Some(task.resume.take()),
                _ => {
                    return Err(ProblemsError::InvalidRequest(
                        "Task cannot be started in its current state".to_string(),
                    ));
                }
            }
        };

        match resume {
            None => Self::launch_pipeline(shared, path, false).await,
            Some(Some(tx)) => {
                let _ = tx.send(());
            }
            Some(None) => {
                // checkpoint already consumed, nothing to resume
            }
        }
        Ok(())
    }

    pub fn cancel_task(&mut self, bus: &str, path: &str) -> Result<()> {
        let (started, cancel) = {
            let task = self.tasks.lookup_mut(path, bus)?;
            if task.status().is_terminal() {
                return Err(ProblemsError::InvalidRequest(
                    "Finished task cannot be canceled".to_string(),
                ));
            }
            (task.started, task.cancel.clone())
        };

        if started {
            // the pipeline driver performs the cleanup and the transition
            cancel.cancel();
            return Ok(());
        }

        if let Some(task) = self.tasks.get_mut(path) {
            task.result_code = task_result::DROPPED;
            if task.set_status(TaskStatus::Canceled) {
                Self::notify(
                    &self.clients,
                    &task.session_bus,
                    Event::TaskStatusChanged {
                        task: task.path.clone(),
                        status: TaskStatus::Canceled,
                    },
                );
            }
        }
        Ok(())
    }

    /// Collect the results of a terminal task and dispose of it.
    pub fn finish_task(
        &mut self,
        bus: &str,
        path: &str,
    ) -> Result<(BTreeMap<String, String>, u32)> {
        let task = self.tasks.lookup(path, bus)?;
        if !task.status().is_terminal() {
            return Err(ProblemsError::TaskFailed(
                "Unfinished task cannot provide results".to_string(),
            ));
        }
        let task = self
            .tasks
            .dispose(path)
            .ok_or(ProblemsError::ObjectGone)?;
        Ok((task.details, task.result_code))
    }

    pub fn task_status(&self, bus: &str, path: &str) -> Result<TaskStatus> {
        Ok(self.tasks.lookup(path, bus)?.status())
    }

    pub fn task_details(&self, bus: &str, path: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.tasks.lookup(path, bus)?.details.clone())
    }

    // ---- entries ---------------------------------------------------------

    pub fn get_problems(&mut self, bus: &str, uid: u32, bits: u32) -> Result<Vec<ObjectPath>> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();

        let mut result: Vec<ObjectPath> = self
            .entries
            .iter()
            .filter(|(_, record)| match record.state {
                EntryState::Deleted => false,
                EntryState::New => bits & flags::GET_PROBLEMS_NEW != 0,
                EntryState::Complete => true,
            })
            .filter(|(_, record)| {
                record.owner_uid == uid
                    || (bits & flags::GET_PROBLEMS_FOREIGN != 0 && effective_uid == 0)
            })
            .map(|(path, _)| path.clone())
            .collect();
        result.sort();
        Ok(result)
    }

    pub fn delete_problems(&mut self, bus: &str, uid: u32, paths: &[ObjectPath]) -> Result<()> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();

        for path in paths {
            let record = self.entries.lookup(path)?;
            if record.state == EntryState::New {
                return Err(ProblemsError::InvalidRequest(
                    "Temporary entries cannot be deleted".to_string(),
                ));
            }
            entry::check_delete(record, effective_uid)?;
            self.store.delete(&record.problem)?;
            self.entries.mark_deleted(path);
            info!(entry = %path, uid, "problem deleted");
        }
        Ok(())
    }

    pub fn read_elements(
        &mut self,
        bus: &str,
        uid: u32,
        entry_path: &str,
        names: &[String],
        bits: u32,
    ) -> Result<BTreeMap<String, problems_protocol::ElementPayload>> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();
        let record = self.entries.lookup(entry_path)?;
        entry::check_read(record, effective_uid)?;
        entry::read_elements(self.store.as_ref(), record, names, bits)
    }

    pub fn save_elements(
        &mut self,
        bus: &str,
        uid: u32,
        entry_path: &str,
        elements: BTreeMap<String, ElementValue>,
        bits: u32,
    ) -> Result<()> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();
        let record = self.entries.lookup(entry_path)?;
        entry::check_write(record, effective_uid)?;
        entry::save_elements(self.store.as_ref(), record, elements, bits, uid, &self.limits)
    }

    pub fn delete_elements(
        &mut self,
        bus: &str,
        uid: u32,
        entry_path: &str,
        names: &[String],
    ) -> Result<()> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();
        let record = self.entries.lookup(entry_path)?;
        entry::check_write(record, effective_uid)?;
        entry::delete_elements(self.store.as_ref(), record, names)
    }

    pub fn get_problem_data(
        &mut self,
        bus: &str,
        uid: u32,
        entry_path: &str,
    ) -> Result<BTreeMap<String, problems_protocol::ElementPayload>> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();
        let record = self.entries.lookup(entry_path)?;
        entry::check_read(record, effective_uid)?;
        entry::problem_data(self.store.as_ref(), record)
    }

    pub fn entry_info(
        &mut self,
        bus: &str,
        uid: u32,
        entry_path: &str,
    ) -> Result<problems_protocol::EntryInfo> {
        let effective_uid = self
            .sessions
            .get_or_create(bus, uid, self.limits.max_open_sessions)?
            .effective_uid();
        let record = self.entries.lookup(entry_path)?;
        entry::check_read(record, effective_uid)?;
        entry::entry_info(self.store.as_ref(), record)
    }
}

// ---- pipeline ------------------------------------------------------------

enum Stage {
    Finished,
    Proceed { checkpoint: bool },
}

/// Drive one ingestion task to completion, honoring its cancellation token
/// at every suspension point.
async fn run_pipeline(shared: SharedBroker, path: ObjectPath) {
    let cancel = {
        let broker = shared.lock().await;
        match broker.tasks.get(&path) {
            Some(task) => task.cancel.clone(),
            None => return,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => abort_task(&shared, &path).await,
        _ = drive(&shared, &path) => {}
    }
}

async fn drive(shared: &SharedBroker, path: &str) {
    let stage = {
        let mut broker = shared.lock().await;
        materialize(&mut broker, path)
    };

    let checkpoint = match stage {
        Stage::Finished => return,
        Stage::Proceed { checkpoint } => checkpoint,
    };

    if checkpoint {
        let rx = {
            let mut broker = shared.lock().await;
            let broker = &mut *broker;
            let Some(task) = broker.tasks.get_mut(path) else {
                return;
            };
            let (tx, rx) = oneshot::channel();
            task.resume = Some(tx);
            if task.set_status(TaskStatus::Stopped) {
                ProblemsBroker::notify(
                    &broker.clients,
                    &task.session_bus,
                    Event::TaskStatusChanged {
                        task: task.path.clone(),
                        status: TaskStatus::Stopped,
                    },
                );
            }
            rx
        };
        if rx.await.is_err() {
            // resume side vanished with the session
            return;
        }
        let mut broker = shared.lock().await;
        let broker = &mut *broker;
        if let Some(task) = broker.tasks.get_mut(path) {
            if task.set_status(TaskStatus::Running) {
                ProblemsBroker::notify(
                    &broker.clients,
                    &task.session_bus,
                    Event::TaskStatusChanged {
                        task: task.path.clone(),
                        status: TaskStatus::Running,
                    },
                );
            }
        }
    }

    let mut broker = shared.lock().await;
    finalize(&mut broker, path);
}

/// Stage one: sanitized description becomes a temporary entry.
fn materialize(broker: &mut ProblemsBroker, path: &str) -> Stage {
    let Some(task) = broker.tasks.get_mut(path) else {
        return Stage::Finished;
    };
    if task.set_status(TaskStatus::Running) {
        ProblemsBroker::notify(
            &broker.clients,
            &task.session_bus,
            Event::TaskStatusChanged {
                task: task.path.clone(),
                status: TaskStatus::Running,
            },
        );
    }

    let Some(task) = broker.tasks.get_mut(path) else {
        return Stage::Finished;
    };
    let Some(mut elements) = task.description.take() else {
        return Stage::Finished;
    };
    let task_uid = task.uid;
    let bits = task.flags;

    let owner_uid = elements
        .get("uid")
        .and_then(|v| v.as_text())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(task_uid);
    let problem_type = elements
        .get("type")
        .and_then(|v| v.as_text())
        .unwrap_or("libreport")
        .to_string();
    if !elements.contains_key("time") {
        elements.insert(
            "time".to_string(),
            ElementValue::Text(now_epoch().to_string()),
        );
    }

    let problem = match broker.store.create(&problem_type, owner_uid) {
        Ok(p) => p,
        Err(e) => return fail_task(broker, path, task_result::FAILED, &e.to_string()),
    };
    let temp_path = broker.entries.insert_new(problem.clone(), owner_uid);

    {
        let record = match broker.entries.lookup(&temp_path) {
            Ok(r) => r,
            Err(_) => return Stage::Finished,
        };
        // Oversized data rejects the whole problem; excess element names are
        // only dropped, matching interactive SaveElements at the ceiling.
        let fatal = flags::SAVE_IO_ERROR_FATAL
            | flags::SAVE_UNSUPPORTED_ERROR_FATAL
            | flags::SAVE_DATA_SIZE_LIMIT_FATAL;
        if let Err(e) = entry::save_elements(
            broker.store.as_ref(),
            record,
            elements,
            fatal,
            task_uid,
            &broker.limits,
        ) {
            broker.entries.remove(&temp_path);
            if let Err(del) = broker.store.delete(&problem) {
                warn!(problem = %problem, error = %del, "failed to drop rejected problem");
            }
            let code = match e {
                ProblemsError::LimitsExceeded(_) | ProblemsError::InvalidElement(_) => {
                    task_result::INVALID_DATA
                }
                _ => task_result::FAILED,
            };
            return fail_task(broker, path, code, &e.to_string());
        }
    }

    let Some(task) = broker.tasks.get_mut(path) else {
        // session vanished while we were writing; drop the orphan
        broker.entries.remove(&temp_path);
        let _ = broker.store.delete(&problem);
        return Stage::Finished;
    };
    task.temp_entry = Some(temp_path.clone());
    task.details
        .insert(DETAIL_TEMPORARY_ENTRY.to_string(), temp_path);
    Stage::Proceed {
        checkpoint: bits & flags::NEW_PROBLEM_STOP_AFTER_TEMP_ENTRY != 0,
    }
}

/// Stage two: identity synthesis, duplicate detection, finalization.
fn finalize(broker: &mut ProblemsBroker, path: &str) {
    let Some(task) = broker.tasks.get_mut(path) else {
        return;
    };
    let Some(temp_path) = task.temp_entry.clone() else {
        return;
    };
    let owner_uid = match broker.entries.lookup(&temp_path) {
        Ok(record) => record.owner_uid,
        Err(_) => return,
    };
    let problem = match broker.entries.lookup(&temp_path) {
        Ok(record) => record.problem.clone(),
        Err(_) => return,
    };

    let read_text = |broker: &ProblemsBroker, name: &str| -> Option<String> {
        broker
            .store
            .read_element(&problem, name)
            .ok()
            .flatten()
            .and_then(|d| String::from_utf8(d).ok())
    };

    let duphash = read_text(broker, "duphash");
    if read_text(broker, "uuid").is_none() {
        let uuid = match &duphash {
            Some(d) => d.clone(),
            None => synthesize_uuid(broker, &problem),
        };
        if let Err(e) =
            broker
                .store
                .save_element(&problem, "uuid", uuid.as_bytes(), ElementKind::Text)
        {
            warn!(problem = %problem, error = %e, "failed to store uuid");
        }
    }

    if let Some(duphash) = &duphash {
        let duplicate = broker
            .entries
            .find_duplicate(broker.store.as_ref(), duphash, owner_uid)
            .unwrap_or(None);
        if let Some(existing) = duplicate {
            broker.entries.remove(&temp_path);
            if let Err(e) = broker.store.delete(&problem) {
                warn!(problem = %problem, error = %e, "failed to drop duplicate problem");
            }
            if let Ok(record) = broker.entries.lookup(&existing) {
                if let Err(e) = entry::register_occurrence(broker.store.as_ref(), record) {
                    warn!(entry = %existing, error = %e, "failed to bump occurrence");
                }
            }
            let Some(task) = broker.tasks.get_mut(path) else {
                return;
            };
            task.temp_entry = None;
            task.details.remove(DETAIL_TEMPORARY_ENTRY);
            task.details
                .insert(DETAIL_ENTRY.to_string(), existing.clone());
            task.result_code = task_result::DUPLICATE;
            let bus = task.session_bus.clone();
            let task_path = task.path.clone();
            if task.set_status(TaskStatus::Done) {
                ProblemsBroker::notify(
                    &broker.clients,
                    &bus,
                    Event::TaskStatusChanged {
                        task: task_path,
                        status: TaskStatus::Done,
                    },
                );
            }
            info!(entry = %existing, "duplicate problem registered");
            ProblemsBroker::crash(&broker.clients, &broker.sessions, &existing, owner_uid);
            return;
        }
    }

    if read_text(broker, "count").is_none() {
        if let Err(e) = broker
            .store
            .save_element(&problem, "count", b"1", ElementKind::Text)
        {
            warn!(problem = %problem, error = %e, "failed to store count");
        }
    }
    broker.entries.mark_complete(&temp_path);

    let Some(task) = broker.tasks.get_mut(path) else {
        return;
    };
    task.details.remove(DETAIL_TEMPORARY_ENTRY);
    task.details
        .insert(DETAIL_ENTRY.to_string(), temp_path.clone());
    task.result_code = task_result::ACCEPTED;
    let bus = task.session_bus.clone();
    let task_path = task.path.clone();
    if task.set_status(TaskStatus::Done) {
        ProblemsBroker::notify(
            &broker.clients,
            &bus,
            Event::TaskStatusChanged {
                task: task_path,
                status: TaskStatus::Done,
            },
        );
    }
    info!(entry = %temp_path, uid = owner_uid, "problem accepted");
    ProblemsBroker::crash(&broker.clients, &broker.sessions, &temp_path, owner_uid);
}

/// Deterministic fallback identity: digest of the sorted text elements.
fn synthesize_uuid(broker: &ProblemsBroker, problem: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut names = broker.store.list_elements(problem).unwrap_or_default();
    names.sort();
    let mut hasher = Sha256::new();
    for name in names {
        let Ok(Some(data)) = broker.store.read_element(problem, &name) else {
            continue;
        };
        if std::str::from_utf8(&data).is_ok() {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(&data);
            hasher.update([0]);
        }
    }
    hex::encode(&hasher.finalize()[..16])
}

fn fail_task(broker: &mut ProblemsBroker, path: &str, code: u32, message: &str) -> Stage {
    let Some(task) = broker.tasks.get_mut(path) else {
        return Stage::Finished;
    };
    task.result_code = code;
    task.details
        .insert(DETAIL_ERROR_MESSAGE.to_string(), message.to_string());
    let bus = task.session_bus.clone();
    let task_path = task.path.clone();
    if task.set_status(TaskStatus::Failed) {
        ProblemsBroker::notify(
            &broker.clients,
            &bus,
            Event::TaskStatusChanged {
                task: task_path,
                status: TaskStatus::Failed,
            },
        );
    }
    warn!(task = %path, code, "task failed: {message}");
    Stage::Finished
}

/// Cancellation cleanup: drop the temporary entry and settle the status.
async fn abort_task(shared: &SharedBroker, path: &str) {
    let mut broker = shared.lock().await;
    let Some(task) = broker.tasks.get_mut(path) else {
        return;
    };
    if task.status().is_terminal() {
        return;
    }
    let temp = task.temp_entry.take();
    task.details.remove(DETAIL_TEMPORARY_ENTRY);
    task.result_code = task_result::DROPPED;
    let bus = task.session_bus.clone();
    let task_path = task.path.clone();
    let changed = task.set_status(TaskStatus::Canceled);

    if let Some(temp) = temp {
        if let Some(record) = broker.entries.remove(&temp) {
            if let Err(e) = broker.store.delete(&record.problem) {
                warn!(problem = %record.problem, error = %e, "failed to drop canceled problem");
            }
        }
    }
    if changed {
        ProblemsBroker::notify(
            &broker.clients,
            &bus,
            Event::TaskStatusChanged {
                task: task_path,
                status: TaskStatus::Canceled,
            },
        );
    }
}
