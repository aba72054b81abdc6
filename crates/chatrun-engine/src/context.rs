//! Run contexts and the active-run registry.
//!
//! A `RunContext` is owned by the pipeline driving it. Registration gives
//! it a non-zero run ID and an 8 hex digit correlation token and publishes
//! a `RunHandle` so the JSON bridge and admin commands can find it.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chatrun_core::{
    roster::{bracket, extract_id},
    CallerId, IncomingMessage, MessageFormat, Protocol, RunId, UserChanMaps,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::history::HistoryLogger;
use crate::pipeline::TaskSpec;
use crate::registry::TaskList;
use crate::robot::Robot;
use crate::state::{lock, BotState};

/// Run state shared between the pipeline and the `Robot` facades it hands
/// to tasks.
#[derive(Default)]
pub(crate) struct RunShared {
    /// Environment for tasks; also holds parameters set by tasks.
    pub environment: HashMap<String, String>,
    pub working_directory: PathBuf,
    pub base_directory: PathBuf,
    pub next_tasks: VecDeque<TaskSpec>,
    pub final_tasks: Vec<TaskSpec>,
    pub fail_tasks: Vec<TaskSpec>,
    /// Requested exclusive tag, namespaced.
    pub exclusive_tag: Option<String>,
    pub queue_task: bool,
    /// Set once the tag is held.
    pub exclusive: bool,
    pub abort_pipeline: bool,
    pub elevated: bool,
    pub logger: Option<Box<dyn HistoryLogger>>,
}

impl RunShared {
    /// Write a line to the run's history log, if it has one.
    pub fn log_line(&mut self, line: &str) {
        if let Some(logger) = self.logger.as_mut() {
            logger.log(line);
        }
    }
}

/// Published view of an active run.
pub struct RunHandle {
    pub id: RunId,
    pub eid: CallerId,
    pub pipe_name: String,
    pub user: String,
    pub channel: String,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    robot: Robot,
}

impl RunHandle {
    /// A facade on the run, for callers holding its correlation token.
    pub fn robot(&self) -> Robot {
        self.robot.clone()
    }
}

struct ActiveRun {
    handle: Arc<RunHandle>,
    parent: Option<RunId>,
    child: Option<RunId>,
}

#[derive(Default)]
struct Active {
    runs: HashMap<RunId, ActiveRun>,
    eids: HashMap<CallerId, RunId>,
}

type EidSource = Box<dyn Fn() -> [u8; 4] + Send + Sync>;

fn random_eid() -> [u8; 4] {
    let mut b = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut b);
    b
}

/// Registry of active runs.
pub struct ActiveRuns {
    /// Last run ID handed out; has its own lock.
    counter: Mutex<u64>,
    active: Mutex<Active>,
    eid_source: EidSource,
}

impl ActiveRuns {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Registry whose next run ID is `last + 1` (skipping 0).
    pub fn starting_at(last: u64) -> Self {
        Self {
            counter: Mutex::new(last),
            active: Mutex::new(Active::default()),
            eid_source: Box::new(random_eid),
        }
    }

    /// Use `source` for correlation token bytes.
    pub fn with_eid_source(mut self, source: impl Fn() -> [u8; 4] + Send + Sync + 'static) -> Self {
        self.eid_source = Box::new(source);
        self
    }

    fn next_id(&self) -> RunId {
        let mut counter = lock(&self.counter);
        loop {
            *counter = counter.wrapping_add(1);
            if let Some(id) = RunId::new(*counter) {
                return id;
            }
        }
    }

    /// Assign an ID and token, build the handle and publish it, linking it
    /// under `parent`.
    fn publish(
        &self,
        parent: Option<RunId>,
        build: impl FnOnce(RunId, CallerId) -> RunHandle,
    ) -> Arc<RunHandle> {
        let mut active = lock(&self.active);
        let mut id = self.next_id();
        while active.runs.contains_key(&id) {
            id = self.next_id();
        }
        let eid = loop {
            let eid = CallerId::from_bytes((self.eid_source)());
            if !active.eids.contains_key(&eid) {
                break eid;
            }
            debug!(eid = %eid, "Correlation token collision, retrying");
        };

        let handle = Arc::new(build(id, eid.clone()));
        if let Some(parent_id) = parent {
            if let Some(p) = active.runs.get_mut(&parent_id) {
                p.child = Some(id);
            }
        }
        active.eids.insert(eid, id);
        active.runs.insert(
            id,
            ActiveRun {
                handle: handle.clone(),
                parent,
                child: None,
            },
        );
        handle
    }

    /// Remove a run; only removes the slot if it still belongs to `eid`.
    fn remove(&self, id: RunId, eid: &CallerId) -> bool {
        let mut active = lock(&self.active);
        let owned = active.runs.get(&id).is_some_and(|r| r.handle.eid == *eid);
        if !owned {
            return false;
        }
        if let Some(run) = active.runs.remove(&id) {
            if let Some(parent) = run.parent.and_then(|p| active.runs.get_mut(&p)) {
                if parent.child == Some(id) {
                    parent.child = None;
                }
            }
        }
        active.eids.remove(eid);
        true
    }

    pub fn get(&self, id: u64) -> Option<Arc<RunHandle>> {
        let id = RunId::new(id)?;
        lock(&self.active).runs.get(&id).map(|r| r.handle.clone())
    }

    pub fn get_by_eid(&self, eid: &str) -> Option<Arc<RunHandle>> {
        let active = lock(&self.active);
        let id = active.eids.get(&CallerId::new(eid))?;
        active.runs.get(id).map(|r| r.handle.clone())
    }

    pub fn parent_of(&self, id: RunId) -> Option<RunId> {
        lock(&self.active).runs.get(&id).and_then(|r| r.parent)
    }

    pub fn child_of(&self, id: RunId) -> Option<RunId> {
        lock(&self.active).runs.get(&id).and_then(|r| r.child)
    }

    /// Active runs ordered by ID.
    pub fn list(&self) -> Vec<Arc<RunHandle>> {
        let mut runs: Vec<_> = lock(&self.active)
            .runs
            .values()
            .map(|r| r.handle.clone())
            .collect();
        runs.sort_by_key(|r| r.id);
        runs
    }

    pub fn len(&self) -> usize {
        lock(&self.active).runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActiveRuns {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a pipeline run knows about itself.
pub struct RunContext {
    pub(crate) state: Arc<BotState>,
    pub(crate) id: Option<RunId>,
    pub(crate) eid: Option<CallerId>,

    pub(crate) user: String,
    pub(crate) protocol_user: String,
    pub(crate) channel: String,
    pub(crate) protocol_channel: String,
    pub(crate) protocol: Protocol,
    pub(crate) format: MessageFormat,
    pub(crate) direct_msg: bool,
    pub(crate) bot_user: bool,
    pub(crate) listed_user: bool,
    pub(crate) incoming: Option<Arc<IncomingMessage>>,
    /// Started by a trigger or spawn rather than a user command.
    pub(crate) automatic_task: bool,

    // Snapshots taken when the run started.
    pub(crate) tasks: Arc<TaskList>,
    pub(crate) maps: Arc<UserChanMaps>,
    pub(crate) cfg: Arc<Config>,

    pub(crate) pipe_name: String,
    pub(crate) pipe_desc: String,
    pub(crate) ns_extension: String,

    pub(crate) shared: Arc<Mutex<RunShared>>,
    pub(crate) cancel: CancellationToken,
    handle: Option<Arc<RunHandle>>,
}

impl RunContext {
    /// A context with no requester, using the current configuration.
    pub fn new(state: &Arc<BotState>) -> Self {
        Self {
            state: state.clone(),
            id: None,
            eid: None,
            user: String::new(),
            protocol_user: String::new(),
            channel: String::new(),
            protocol_channel: String::new(),
            protocol: Protocol::default(),
            format: MessageFormat::default(),
            direct_msg: false,
            bot_user: false,
            listed_user: false,
            incoming: None,
            automatic_task: false,
            tasks: state.tasks(),
            maps: state.maps(),
            cfg: state.config(),
            pipe_name: String::new(),
            pipe_desc: String::new(),
            ns_extension: String::new(),
            shared: Arc::new(Mutex::new(RunShared::default())),
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    /// A context for an incoming chat message.
    pub fn from_message(state: &Arc<BotState>, msg: &IncomingMessage) -> Self {
        let mut ctx = Self::new(state);
        ctx.user = msg.user.clone();
        ctx.protocol_user = msg.protocol_user.clone();
        ctx.channel = msg.channel.clone();
        ctx.protocol_channel = msg.protocol_channel.clone();
        ctx.protocol = msg.protocol;
        ctx.direct_msg = msg.direct;
        let rostered = ctx.maps.user(&msg.user);
        ctx.listed_user = rostered.is_some();
        ctx.bot_user = msg.bot_user || rostered.is_some_and(|u| u.bot_user);
        ctx.incoming = Some(Arc::new(msg.clone()));
        ctx
    }

    /// An independent pipeline started from a task, e.g. by `spawn_job`.
    pub(crate) fn from_robot(robot: &Robot) -> Self {
        let mut ctx = Self::new(&robot.state);
        ctx.user = robot.user.clone();
        ctx.protocol_user = robot.protocol_user.clone();
        ctx.channel = robot.channel.clone();
        ctx.protocol_channel = robot.protocol_channel.clone();
        ctx.protocol = robot.protocol;
        ctx.direct_msg = robot.direct_msg;
        ctx.incoming = robot.incoming.clone();
        ctx.tasks = robot.tasks.clone();
        ctx.maps = robot.maps.clone();
        ctx.cfg = robot.cfg.clone();
        ctx
    }

    pub fn id(&self) -> Option<RunId> {
        self.id
    }

    pub fn eid(&self) -> Option<&CallerId> {
        self.eid.as_ref()
    }

    /// Snapshot of the run environment.
    pub fn environment(&self) -> HashMap<String, String> {
        lock(&self.shared).environment.clone()
    }

    /// Resolve protocol IDs, assign the run ID and correlation token,
    /// install the run environment and publish the run, linked under
    /// `parent`. Registering twice is a no-op.
    pub fn register_active(&mut self, parent: Option<&RunContext>) {
        if self.handle.is_some() {
            return;
        }

        if !self.user.is_empty() && self.protocol_user.is_empty() {
            self.protocol_user = if extract_id(&self.user).is_some() {
                self.user.clone()
            } else {
                match self.maps.user(&self.user) {
                    Some(u) if !u.user_id.is_empty() => bracket(&u.user_id),
                    _ => self.user.clone(),
                }
            };
        }
        if !self.channel.is_empty() && self.protocol_channel.is_empty() {
            self.protocol_channel = if extract_id(&self.channel).is_some() {
                self.channel.clone()
            } else {
                match self.maps.channel(&self.channel) {
                    Some(c) if !c.channel_id.is_empty() => bracket(&c.channel_id),
                    _ => self.channel.clone(),
                }
            };
        }
        self.format = self.cfg.default_message_format;

        let parent_id = parent.and_then(|p| p.id);
        let handle = self.state.runs.publish(parent_id, |id, eid| {
            let mut robot = self.make_robot();
            robot.id = Some(id);
            robot.eid = Some(eid.clone());
            RunHandle {
                id,
                eid,
                pipe_name: self.pipe_name.clone(),
                user: self.user.clone(),
                channel: self.channel.clone(),
                started_at: Utc::now(),
                cancel: self.cancel.clone(),
                robot,
            }
        });
        self.id = Some(handle.id);
        self.eid = Some(handle.eid.clone());

        let paths = &self.state.paths;
        let mut shared = lock(&self.shared);
        let env = &mut shared.environment;
        env.insert(
            "CHATRUN_INSTALLDIR".to_string(),
            paths.install.display().to_string(),
        );
        env.insert(
            "CHATRUN_CONFIGDIR".to_string(),
            paths.config.display().to_string(),
        );
        env.insert(
            "CHATRUN_HTTP_POST".to_string(),
            format!("http://{}", self.cfg.http_listen),
        );
        env.insert("CHATRUN_CALLER_ID".to_string(), handle.eid.to_string());
        drop(shared);

        debug!(run_id = %handle.id, eid = %handle.eid, parent = ?parent_id, "Registered run");
        self.handle = Some(handle);
    }

    /// Remove the run from the active registry. Safe to call more than once.
    pub fn deregister(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.state.runs.remove(handle.id, &handle.eid);
            debug!(run_id = %handle.id, "Deregistered run");
        }
    }

    /// A new context for a sub-pipeline: same snapshots and requester, a
    /// fresh environment and working directory. Aborting this run also
    /// aborts the clone.
    pub fn clone_for_pipeline(&self) -> RunContext {
        let base_directory = lock(&self.shared).base_directory.clone();
        RunContext {
            state: self.state.clone(),
            id: None,
            eid: None,
            user: self.user.clone(),
            protocol_user: self.protocol_user.clone(),
            channel: self.channel.clone(),
            protocol_channel: self.protocol_channel.clone(),
            protocol: self.protocol,
            format: self.format,
            direct_msg: self.direct_msg,
            bot_user: self.bot_user,
            listed_user: self.listed_user,
            incoming: self.incoming.clone(),
            automatic_task: self.automatic_task,
            tasks: self.tasks.clone(),
            maps: self.maps.clone(),
            cfg: self.cfg.clone(),
            pipe_name: self.pipe_name.clone(),
            pipe_desc: self.pipe_desc.clone(),
            ns_extension: self.ns_extension.clone(),
            shared: Arc::new(Mutex::new(RunShared {
                base_directory,
                ..Default::default()
            })),
            cancel: self.cancel.child_token(),
            handle: None,
        }
    }

    /// The facade handed to task code.
    pub fn make_robot(&self) -> Robot {
        Robot {
            user: self.user.clone(),
            protocol_user: self.protocol_user.clone(),
            channel: self.channel.clone(),
            protocol_channel: self.protocol_channel.clone(),
            protocol: self.protocol,
            format: self.format,
            incoming: self.incoming.clone(),
            id: self.id,
            eid: self.eid.clone(),
            automatic_task: self.automatic_task,
            direct_msg: self.direct_msg,
            current_task: None,
            ns_extension: self.ns_extension.clone(),
            cfg: self.cfg.clone(),
            tasks: self.tasks.clone(),
            maps: self.maps.clone(),
            state: self.state.clone(),
            shared: self.shared.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        self.deregister();
    }
}
