//! Pipeline driver.
//!
//! A pipeline starts with one task and runs whatever that task (and the
//! tasks after it) queue with `add_task`/`add_job`. Every step is
//! authorized and elevated before it runs. Fail tasks run after a failed
//! step; final tasks always run, last added first.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chatrun_core::{Event, RunId, Task, TaskRetVal, TaskSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authorize::check_authorization;
use crate::context::{RunContext, RunShared};
use crate::elevate::check_elevation;
use crate::exclusive::Acquire;
use crate::robot::Robot;
use crate::state::{lock, BotState};

/// A task to run with a command and arguments.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task: Arc<Task>,
    pub command: String,
    pub args: Vec<String>,
}

impl TaskSpec {
    pub fn new(task: Arc<Task>, command: &str, args: Vec<String>) -> Self {
        Self {
            task,
            command: command.to_string(),
            args,
        }
    }
}

/// What started a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineType {
    /// A command addressed to the robot.
    Command,
    /// A message matcher on ambient chat.
    Ambient,
    /// A catch-all plugin for an unmatched command.
    CatchAll,
    /// A job trigger.
    Triggered,
    /// `Robot::spawn_job`.
    Spawned,
    /// A job queued with `add_job`, run as a child pipeline.
    Job,
    /// Plugin initialization after (re)loading tasks.
    Init,
}

impl PipelineType {
    fn event(self) -> Option<Event> {
        match self {
            Self::Command => Some(Event::CommandTaskRan),
            Self::Ambient => Some(Event::AmbientTaskRan),
            Self::CatchAll => Some(Event::CatchAllTaskRan),
            Self::Triggered => Some(Event::TriggeredTaskRan),
            Self::Spawned => Some(Event::SpawnedTaskRan),
            Self::Job => Some(Event::JobTaskRan),
            Self::Init => None,
        }
    }

    fn is_automatic(self) -> bool {
        matches!(self, Self::Triggered | Self::Spawned | Self::Init)
    }
}

/// Future returned by `start_pipeline`; boxed since child jobs recurse.
pub type PipelineFuture<'a> = Pin<Box<dyn Future<Output = TaskRetVal> + Send + 'a>>;

/// Releases the run's exclusive tag when the pipeline ends, however it ends.
struct ExclusiveRelease {
    state: Arc<BotState>,
    shared: Arc<Mutex<RunShared>>,
    run: RunId,
}

impl Drop for ExclusiveRelease {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.exclusive {
            if let Some(tag) = shared.exclusive_tag.as_deref() {
                self.state.exclusive.release(tag, self.run);
            }
            shared.exclusive = false;
        }
    }
}

/// How the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    Completed,
    /// A step returned a failure; fail tasks run.
    Failed,
    /// Cancelled, or the exclusive tag was busy.
    Aborted,
}

/// Run a pipeline for `spec` in `ctx`, registered under `parent` if given.
pub fn start_pipeline<'a>(
    mut ctx: RunContext,
    parent: Option<&'a RunContext>,
    spec: TaskSpec,
    ptype: PipelineType,
) -> PipelineFuture<'a> {
    Box::pin(async move {
        let task = spec.task.clone();
        ctx.pipe_name = task.name.clone();
        ctx.pipe_desc = task.description.clone();
        if ptype.is_automatic() {
            ctx.automatic_task = true;
        }
        ctx.register_active(parent);
        let (Some(run_id), Some(eid)) = (ctx.id, ctx.eid.clone()) else {
            error!(task = %task.name, "Run registration produced no ID");
            return TaskRetVal::MechanismFail;
        };
        let release = ExclusiveRelease {
            state: ctx.state.clone(),
            shared: ctx.shared.clone(),
            run: run_id,
        };

        let keep = task
            .max_histories
            .unwrap_or(ctx.cfg.default_histories);
        let started = ctx.state.history.new_logger(
            &ctx.pipe_name,
            &eid,
            usize::try_from(run_id.get()).unwrap_or(usize::MAX),
            keep,
        );
        let log_index = started.index;
        let log_url = started.url.clone();
        {
            let mut shared = lock(&ctx.shared);
            shared.logger = Some(started.logger);
            shared
                .environment
                .insert("CHATRUN_HISTORY_INDEX".to_string(), log_index.to_string());
        }

        let robot = ctx.make_robot().with_task(task.clone());
        if let Some(event) = ptype.event() {
            robot.audit(
                event,
                &task.name,
                format!(
                    "Running {} '{}' command '{}', run {}",
                    task.kind_name(),
                    task.name,
                    spec.command,
                    run_id
                ),
            );
        }
        info!(
            run_id = %run_id,
            eid = %eid,
            task = %task.name,
            command = %spec.command,
            pipeline = ?ptype,
            history = log_index,
            "Starting pipeline"
        );

        let job = task.as_job().cloned();
        if let Some(job) = job.as_ref() {
            if job.verbose && !job.channel.is_empty() {
                robot
                    .send_channel_message(
                        &job.channel,
                        &format!("Starting job '{}', run {}", task.name, log_index),
                    )
                    .await;
            }
        }

        let (mut ret, ending) = match missing_parameter(&ctx, &task) {
            Some(param) => {
                robot
                    .say(&format!(
                        "Job '{}' is missing required parameter '{}'",
                        task.name, param
                    ))
                    .await;
                (TaskRetVal::Fail, Ending::Failed)
            }
            None => {
                lock(&ctx.shared).next_tasks.push_front(spec);
                run_main(&ctx, run_id, ptype).await
            }
        };

        if ending == Ending::Failed {
            let fail_tasks = std::mem::take(&mut lock(&ctx.shared).fail_tasks);
            for step in fail_tasks {
                run_step(&ctx, &step, ptype, true).await;
            }
        }

        // final tasks run even when the run was aborted
        if ctx.cancel.is_cancelled() {
            ctx.cancel = CancellationToken::new();
        }
        let final_tasks = std::mem::take(&mut lock(&ctx.shared).final_tasks);
        for step in final_tasks.iter().rev() {
            let final_ret = run_step(&ctx, step, ptype, true).await;
            if !final_ret.is_ok() {
                warn!(run_id = %run_id, task = %step.task.name, ret = %final_ret, "Final task failed");
            }
        }

        if ending == Ending::Aborted && ret.is_ok() {
            ret = TaskRetVal::PipelineAborted;
        }

        if let Some(job) = job.as_ref() {
            if job.verbose && !job.channel.is_empty() {
                robot
                    .send_channel_message(
                        &job.channel,
                        &format!(
                            "Finished job '{}', run {}, final task return value: {}",
                            task.name, log_index, ret
                        ),
                    )
                    .await;
            }
            if !ret.is_ok() && !job.notify.is_empty() {
                let mut msg = format!("Job '{}', run {} failed: {}", task.name, log_index, ret);
                if let Some(url) = log_url.as_deref() {
                    msg.push_str(&format!("; log: {}", url));
                }
                robot.send_user_message(&job.notify, &msg).await;
            }
        }

        {
            let mut shared = lock(&ctx.shared);
            shared.log_line(&format!("*** pipeline finished: {}", ret));
            if let Some(mut logger) = shared.logger.take() {
                logger.close();
            }
        }
        info!(run_id = %run_id, task = %task.name, ret = %ret, "Pipeline finished");
        drop(release);
        ctx.deregister();
        ret
    })
}

/// First required parameter of a job missing from the run environment.
fn missing_parameter(ctx: &RunContext, task: &Task) -> Option<String> {
    let job = task.as_job()?;
    let shared = lock(&ctx.shared);
    job.required_parameters
        .iter()
        .find(|p| shared.environment.get(*p).map_or(true, |v| v.is_empty()))
        .cloned()
}

async fn run_main(ctx: &RunContext, run_id: RunId, ptype: PipelineType) -> (TaskRetVal, Ending) {
    let mut ret = TaskRetVal::Normal;
    let mut first = true;
    loop {
        let Some(step) = lock(&ctx.shared).next_tasks.pop_front() else {
            return (ret, Ending::Completed);
        };
        if ctx.cancel.is_cancelled() {
            debug!(run_id = %run_id, task = %step.task.name, "Run aborted, not starting task");
            return (TaskRetVal::PipelineAborted, Ending::Aborted);
        }
        if !acquire_exclusive(ctx, run_id).await {
            return (ret, Ending::Aborted);
        }

        ret = run_step(ctx, &step, ptype, !first).await;
        first = false;
        if ctx.cancel.is_cancelled() {
            return (TaskRetVal::PipelineAborted, Ending::Aborted);
        }
        if !ret.is_ok() {
            return (ret, Ending::Failed);
        }
    }
}

/// Take the exclusive tag a task asked for. Returns false if the pipeline
/// must stop.
async fn acquire_exclusive(ctx: &RunContext, run_id: RunId) -> bool {
    let pending = {
        let shared = lock(&ctx.shared);
        if shared.exclusive {
            None
        } else {
            shared
                .exclusive_tag
                .clone()
                .map(|tag| (tag, shared.queue_task))
        }
    };
    let Some((tag, queue)) = pending else {
        return true;
    };

    let acquired = match ctx.state.exclusive.acquire(&tag, run_id, queue) {
        Acquire::Acquired => true,
        Acquire::Queued(rx) => {
            info!(run_id = %run_id, tag = %tag, "Waiting for exclusive tag");
            tokio::select! {
                got = rx => got.is_ok(),
                _ = ctx.cancel.cancelled() => {
                    ctx.state.exclusive.release(&tag, run_id);
                    false
                }
            }
        }
        Acquire::Busy => {
            info!(run_id = %run_id, tag = %tag, "Exclusive tag busy, aborting pipeline");
            false
        }
    };
    let mut shared = lock(&ctx.shared);
    if acquired {
        shared.exclusive = true;
    } else {
        shared.abort_pipeline = true;
    }
    acquired
}

/// Run one step. Jobs queued after the first step run as child pipelines.
async fn run_step(ctx: &RunContext, step: &TaskSpec, ptype: PipelineType, queued: bool) -> TaskRetVal {
    let task = &step.task;
    let robot = ctx.make_robot().with_task(task.clone());
    lock(&ctx.shared).log_line(&format!(
        "*** {} - {} {}",
        task.name,
        step.command,
        step.args.join(" ")
    ));

    if task.disabled {
        warn!(task = %task.name, reason = %task.reason, "Not running disabled task");
        return TaskRetVal::ConfigurationError;
    }

    if queued && !task.is_plugin() {
        let child = ctx.clone_for_pipeline();
        let env = ctx.environment();
        lock(&child.shared)
            .environment
            .extend(env.into_iter().filter(|(k, _)| !k.starts_with("CHATRUN_")));
        return start_pipeline(child, Some(ctx), step.clone(), PipelineType::Job).await;
    }

    if ptype != PipelineType::Init {
        let auth = check_authorization(&robot, task, &step.command, &step.args).await;
        if auth != TaskRetVal::Success {
            return auth;
        }
        let (elev, _) = check_elevation(&robot, task, &step.command).await;
        if elev != TaskRetVal::Success {
            return elev;
        }
    }

    call_task(&robot, step).await
}

/// Invoke a task directly, without security checks.
pub async fn call_task(robot: &Robot, spec: &TaskSpec) -> TaskRetVal {
    let task = &spec.task;
    let robot = robot.with_task(task.clone());
    let state = robot.state.clone();
    state.debug.debug_task(
        task,
        &format!("running command '{}', args: {:?}", spec.command, spec.args),
        false,
    );
    match &task.source {
        TaskSource::Builtin => {
            let Some(plugin) = state.plugin(&task.name) else {
                error!(task = %task.name, "No handler registered for built-in task");
                return TaskRetVal::MechanismFail;
            };
            robot.audit(
                Event::BuiltinTaskRan,
                &task.name,
                format!("Called built-in {} with command '{}'", task.kind_name(), spec.command),
            );
            plugin.handler.handle(&robot, &spec.command, &spec.args).await
        }
        TaskSource::External { path } => {
            state
                .external()
                .run(&robot, task, path, &spec.command, &spec.args)
                .await
        }
    }
}
