//! Authorization delegation.
//!
//! Plugins list the commands that need authorization; the named (or
//! default) authorizer plugin decides. Every branch that needs an
//! authorizer emits exactly one audit event.

use std::sync::Arc;

use chatrun_core::{DelegateOutcome, Event, Task, TaskRetVal};
use tracing::{debug, error};

use crate::pipeline::{call_task, TaskSpec};
use crate::robot::Robot;

pub const TECHNICAL_AUTH_ERROR: &str =
    "Sorry, authorization failed due to a problem with the authorization plugin";
pub const CONFIG_AUTH_ERROR: &str = "Sorry, authorization failed due to a configuration error";
pub const NOT_AUTHORIZED: &str = "Sorry, you're not authorized for that command";

/// Decide whether `robot`'s user may run `command` of `task`.
pub async fn check_authorization(
    robot: &Robot,
    task: &Task,
    command: &str,
    args: &[String],
) -> TaskRetVal {
    if let Some(plugin) = task.as_plugin() {
        if !plugin.authorize_all_commands && plugin.authorized_commands.is_empty() {
            if !task.authorizer.is_empty() {
                robot.audit(
                    Event::AuthNoRunMisconfigured,
                    &task.name,
                    format!(
                        "Plugin '{}' configured an authorizer, but has no commands requiring authorization",
                        task.name
                    ),
                );
                robot.say(CONFIG_AUTH_ERROR).await;
                return TaskRetVal::ConfigurationError;
            }
            robot.state.debug.debug_task(task, "no authorization required", true);
            return TaskRetVal::Success;
        }
        if !plugin.authorize_all_commands
            && !plugin.authorized_commands.iter().any(|c| c == command)
        {
            robot.state.debug.debug_task(
                task,
                &format!("command '{}' doesn't require authorization", command),
                true,
            );
            return TaskRetVal::Success;
        }
    } else if task.authorizer.is_empty() {
        robot.state.debug.debug_task(task, "job has no authorizer", true);
        return TaskRetVal::Success;
    }

    let authorizer = if task.authorizer.is_empty() {
        robot.cfg.default_authorizer.as_str()
    } else {
        task.authorizer.as_str()
    };
    if authorizer.is_empty() {
        robot.audit(
            Event::AuthNoRunMisconfigured,
            &task.name,
            format!(
                "Plugin '{}' requires authorization for command '{}', but no authorizer configured",
                task.name, command
            ),
        );
        robot.say(CONFIG_AUTH_ERROR).await;
        return TaskRetVal::ConfigurationError;
    }

    let auth_task: Arc<Task> = match robot.tasks.get_task_by_name(authorizer) {
        Some(t) if t.is_plugin() => t.clone(),
        _ => {
            robot.audit(
                Event::AuthNoRunNotFound,
                &task.name,
                format!(
                    "Auth plugin '{}' not found while authenticating user '{}' calling command '{}' for task '{}' in channel '{}'; AuthRequire: '{}'",
                    authorizer, robot.user, command, task.name, robot.channel, task.auth_require
                ),
            );
            robot.say(TECHNICAL_AUTH_ERROR).await;
            return TaskRetVal::ConfigurationError;
        }
    };
    if auth_task.disabled {
        robot.audit(
            Event::AuthNoRunPlugNotAvailable,
            &task.name,
            format!(
                "Auth plugin '{}' is disabled ({}); can't authenticate user '{}' calling command '{}' for task '{}'",
                auth_task.name, auth_task.reason, robot.user, command, task.name
            ),
        );
        robot.say(TECHNICAL_AUTH_ERROR).await;
        return TaskRetVal::ConfigurationError;
    }

    let mut auth_args = vec![
        task.name.clone(),
        task.auth_require.clone(),
        command.to_string(),
    ];
    auth_args.extend_from_slice(args);
    let spec = TaskSpec::new(auth_task.clone(), "authorize", auth_args);
    let ret = call_task(robot, &spec).await;

    let detail = format!(
        "authorizer '{}', user '{}', command '{}', task '{}', channel '{}'; AuthRequire: '{}'",
        auth_task.name, robot.user, command, task.name, robot.channel, task.auth_require
    );
    match DelegateOutcome::from(ret) {
        DelegateOutcome::Success => {
            robot.audit(
                Event::AuthRanSuccess,
                &task.name,
                format!("Authorization succeeded by {}", detail),
            );
            TaskRetVal::Success
        }
        DelegateOutcome::Fail => {
            robot.audit(
                Event::AuthRanFail,
                &task.name,
                format!("Authorization FAILED by {}", detail),
            );
            robot.say(NOT_AUTHORIZED).await;
            TaskRetVal::Fail
        }
        DelegateOutcome::MechanismFail => {
            robot.audit(
                Event::AuthRanMechanismFailed,
                &task.name,
                format!("Auth plugin mechanism failure; {}", detail),
            );
            robot.say(TECHNICAL_AUTH_ERROR).await;
            TaskRetVal::MechanismFail
        }
        DelegateOutcome::InvalidNormal => {
            robot.audit(
                Event::AuthRanFailNormal,
                &task.name,
                format!(
                    "Auth plugin returned 'Normal' instead of 'Success', failing auth; {}",
                    detail
                ),
            );
            robot.say(TECHNICAL_AUTH_ERROR).await;
            TaskRetVal::MechanismFail
        }
        DelegateOutcome::Invalid(other) => {
            error!(authorizer = %auth_task.name, ret = %other, "Invalid authorizer return value");
            robot.audit(
                Event::AuthRanFailOther,
                &task.name,
                format!("Auth plugin returned {}, failing auth; {}", other, detail),
            );
            robot.say(TECHNICAL_AUTH_ERROR).await;
            debug!(task = %task.name, "authorization failed closed");
            TaskRetVal::MechanismFail
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testutil::{install_tasks, plugin_task, robot_for, scripted, test_state};
    use chatrun_core::{Event, InputMatcher, TaskSource};

    const AUTH_EVENTS: &[Event] = &[
        Event::AuthNoRunMisconfigured,
        Event::AuthNoRunPlugNotAvailable,
        Event::AuthRanSuccess,
        Event::AuthRanFail,
        Event::AuthRanMechanismFailed,
        Event::AuthRanFailNormal,
        Event::AuthRanFailOther,
        Event::AuthNoRunNotFound,
    ];

    fn auth_event_total(state: &crate::state::BotState) -> u64 {
        AUTH_EVENTS.iter().map(|e| state.events.count(*e)).sum()
    }

    fn guarded(name: &str, authorizer: &str) -> Task {
        let mut t = plugin_task(name);
        t.authorizer = authorizer.to_string();
        t.auth_require = "ops".to_string();
        let p = t.as_plugin_mut().unwrap();
        p.command_matchers.push(InputMatcher::command("deploy", "deploy"));
        p.command_matchers.push(InputMatcher::command("status", "status"));
        p.authorized_commands.push("deploy".into());
        t
    }

    #[tokio::test]
    async fn test_not_required_skips_delegate() {
        let (state, _) = test_state(Config::default());
        let auth = scripted(&state, "auth", TaskRetVal::Fail);
        install_tasks(&state, vec![plugin_task("auth"), guarded("deployer", "auth"), plugin_task("plain")]);
        let robot = robot_for(&state, "alice", "ops");

        let tasks = state.tasks();
        let plain = tasks.get_task_by_name("plain").unwrap();
        assert_eq!(
            check_authorization(&robot, plain, "anything", &[]).await,
            TaskRetVal::Success
        );
        let deployer = tasks.get_task_by_name("deployer").unwrap();
        assert_eq!(
            check_authorization(&robot, deployer, "status", &[]).await,
            TaskRetVal::Success
        );
        assert_eq!(auth.calls(), 0);
        assert_eq!(auth_event_total(&state), 0);
    }

    #[tokio::test]
    async fn test_authorizer_without_commands_is_config_error() {
        let (state, conn) = test_state(Config::default());
        let auth = scripted(&state, "auth", TaskRetVal::Success);
        let mut t = plugin_task("careless");
        t.authorizer = "auth".into();
        install_tasks(&state, vec![plugin_task("auth"), t]);
        let robot = robot_for(&state, "alice", "ops");

        let tasks = state.tasks();
        let careless = tasks.get_task_by_name("careless").unwrap();
        assert_eq!(
            check_authorization(&robot, careless, "run", &[]).await,
            TaskRetVal::ConfigurationError
        );
        assert_eq!(auth.calls(), 0);
        assert_eq!(state.events.count(Event::AuthNoRunMisconfigured), 1);
        assert_eq!(conn.messages(), vec![CONFIG_AUTH_ERROR.to_string()]);
    }

    #[tokio::test]
    async fn test_delegate_outcomes_map_to_one_event() {
        let cases = [
            (TaskRetVal::Success, TaskRetVal::Success, Event::AuthRanSuccess),
            (TaskRetVal::Fail, TaskRetVal::Fail, Event::AuthRanFail),
            (TaskRetVal::MechanismFail, TaskRetVal::MechanismFail, Event::AuthRanMechanismFailed),
            (TaskRetVal::Normal, TaskRetVal::MechanismFail, Event::AuthRanFailNormal),
            (TaskRetVal::NotFound, TaskRetVal::MechanismFail, Event::AuthRanFailOther),
            (TaskRetVal::ConfigurationError, TaskRetVal::MechanismFail, Event::AuthRanFailOther),
        ];
        for (delegate_ret, expected, event) in cases {
            let (state, _) = test_state(Config::default());
            let auth = scripted(&state, "auth", delegate_ret);
            install_tasks(&state, vec![plugin_task("auth"), guarded("deployer", "auth")]);
            let robot = robot_for(&state, "alice", "ops");
            let tasks = state.tasks();
            let deployer = tasks.get_task_by_name("deployer").unwrap();

            let ret =
                check_authorization(&robot, deployer, "deploy", &["prod".to_string()]).await;
            assert_eq!(ret, expected, "delegate returned {}", delegate_ret);
            assert_eq!(state.events.count(event), 1, "event for {}", delegate_ret);
            assert_eq!(auth_event_total(&state), 1, "only one event for {}", delegate_ret);
            assert_eq!(auth.calls(), 1);
            assert_eq!(
                auth.last_call(),
                Some((
                    "authorize".to_string(),
                    vec!["deployer".into(), "ops".into(), "deploy".into(), "prod".into()]
                ))
            );
        }
    }

    #[tokio::test]
    async fn test_no_authorizer_configured() {
        let (state, conn) = test_state(Config::default());
        install_tasks(&state, vec![guarded("deployer", "")]);
        let robot = robot_for(&state, "alice", "ops");
        let tasks = state.tasks();
        let deployer = tasks.get_task_by_name("deployer").unwrap();

        assert_eq!(
            check_authorization(&robot, deployer, "deploy", &[]).await,
            TaskRetVal::ConfigurationError
        );
        assert_eq!(state.events.count(Event::AuthNoRunMisconfigured), 1);
        assert_eq!(conn.messages(), vec![CONFIG_AUTH_ERROR.to_string()]);
    }

    #[tokio::test]
    async fn test_default_authorizer_used() {
        let mut cfg = Config::default();
        cfg.default_authorizer = "auth".into();
        let (state, _) = test_state(cfg);
        let auth = scripted(&state, "auth", TaskRetVal::Success);
        install_tasks(&state, vec![plugin_task("auth"), guarded("deployer", "")]);
        let robot = robot_for(&state, "alice", "ops");
        let tasks = state.tasks();
        let deployer = tasks.get_task_by_name("deployer").unwrap();

        assert_eq!(
            check_authorization(&robot, deployer, "deploy", &[]).await,
            TaskRetVal::Success
        );
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_unresolvable_authorizers() {
        let (state, _) = test_state(Config::default());
        let mut disabled = plugin_task("off");
        disabled.disable("broken");
        let job_auth = Task::job("jobauth", TaskSource::Builtin);
        install_tasks(
            &state,
            vec![
                disabled,
                job_auth,
                guarded("a", "missing"),
                guarded("b", "jobauth"),
                guarded("c", "off"),
            ],
        );
        let robot = robot_for(&state, "alice", "ops");
        let tasks = state.tasks();

        for name in ["a", "b"] {
            let t = tasks.get_task_by_name(name).unwrap();
            assert_eq!(
                check_authorization(&robot, t, "deploy", &[]).await,
                TaskRetVal::ConfigurationError
            );
        }
        assert_eq!(state.events.count(Event::AuthNoRunNotFound), 2);

        let c = tasks.get_task_by_name("c").unwrap();
        assert_eq!(
            check_authorization(&robot, c, "deploy", &[]).await,
            TaskRetVal::ConfigurationError
        );
        assert_eq!(state.events.count(Event::AuthNoRunPlugNotAvailable), 1);
    }

    #[tokio::test]
    async fn test_job_requires_authorizer_only_when_set() {
        let (state, _) = test_state(Config::default());
        let auth = scripted(&state, "auth", TaskRetVal::Success);
        let open = Task::job("open", TaskSource::Builtin);
        let mut guarded_job = Task::job("guarded", TaskSource::Builtin);
        guarded_job.authorizer = "auth".into();
        install_tasks(&state, vec![plugin_task("auth"), open, guarded_job]);
        let robot = robot_for(&state, "alice", "ops");
        let tasks = state.tasks();

        let open = tasks.get_task_by_name("open").unwrap();
        assert_eq!(check_authorization(&robot, open, "run", &[]).await, TaskRetVal::Success);
        assert_eq!(auth.calls(), 0);

        let guarded_job = tasks.get_task_by_name("guarded").unwrap();
        assert_eq!(
            check_authorization(&robot, guarded_job, "run", &[]).await,
            TaskRetVal::Success
        );
        assert_eq!(auth.calls(), 1);
    }
}
