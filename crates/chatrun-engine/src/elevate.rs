//! Elevation (step-up authentication) delegation.

use chatrun_core::{DelegateOutcome, Event, Task, TaskRetVal};
use tracing::error;

use crate::pipeline::{call_task, TaskSpec};
use crate::robot::Robot;
use crate::state::lock;

pub const TECHNICAL_ELEV_ERROR: &str =
    "Sorry, elevation failed due to a problem with the elevation service";
pub const CONFIG_ELEV_ERROR: &str = "Sorry, elevation failed due to a configuration error";
pub const ELEVATION_REQUIRED: &str = "Sorry, this command requires elevation";

/// Run the task's elevator (or the default one). `immediate` asks the
/// elevator not to honor any grace period.
pub async fn elevate(robot: &Robot, task: &Task, immediate: bool) -> TaskRetVal {
    let elevator = if task.elevator.is_empty() {
        robot.cfg.default_elevator.as_str()
    } else {
        task.elevator.as_str()
    };
    if elevator.is_empty() {
        robot.audit(
            Event::ElevNoRunMisconfigured,
            &task.name,
            format!(
                "Task '{}' requires elevation, but no elevator configured",
                task.name
            ),
        );
        robot.say(CONFIG_ELEV_ERROR).await;
        return TaskRetVal::ConfigurationError;
    }

    let elev_task = match robot.tasks.get_task_by_name(elevator) {
        Some(t) if t.is_plugin() => t.clone(),
        _ => {
            robot.audit(
                Event::ElevNoRunNotFound,
                &task.name,
                format!(
                    "Elevator plugin '{}' not found while elevating user '{}' for task '{}' in channel '{}'",
                    elevator, robot.user, task.name, robot.channel
                ),
            );
            robot.say(TECHNICAL_ELEV_ERROR).await;
            return TaskRetVal::ConfigurationError;
        }
    };
    if elev_task.disabled {
        robot.audit(
            Event::ElevNoRunNotAvailable,
            &task.name,
            format!(
                "Elevator plugin '{}' is disabled ({}); can't elevate user '{}' for task '{}'",
                elev_task.name, elev_task.reason, robot.user, task.name
            ),
        );
        robot.say(TECHNICAL_ELEV_ERROR).await;
        return TaskRetVal::ConfigurationError;
    }

    let arg = if immediate { "true" } else { "false" };
    let spec = TaskSpec::new(elev_task.clone(), "elevate", vec![arg.to_string()]);
    let ret = call_task(robot, &spec).await;

    let detail = format!(
        "elevator '{}', user '{}', task '{}', channel '{}'",
        elev_task.name, robot.user, task.name, robot.channel
    );
    match DelegateOutcome::from(ret) {
        DelegateOutcome::Success => {
            robot.audit(
                Event::ElevRanSuccess,
                &task.name,
                format!("Elevation succeeded by {}", detail),
            );
            lock(&robot.shared).elevated = true;
            TaskRetVal::Success
        }
        DelegateOutcome::Fail => {
            robot.audit(
                Event::ElevRanFail,
                &task.name,
                format!("Elevation FAILED by {}", detail),
            );
            robot.say(ELEVATION_REQUIRED).await;
            TaskRetVal::Fail
        }
        DelegateOutcome::MechanismFail => {
            robot.audit(
                Event::ElevRanMechanismFailed,
                &task.name,
                format!("Elevator mechanism failure; {}", detail),
            );
            robot.say(TECHNICAL_ELEV_ERROR).await;
            TaskRetVal::MechanismFail
        }
        DelegateOutcome::InvalidNormal => {
            robot.audit(
                Event::ElevRanFailNormal,
                &task.name,
                format!(
                    "Elevator returned 'Normal' instead of 'Success', failing elevation; {}",
                    detail
                ),
            );
            robot.say(TECHNICAL_ELEV_ERROR).await;
            TaskRetVal::MechanismFail
        }
        DelegateOutcome::Invalid(other) => {
            robot.audit(
                Event::ElevRanFailOther,
                &task.name,
                format!("Elevator returned {}, failing elevation; {}", other, detail),
            );
            robot.say(TECHNICAL_ELEV_ERROR).await;
            TaskRetVal::MechanismFail
        }
    }
}

/// Elevate if `command` of `task` needs it. Returns the result and whether
/// elevation was required; a failed elevation is always `Fail`.
///
/// Plugins elevate only commands listed in `ElevateImmediateCommands` or
/// `ElevatedCommands`, even when they name an elevator. Jobs elevate
/// whenever they name one.
pub async fn check_elevation(robot: &Robot, task: &Task, command: &str) -> (TaskRetVal, bool) {
    let (required, immediate) = match task.as_plugin() {
        Some(plugin) => {
            if plugin.elevate_immediate_commands.iter().any(|c| c == command) {
                (true, true)
            } else if plugin.elevated_commands.iter().any(|c| c == command) {
                (true, false)
            } else {
                (false, false)
            }
        }
        None => (!task.elevator.is_empty(), false),
    };
    if !required {
        return (TaskRetVal::Success, false);
    }
    let ret = elevate(robot, task, immediate).await;
    if ret == TaskRetVal::Success {
        (TaskRetVal::Success, true)
    } else {
        error!(task = %task.name, command = %command, ret = %ret, "Elevation failed");
        (TaskRetVal::Fail, true)
    }
}
