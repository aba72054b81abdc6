//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;

use crate::state::BotState;

/// Collect all metrics from the robot state and format as Prometheus text.
pub fn collect_metrics(state: &BotState) -> String {
    let mut output = String::new();

    collect_run_metrics(state, &mut output);
    collect_task_metrics(state, &mut output);
    collect_event_metrics(state, &mut output);

    output
}

/// Active pipelines.
fn collect_run_metrics(state: &BotState, output: &mut String) {
    let active = state.runs.len();

    writeln!(
        output,
        "# HELP chatrun_active_runs Number of pipelines currently running"
    )
    .ok();
    writeln!(output, "# TYPE chatrun_active_runs gauge").ok();
    writeln!(output, "chatrun_active_runs {active}").ok();
}

/// Configured tasks by kind and state.
fn collect_task_metrics(state: &BotState, output: &mut String) {
    let tasks = state.tasks();

    let mut counts = [[0u64; 2]; 2];
    for task in tasks.iter() {
        let kind = usize::from(!task.is_plugin());
        let disabled = usize::from(task.disabled);
        counts[kind][disabled] += 1;
    }

    writeln!(output).ok();
    writeln!(
        output,
        "# HELP chatrun_tasks_total Number of configured tasks by kind and state"
    )
    .ok();
    writeln!(output, "# TYPE chatrun_tasks_total gauge").ok();
    for (k, kind) in ["plugin", "job"].iter().enumerate() {
        for (s, status) in ["enabled", "disabled"].iter().enumerate() {
            writeln!(
                output,
                "chatrun_tasks_total{{kind=\"{kind}\",state=\"{status}\"}} {}",
                counts[k][s]
            )
            .ok();
        }
    }
}

/// Audit event counters.
fn collect_event_metrics(state: &BotState, output: &mut String) {
    writeln!(output).ok();
    writeln!(
        output,
        "# HELP chatrun_events_total Audit events emitted since startup"
    )
    .ok();
    writeln!(output, "# TYPE chatrun_events_total counter").ok();
    for (event, count) in state.events.snapshot() {
        writeln!(
            output,
            "chatrun_events_total{{event=\"{}\"}} {count}",
            event.name()
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testutil::{bare_state, install_tasks, plugin_task};
    use chatrun_core::{AuditRecord, Event, Task, TaskSource};

    #[test]
    fn test_collect_metrics_empty_state() {
        let (state, _) = bare_state(Config::default());
        let output = collect_metrics(&state);

        assert!(output.contains("chatrun_active_runs 0"));
        assert!(output.contains("chatrun_tasks_total{kind=\"plugin\",state=\"enabled\"} 0"));
        assert!(output.contains("# TYPE chatrun_events_total counter"));
    }

    #[test]
    fn test_collect_metrics_counts() {
        let (state, _) = bare_state(Config::default());
        let mut broken = plugin_task("broken");
        broken.disable("bad config");
        install_tasks(
            &state,
            vec![
                plugin_task("ok"),
                broken,
                Task::job("nightly", TaskSource::Builtin),
            ],
        );
        state.events.emit(AuditRecord::new(Event::IgnoredUser, "", "spam", "ops", ""));
        state.events.emit(AuditRecord::new(Event::IgnoredUser, "", "spam", "ops", ""));

        let output = collect_metrics(&state);
        assert!(output.contains("chatrun_tasks_total{kind=\"plugin\",state=\"enabled\"} 1"));
        assert!(output.contains("chatrun_tasks_total{kind=\"plugin\",state=\"disabled\"} 1"));
        assert!(output.contains("chatrun_tasks_total{kind=\"job\",state=\"enabled\"} 1"));
        assert!(output.contains(&format!(
            "chatrun_events_total{{event=\"{}\"}} 2",
            Event::IgnoredUser.name()
        )));
    }
}
