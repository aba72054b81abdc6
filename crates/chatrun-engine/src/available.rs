//! Task availability: may this requester see this task here?

use chatrun_core::Task;
use regex::Regex;

use crate::robot::Robot;

/// Match `name` against a shell-style glob (`*`, `?`, `[...]`).
/// Malformed patterns match nothing.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                let mut closed = false;
                for (i, c) in chars.by_ref().enumerate() {
                    match c {
                        ']' if i > 0 => {
                            closed = true;
                            break;
                        }
                        '^' | '!' if i == 0 => re.push('^'),
                        '\\' | '[' | '&' | '~' | '-' if i == 0 => {
                            re.push('\\');
                            re.push(c);
                        }
                        '\\' | '[' | '&' | '~' => {
                            re.push('\\');
                            re.push(c);
                        }
                        _ => re.push(c),
                    }
                }
                if !closed {
                    return false;
                }
                re.push(']');
            }
            '\\' => match chars.next() {
                Some(escaped) => re.push_str(&regex::escape(&escaped.to_string())),
                None => return false,
            },
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).is_ok_and(|re| re.is_match(name))
}

impl Robot {
    /// Whether `task` is available to this robot's user in this channel.
    ///
    /// `help_system` relaxes the direct-message and channel checks so help
    /// can list everything a user could run somewhere. `verbose_only`
    /// marks the debug output as only interesting for verbose debugging.
    pub fn plugin_available(&self, task: &Task, help_system: bool, verbose_only: bool) -> bool {
        let place = if self.direct_msg {
            "(direct message)".to_string()
        } else {
            self.channel.clone()
        };
        let not_visible = format!(
            "task is NOT visible to user {} in channel {}",
            self.user, place
        );
        let debug = |msg: String| {
            self.state.debug.debug_task(task, &msg, verbose_only);
        };

        if task.disabled {
            debug(format!(
                "{}; task is disabled, possibly due to configuration error",
                not_visible
            ));
            return false;
        }
        if !self.direct_msg && task.direct_only && !help_system {
            debug(format!(
                "{}; only available by direct message: DirectOnly is TRUE",
                not_visible
            ));
            return false;
        }
        if self.direct_msg && !task.allow_direct && !help_system {
            debug(format!(
                "{}; not available by direct message: AllowDirect is FALSE",
                not_visible
            ));
            return false;
        }
        if task.require_admin && !self.cfg.is_admin(&self.user) {
            debug(format!(
                "{}; RequireAdmin is TRUE and user isn't an Admin",
                not_visible
            ));
            return false;
        }
        if !task.users.is_empty() && !task.users.iter().any(|u| glob_match(u, &self.user)) {
            debug(format!("{}; user is not on the list of allowed users", not_visible));
            return false;
        }

        let available = if self.direct_msg && (task.allow_direct || task.direct_only) {
            true
        } else if !task.channels.is_empty() {
            task.channels.iter().any(|c| *c == self.channel) || help_system
        } else {
            task.all_channels || help_system
        };

        if available {
            debug(format!(
                "task is visible to user {} in channel {}",
                self.user, place
            ));
        } else {
            debug(format!(
                "{}; channel '{}' is not on the list of allowed channels: {}",
                not_visible,
                self.channel,
                task.channels.join(", ")
            ));
        }
        available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::testutil::{direct_robot_for, plugin_task, robot_for, test_state};

    #[test]
    fn test_glob_match() {
        assert!(glob_match("alice", "alice"));
        assert!(glob_match("ali*", "alice"));
        assert!(glob_match("?lice", "alice"));
        assert!(glob_match("[ab]lice", "blice"));
        assert!(!glob_match("[!ab]lice", "alice"));
        assert!(!glob_match("bob", "alice"));
        assert!(!glob_match("a.ice", "alice"));
        assert!(!glob_match("[abc", "alice"));
    }

    #[test]
    fn test_direct_only_not_visible_in_channel() {
        let (state, _) = test_state(Config::default());
        let mut task = plugin_task("secret");
        task.direct_only = true;
        task.allow_direct = true;

        assert!(!robot_for(&state, "alice", "general").plugin_available(&task, false, false));
        // help still lists it
        assert!(robot_for(&state, "alice", "general").plugin_available(&task, true, false));
        assert!(direct_robot_for(&state, "alice").plugin_available(&task, false, false));
    }

    #[test]
    fn test_require_admin() {
        let mut cfg = Config::default();
        cfg.admin_users.push("alice".into());
        let (state, _) = test_state(cfg);
        let mut task = plugin_task("admin-only");
        task.require_admin = true;

        assert!(robot_for(&state, "alice", "general").plugin_available(&task, false, false));
        assert!(!robot_for(&state, "bob", "general").plugin_available(&task, false, false));
    }

    #[test]
    fn test_user_globs() {
        let (state, _) = test_state(Config::default());
        let mut task = plugin_task("ops-only");
        task.users = vec!["ops-*".into(), "carol".into()];

        assert!(robot_for(&state, "ops-dave", "general").plugin_available(&task, false, false));
        assert!(robot_for(&state, "carol", "general").plugin_available(&task, false, false));
        assert!(!robot_for(&state, "dave", "general").plugin_available(&task, false, false));
    }

    #[test]
    fn test_channel_list() {
        let (state, _) = test_state(Config::default());
        let mut task = plugin_task("deploy");
        task.all_channels = false;
        task.channels = vec!["ops".into()];

        assert!(robot_for(&state, "alice", "ops").plugin_available(&task, false, false));
        assert!(!robot_for(&state, "alice", "random").plugin_available(&task, false, false));
        assert!(robot_for(&state, "alice", "random").plugin_available(&task, true, false));
    }

    #[test]
    fn test_disabled_and_direct() {
        let (state, _) = test_state(Config::default());
        let mut task = plugin_task("broken");
        task.disable("bad config");
        assert!(!robot_for(&state, "alice", "ops").plugin_available(&task, true, false));

        let mut no_dm = plugin_task("channel-only");
        no_dm.allow_direct = false;
        assert!(!direct_robot_for(&state, "alice").plugin_available(&no_dm, false, false));
        assert!(direct_robot_for(&state, "alice").plugin_available(&no_dm, true, false));
    }
}
