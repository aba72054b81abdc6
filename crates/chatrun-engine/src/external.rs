//! External task execution.
//!
//! External plugins and jobs are executables run as `path command args...`
//! with the run environment. Output goes to the run's history log and the
//! exit code is the task's return value.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chatrun_core::{Event, Task, TaskRetVal};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::robot::Robot;
use crate::state::lock;

/// Runs external tasks.
#[async_trait]
pub trait ExternalRunner: Send + Sync {
    /// Default configuration YAML, from `path configure`.
    async fn default_config(&self, path: &str) -> Result<String, EngineError>;

    /// Run `command` of `task`.
    async fn run(
        &self,
        robot: &Robot,
        task: &Task,
        path: &str,
        command: &str,
        args: &[String],
    ) -> TaskRetVal;
}

/// Runs external tasks as child processes.
pub struct ProcessRunner {
    install: PathBuf,
    config: PathBuf,
}

impl ProcessRunner {
    pub fn new(install: PathBuf, config: PathBuf) -> Self {
        Self { install, config }
    }

    /// Relative paths are looked up in the configuration directory first,
    /// then the installation directory.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        if path.is_empty() {
            return None;
        }
        let p = Path::new(path);
        if p.is_absolute() {
            return p.is_file().then(|| p.to_path_buf());
        }
        [&self.config, &self.install]
            .into_iter()
            .map(|dir| dir.join(p))
            .find(|candidate| candidate.is_file())
    }

    fn working_dir(&self, robot: &Robot) -> PathBuf {
        let wd = robot.working_directory();
        if wd.as_os_str().is_empty() {
            self.config.clone()
        } else if wd.is_absolute() {
            wd
        } else {
            self.config.join(wd)
        }
    }
}

#[async_trait]
impl ExternalRunner for ProcessRunner {
    async fn default_config(&self, path: &str) -> Result<String, EngineError> {
        let full = self.resolve(path).ok_or_else(|| EngineError::ExternalConfig {
            path: path.to_string(),
            reason: "not found".to_string(),
        })?;
        let output = Command::new(&full)
            .arg("configure")
            .current_dir(&self.config)
            .env("CHATRUN_INSTALLDIR", &self.install)
            .env("CHATRUN_CONFIGDIR", &self.config)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(EngineError::ExternalConfig {
                path: path.to_string(),
                reason: format!(
                    "'configure' exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run(
        &self,
        robot: &Robot,
        task: &Task,
        path: &str,
        command: &str,
        args: &[String],
    ) -> TaskRetVal {
        let Some(full) = self.resolve(path) else {
            robot.audit(
                Event::ExternalTaskBadPath,
                &task.name,
                format!("Couldn't find executable '{}' for task '{}'", path, task.name),
            );
            return TaskRetVal::MechanismFail;
        };

        let mut cmd = Command::new(&full);
        cmd.arg(command)
            .args(args)
            .envs(robot.environment())
            .current_dir(self.working_dir(robot))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = ?cmd, "Spawning external task");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                robot.audit(
                    Event::ExternalTaskBadPath,
                    &task.name,
                    format!("Unable to start '{}': {}", full.display(), e),
                );
                return TaskRetVal::MechanismFail;
            }
        };
        robot.audit(
            Event::ExternalTaskRan,
            &task.name,
            format!("Running '{}' with command '{}'", full.display(), command),
        );

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            error!(task = %task.name, "Child process has no output handles");
            return TaskRetVal::MechanismFail;
        };
        let mut out = BufReader::new(stdout).lines();
        let mut err = BufReader::new(stderr).lines();
        let (mut out_done, mut err_done) = (false, false);

        while !(out_done && err_done) {
            tokio::select! {
                line = out.next_line(), if !out_done => match line {
                    Ok(Some(line)) => lock(&robot.shared).log_line(&line),
                    Ok(None) => out_done = true,
                    Err(e) => {
                        warn!(task = %task.name, error = %e, "Error reading task stdout");
                        out_done = true;
                    }
                },
                line = err.next_line(), if !err_done => match line {
                    Ok(Some(line)) => {
                        debug!(task = %task.name, stderr = %line, "External task stderr");
                        lock(&robot.shared).log_line(&format!("ERR: {}", line));
                    }
                    Ok(None) => err_done = true,
                    Err(e) => {
                        warn!(task = %task.name, error = %e, "Error reading task stderr");
                        err_done = true;
                    }
                },
                _ = robot.cancel.cancelled() => {
                    info!(task = %task.name, "Run aborted, killing external task");
                    if let Err(e) = child.kill().await {
                        warn!(task = %task.name, error = %e, "Failed to kill external task");
                    }
                    return TaskRetVal::PipelineAborted;
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = robot.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(task = %task.name, error = %e, "Failed to kill external task");
                }
                return TaskRetVal::PipelineAborted;
            }
        };
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!(task = %task.name, error = %e, "Failed waiting for external task");
                return TaskRetVal::MechanismFail;
            }
        };

        match status.code().and_then(TaskRetVal::from_code) {
            Some(ret) => {
                debug!(task = %task.name, ret = %ret, "External task exited");
                ret
            }
            None => {
                robot.audit(
                    Event::ExternalTaskErrExit,
                    &task.name,
                    format!("'{}' exited abnormally: {}", full.display(), status),
                );
                TaskRetVal::MechanismFail
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::history::HistoryLogger;
    use crate::testutil::{robot_for, test_state};
    use chatrun_core::TaskSource;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Captured(Arc<Mutex<Vec<String>>>);

    impl HistoryLogger for Captured {
        fn log(&mut self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }

        fn close(&mut self) {}
    }

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("chatrun-ext-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_output_environment_and_exit_code() {
        let dir = tempdir();
        script(
            &dir,
            "greet.sh",
            "echo \"cmd=$1 arg=$2 target=$TARGET\"\necho oops >&2\nexit 1",
        );
        let (state, _) = test_state(Config::default());
        let robot = robot_for(&state, "alice", "ops");
        robot.set_parameter("TARGET", "db1");
        let lines = Arc::new(Mutex::new(Vec::new()));
        lock(&robot.shared).logger = Some(Box::new(Captured(lines.clone())));

        let runner = ProcessRunner::new(dir.clone(), dir.clone());
        let task = Task::plugin("greet", TaskSource::External { path: "greet.sh".into() });
        let ret = runner
            .run(&robot, &task, "greet.sh", "hello", &["world".to_string()])
            .await;

        assert_eq!(ret, TaskRetVal::Fail);
        let lines = lines.lock().unwrap().clone();
        assert!(lines.contains(&"cmd=hello arg=world target=db1".to_string()));
        assert!(lines.contains(&"ERR: oops".to_string()));
        assert_eq!(state.events.count(Event::ExternalTaskRan), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_bad_path_and_unknown_exit() {
        let dir = tempdir();
        script(&dir, "weird.sh", "exit 42");
        let (state, _) = test_state(Config::default());
        let robot = robot_for(&state, "alice", "ops");
        let runner = ProcessRunner::new(dir.clone(), dir.clone());
        let task = Task::job("weird", TaskSource::External { path: "weird.sh".into() });

        assert_eq!(
            runner.run(&robot, &task, "missing.sh", "run", &[]).await,
            TaskRetVal::MechanismFail
        );
        assert_eq!(state.events.count(Event::ExternalTaskBadPath), 1);

        assert_eq!(
            runner.run(&robot, &task, "weird.sh", "run", &[]).await,
            TaskRetVal::MechanismFail
        );
        assert_eq!(state.events.count(Event::ExternalTaskErrExit), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_abort_kills_process() {
        let dir = tempdir();
        script(&dir, "slow.sh", "sleep 30");
        let (state, _) = test_state(Config::default());
        let robot = robot_for(&state, "alice", "ops");
        let runner = ProcessRunner::new(dir.clone(), dir.clone());
        let task = Task::job("slow", TaskSource::External { path: "slow.sh".into() });

        let cancel = robot.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
        let ret = tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(&robot, &task, "slow.sh", "run", &[]),
        )
        .await
        .unwrap();
        assert_eq!(ret, TaskRetVal::PipelineAborted);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_default_config() {
        let dir = tempdir();
        script(
            &dir,
            "conf.sh",
            "if [ \"$1\" = configure ]; then echo 'Help: []'; exit 0; fi\nexit 1",
        );
        script(&dir, "broken.sh", "exit 3");
        let runner = ProcessRunner::new(dir.clone(), dir.clone());

        assert_eq!(runner.default_config("conf.sh").await.unwrap().trim(), "Help: []");
        assert!(matches!(
            runner.default_config("broken.sh").await,
            Err(EngineError::ExternalConfig { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
