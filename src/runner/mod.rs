//! Script runner: one child process per request.
//!
//! Each request spawns `<interpreter> <script> [-type <value>]` with piped
//! stdout/stderr and hands back a [`RunHandle`] carrying the generated
//! request id and that run's event receiver. Requests are fire-and-forget
//! and unbounded: concurrent requests spawn independent, unrelated
//! processes, each with its own channel.
//!
//! Per run, two reader threads forward stream lines as events and a waiter
//! thread joins them, waits on the child, and sends the single `Exited`
//! event. Joining the readers first is what makes `Exited` the last event
//! of the run.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use async_channel::Receiver;
use tracing::{debug, error, info, instrument};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use crate::config::Config;
use crate::error::{Result, ShellError};
use crate::process_manager::PROCESS_MANAGER;
use crate::protocol::{OutputEvent, RequestId};

mod stream;

pub use stream::{spawn_line_reader, StreamKind};

/// Bound on each run's event channel. Readers block when the consumer falls
/// behind, which backpressures the child through the pipe.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Caller-held handle to one spawned request.
///
/// Dropping the handle does not kill the child; runs are fire-and-forget
/// and the readers drain the pipes regardless.
#[derive(Debug)]
pub struct RunHandle {
    request_id: RequestId,
    pid: u32,
    events: Receiver<OutputEvent>,
}

impl RunHandle {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The run's event stream. Usable from blocking (`recv_blocking`) and
    /// async (`recv`) contexts; closes after the terminal event.
    pub fn events(&self) -> &Receiver<OutputEvent> {
        &self.events
    }

    /// Drain events until the terminal status arrives. Blocking.
    pub fn wait(self) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.recv_blocking() {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

/// Spawns the configured script on request.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    interpreter: PathBuf,
    script: PathBuf,
    working_dir: Option<PathBuf>,
}

impl ScriptRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            interpreter: config.interpreter(),
            script: config.script_path(),
            working_dir: config.working_dir(),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Child argv after the interpreter: the script path plus the optional
    /// `-type` flag. The discriminator passes through untouched.
    fn build_args(script: &Path, run_type: Option<&str>) -> Vec<String> {
        let mut args = vec![script.to_string_lossy().into_owned()];
        if let Some(value) = run_type {
            args.push("-type".to_string());
            args.push(value.to_string());
        }
        args
    }

    /// Spawn one child process for this request.
    ///
    /// Returns immediately with the run's handle; all output and the final
    /// status arrive asynchronously as events. A missing interpreter or an
    /// unspawnable script surfaces here as [`ShellError::ProcessSpawn`];
    /// anything the script itself does wrong arrives as stderr events and a
    /// nonzero exit status.
    #[instrument(skip(self), fields(script = %self.script.display()))]
    pub fn spawn(&self, run_type: Option<&str>) -> Result<RunHandle> {
        let request_id = RequestId::new();
        let args = Self::build_args(&self.script, run_type);
        debug!(interpreter = %self.interpreter.display(), args = ?args, "Spawning script process");

        let mut command = Command::new(&self.interpreter);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        // New process group so the shutdown sweep can kill grandchildren too
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            error!(error = %e, interpreter = %self.interpreter.display(), "Process spawn failed");
            ShellError::ProcessSpawn {
                interpreter: self.interpreter.display().to_string(),
                source: e,
            }
        })?;

        let pid = child.id();
        info!(pid, request_id = %request_id, run_type = run_type.unwrap_or("-"), "Script process spawned");

        let stdout = child
            .stdout
            .take()
            .ok_or(ShellError::StreamCapture("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ShellError::StreamCapture("stderr"))?;
        PROCESS_MANAGER.register(pid, request_id, run_type);

        let (tx, rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let stdout_reader = stream::spawn_line_reader(stdout, StreamKind::Stdout, request_id, tx.clone());
        let stderr_reader = stream::spawn_line_reader(stderr, StreamKind::Stderr, request_id, tx.clone());

        // Waiter: readers first, then the child, then the terminal event.
        thread::spawn(move || {
            let _ = stdout_reader.join();
            let _ = stderr_reader.join();

            let status = child.wait();
            PROCESS_MANAGER.unregister(pid);

            let event = match status {
                Ok(status) => {
                    info!(pid, request_id = %request_id, code = ?status.code(), "Script process exited");
                    OutputEvent::exited(request_id, &status)
                }
                Err(e) => {
                    error!(pid, request_id = %request_id, error = %e, "Failed to reap script process");
                    OutputEvent::Exited {
                        request_id,
                        code: None,
                        success: false,
                    }
                }
            };
            let _ = tx.send_blocking(event);
            // tx drops here; the channel closes once drained
        });

        Ok(RunHandle {
            request_id,
            pid,
            events: rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn sh_runner(script_body: &str) -> (ScriptRunner, TempDir) {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("script.sh");
        let mut file = std::fs::File::create(&script).unwrap();
        write!(file, "{}", script_body).unwrap();

        let runner = ScriptRunner {
            interpreter: PathBuf::from("sh"),
            script,
            working_dir: None,
        };
        (runner, dir)
    }

    #[test]
    fn build_args_without_discriminator_is_script_only() {
        let args = ScriptRunner::build_args(Path::new("scripts/main.py"), None);
        assert_eq!(args, vec!["scripts/main.py"]);
    }

    #[test]
    fn build_args_with_discriminator_appends_type_flag() {
        let args = ScriptRunner::build_args(Path::new("scripts/main.py"), Some("train"));
        assert_eq!(args, vec!["scripts/main.py", "-type", "train"]);
    }

    #[test]
    fn spawn_failure_for_missing_interpreter() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptRunner {
            interpreter: dir.path().join("no-such-interpreter"),
            script: PathBuf::from("whatever.py"),
            working_dir: None,
        };

        match runner.spawn(None) {
            Err(ShellError::ProcessSpawn { interpreter, .. }) => {
                assert!(interpreter.contains("no-such-interpreter"));
            }
            other => panic!("expected spawn failure, got {:?}", other.map(|h| h.pid())),
        }
    }

    #[cfg(unix)]
    #[test]
    fn stdout_then_zero_exit() {
        let (runner, _dir) = sh_runner("echo done\n");
        let handle = runner.spawn(None).unwrap();
        let id = handle.request_id();

        let events = handle.wait();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], OutputEvent::stdout(id, "done"));
        assert_eq!(
            events[1],
            OutputEvent::Exited {
                request_id: id,
                code: Some(0),
                success: true,
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn stderr_then_nonzero_exit() {
        let (runner, _dir) = sh_runner("echo 'bad input' 1>&2\nexit 1\n");
        let handle = runner.spawn(None).unwrap();
        let id = handle.request_id();

        let events = handle.wait();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], OutputEvent::stderr(id, "bad input"));
        assert_eq!(
            events[1],
            OutputEvent::Exited {
                request_id: id,
                code: Some(1),
                success: false,
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn discriminator_reaches_the_child_as_type_flag() {
        let (runner, _dir) = sh_runner("printf '%s %s\\n' \"$1\" \"$2\"\n");
        let events = runner.spawn(Some("train")).unwrap().wait();

        match &events[0] {
            OutputEvent::Stdout { line, .. } => assert_eq!(line, "-type train"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn exactly_one_terminal_event_and_it_is_last() {
        let (runner, _dir) = sh_runner("echo one\necho two 1>&2\necho three\n");
        let events = runner.spawn(None).unwrap().wait();

        let terminal_count = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal_count, 1);
        assert!(events.last().unwrap().is_terminal());

        // Stdout ordering holds regardless of stderr interleaving
        let stdout_lines: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Stdout { line, .. } => Some(line.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout_lines, vec!["one", "three"]);
    }

    #[cfg(unix)]
    #[test]
    fn channel_closes_after_terminal_event() {
        let (runner, _dir) = sh_runner("echo done\n");
        let handle = runner.spawn(None).unwrap();

        let events = handle.events().clone();
        let mut seen_terminal = false;
        while let Ok(event) = events.recv_blocking() {
            if seen_terminal {
                panic!("event after terminal: {:?}", event);
            }
            seen_terminal = event.is_terminal();
        }
        assert!(seen_terminal);
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_runs_terminate_independently() {
        let (first, _dir_a) = sh_runner("echo a\n");
        let (second, _dir_b) = sh_runner("echo b\nexit 3\n");

        let first_handle = first.spawn(Some("a")).unwrap();
        let second_handle = second.spawn(Some("b")).unwrap();
        let first_id = first_handle.request_id();
        let second_id = second_handle.request_id();
        assert_ne!(first_id, second_id);

        let first_events = first_handle.wait();
        let second_events = second_handle.wait();

        // Every event carries the id of its own run
        assert!(first_events.iter().all(|e| e.request_id() == first_id));
        assert!(second_events.iter().all(|e| e.request_id() == second_id));

        assert!(matches!(
            first_events.last().unwrap(),
            OutputEvent::Exited { code: Some(0), .. }
        ));
        assert!(matches!(
            second_events.last().unwrap(),
            OutputEvent::Exited { code: Some(3), .. }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exited_child_is_unregistered() {
        let (runner, _dir) = sh_runner("echo done\n");
        let handle = runner.spawn(None).unwrap();
        let pid = handle.pid();

        // The waiter unregisters before it sends the terminal event
        handle.wait();
        assert!(!PROCESS_MANAGER.active().iter().any(|p| p.pid == pid));
    }

    #[cfg(unix)]
    #[test]
    fn trailing_whitespace_is_stripped_end_to_end() {
        let (runner, _dir) = sh_runner("printf 'padded   \\n'\n");
        let events = runner.spawn(None).unwrap().wait();
        match &events[0] {
            OutputEvent::Stdout { line, .. } => assert_eq!(line, "padded"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
