//! Run the analyzer and stream its output lines while it runs.
//!
//! Two reader threads drain stdout and stderr into a bounded queue, and a
//! waiter thread polls for exit so it can honor cancellation and the
//! optional timeout. The calling thread is the queue's only consumer, so the
//! line callback never runs concurrently with itself.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::types::{CancellationToken, Channel, OutputLine, ToolExit, ToolInvocation};
use crate::error::PipelineError;

/// Default bound of the line queue between readers and the consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Abstraction over analyzer execution. Tests substitute scripted runners.
pub trait ToolRunner {
    /// Run the tool to completion, calling `on_line` for every captured line
    /// and once per channel with an end-of-stream marker.
    ///
    /// Returns the exit status; a non-zero exit is not an error here.
    fn run(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> Result<ToolExit, PipelineError>;
}

/// Spawns the analyzer as a real child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    cancel: CancellationToken,
    queue_capacity: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: CancellationToken::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the tool if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Zero is treated as one.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Everything the consumer hears about a running tool, on one queue.
enum RunMessage {
    Line(OutputLine),
    ReadFailed(io::Error),
    /// Sent once by the waiter when the process is gone.
    Waited(io::Result<WaitOutcome>),
}

#[derive(Debug)]
enum WaitOutcome {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
    /// Killed because output capture failed.
    Aborted,
}

impl ToolRunner for ProcessRunner {
    #[instrument(skip_all, fields(program = %invocation.program.display(), timeout_secs = self.timeout.map(|t| t.as_secs())))]
    fn run(
        &self,
        invocation: &ToolInvocation,
        on_line: &mut dyn FnMut(&OutputLine),
    ) -> Result<ToolExit, PipelineError> {
        let program = &invocation.program;
        match program.parent() {
            Some(dir) if dir.is_dir() => {}
            Some(dir) => return Err(PipelineError::DirectoryNotFound(dir.to_path_buf())),
            None => return Err(PipelineError::DirectoryNotFound(program.clone())),
        }
        if !program.is_file() {
            return Err(PipelineError::ExecutableNotFound(program.clone()));
        }

        let mut cmd = Command::new(program);
        cmd.args(&invocation.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(args = ?invocation.args, "spawning analyzer");
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(err = %source, "failed to spawn analyzer");
                return Err(PipelineError::ProcessLaunch {
                    program: program.clone(),
                    source,
                });
            }
        };

        // Closing stdin makes a child that reads it see EOF instead of blocking.
        drop(child.stdin.take());

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                kill_and_reap(&mut child);
                return Err(PipelineError::OutputCapture {
                    program: program.clone(),
                    source: io::Error::other("output was not piped"),
                });
            }
        };

        let (tx, rx) = mpsc::sync_channel(self.queue_capacity);
        let stdout_tx = tx.clone();
        let waiter_tx = tx.clone();
        let stdout_handle = thread::spawn(move || read_lines(Channel::Stdout, stdout, stdout_tx));
        let stderr_handle = thread::spawn(move || read_lines(Channel::Stderr, stderr, tx));

        let abort = CancellationToken::new();
        let waiter_abort = abort.clone();
        let cancel = self.cancel.clone();
        let timeout = self.timeout;
        let waiter = thread::spawn(move || {
            let outcome = wait_for_exit(child, &cancel, &waiter_abort, timeout);
            let _ = waiter_tx.send(RunMessage::Waited(outcome));
        });

        let mut capture_error: Option<io::Error> = None;
        let mut waited: Option<io::Result<WaitOutcome>> = None;
        let mut killed = false;
        for message in &rx {
            match message {
                RunMessage::Line(line) => on_line(&line),
                RunMessage::ReadFailed(err) => {
                    error!(err = %err, "reading analyzer output failed, killing");
                    abort.cancel();
                    if capture_error.is_none() {
                        capture_error = Some(err);
                    }
                }
                RunMessage::Waited(outcome) => {
                    killed = !matches!(outcome, Ok(WaitOutcome::Exited(_)));
                    waited = Some(outcome);
                    if killed {
                        break;
                    }
                }
            }
        }
        // Processes the tool left behind may still hold the pipes open; once
        // the tool is killed its readers are detached rather than awaited.
        drop(rx);

        if killed {
            debug!("analyzer killed, remaining output discarded");
        } else {
            let joined = [stdout_handle.join(), stderr_handle.join()];
            if joined.iter().any(Result::is_err) && capture_error.is_none() {
                capture_error = Some(io::Error::other("output reader thread panicked"));
            }
        }
        let outcome = match (waited, waiter.join()) {
            (Some(outcome), _) => outcome,
            (None, Ok(())) => Err(io::Error::other("process waiter reported no status")),
            (None, Err(_)) => Err(io::Error::other("process waiter thread panicked")),
        };

        let outcome = outcome.map_err(|source| PipelineError::OutputCapture {
            program: program.clone(),
            source,
        })?;
        if let Some(source) = capture_error {
            return Err(PipelineError::OutputCapture {
                program: program.clone(),
                source,
            });
        }

        match outcome {
            WaitOutcome::Exited(status) => {
                debug!(exit_code = ?status.code(), "analyzer finished");
                Ok(ToolExit {
                    code: status.code(),
                })
            }
            WaitOutcome::Cancelled => Err(PipelineError::Cancelled),
            WaitOutcome::TimedOut => Err(PipelineError::TimedOut {
                program: program.clone(),
                secs: timeout.map_or(0, |t| t.as_secs()),
            }),
            WaitOutcome::Aborted => Err(PipelineError::OutputCapture {
                program: program.clone(),
                source: io::Error::other("analyzer killed after output capture failed"),
            }),
        }
    }
}

fn wait_for_exit(
    mut child: Child,
    cancel: &CancellationToken,
    abort: &CancellationToken,
    timeout: Option<Duration>,
) -> io::Result<WaitOutcome> {
    let started = Instant::now();
    loop {
        match child.wait_timeout(POLL_INTERVAL) {
            Ok(Some(status)) => return Ok(WaitOutcome::Exited(status)),
            Ok(None) => {}
            Err(err) => {
                kill_and_reap(&mut child);
                return Err(err);
            }
        }
        let outcome = if cancel.is_cancelled() {
            warn!("run cancelled, killing analyzer");
            WaitOutcome::Cancelled
        } else if abort.is_cancelled() {
            WaitOutcome::Aborted
        } else if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            warn!(
                timeout_secs = timeout.map(|t| t.as_secs()),
                "analyzer timed out, killing"
            );
            WaitOutcome::TimedOut
        } else {
            continue;
        };
        kill_and_reap(&mut child);
        return Ok(outcome);
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(err = %err, "failed to kill analyzer");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "failed to reap analyzer");
    }
}

fn read_lines<R: Read>(channel: Channel, reader: R, tx: SyncSender<RunMessage>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = OutputLine::line(channel, decode_line(&buf));
                if tx.send(RunMessage::Line(line)).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                let _ = tx.send(RunMessage::ReadFailed(err));
                return;
            }
        }
    }
    let _ = tx.send(RunMessage::Line(OutputLine::end_of_stream(channel)));
}

/// Strip the line terminator and replace invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_strips_terminators_and_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"dos\r\n"), "dos");
        assert_eq!(decode_line(b"last"), "last");
        assert_eq!(decode_line(b"\xffok\n"), "\u{fffd}ok");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn missing_program_is_not_spawned() {
        let temp = tempfile::tempdir().expect("tempdir");
        let invocation = ToolInvocation {
            program: temp.path().join("dupfinder"),
            args: Vec::new(),
            report_path: temp.path().join("r.xml"),
            source_folder: temp.path().to_path_buf(),
        };
        let err = ProcessRunner::new()
            .run(&invocation, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, PipelineError::ExecutableNotFound(_)));

        let invocation = ToolInvocation {
            program: temp.path().join("gone").join("dupfinder"),
            ..invocation
        };
        let err = ProcessRunner::new()
            .run(&invocation, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, PipelineError::DirectoryNotFound(_)));
    }

    #[cfg(unix)]
    mod unix {
        use std::ffi::OsString;
        use std::fs;

        use super::super::*;
        use crate::test_support::FakeTool;

        fn collect(
            runner: &ProcessRunner,
            invocation: &ToolInvocation,
        ) -> (Result<ToolExit, PipelineError>, Vec<OutputLine>) {
            let mut lines = Vec::new();
            let result = runner.run(invocation, &mut |line| lines.push(line.clone()));
            (result, lines)
        }

        fn texts(lines: &[OutputLine], channel: Channel) -> Vec<String> {
            lines
                .iter()
                .filter(|line| line.channel == channel)
                .filter_map(|line| line.text.clone())
                .collect()
        }

        fn markers(lines: &[OutputLine], channel: Channel) -> usize {
            lines
                .iter()
                .filter(|line| line.channel == channel && line.is_end_of_stream())
                .count()
        }

        #[test]
        fn streams_both_channels_in_order() {
            let tool = FakeTool::script(
                "echo one\necho two\necho oops >&2\necho three\necho worse >&2\nexit 0\n",
            );
            let (result, lines) = collect(&ProcessRunner::new(), &tool.invocation(Vec::new()));

            assert_eq!(result.expect("run"), ToolExit::from_code(0));
            assert_eq!(texts(&lines, Channel::Stdout), ["one", "two", "three"]);
            assert_eq!(texts(&lines, Channel::Stderr), ["oops", "worse"]);
            assert_eq!(markers(&lines, Channel::Stdout), 1);
            assert_eq!(markers(&lines, Channel::Stderr), 1);
            let last_stdout = lines
                .iter()
                .rposition(|line| line.channel == Channel::Stdout)
                .expect("stdout lines");
            assert!(lines[last_stdout].is_end_of_stream());
        }

        #[test]
        fn non_zero_exit_is_reported_not_raised() {
            let tool = FakeTool::script("echo failing >&2\nexit 3\n");
            let (result, lines) = collect(&ProcessRunner::new(), &tool.invocation(Vec::new()));
            assert_eq!(result.expect("run").code, Some(3));
            assert_eq!(texts(&lines, Channel::Stderr), ["failing"]);
        }

        #[test]
        fn silent_tool_still_ends_both_streams() {
            let tool = FakeTool::script("exit 0\n");
            let (result, lines) = collect(&ProcessRunner::new(), &tool.invocation(Vec::new()));
            assert!(result.expect("run").success());
            assert_eq!(lines.len(), 2);
            assert!(lines.iter().all(OutputLine::is_end_of_stream));
        }

        #[test]
        fn arguments_with_spaces_arrive_whole() {
            let tool = FakeTool::script("for arg in \"$@\"; do echo \"$arg\"; done\n");
            let args = vec![
                OsString::from("--show-text"),
                OsString::from("-o=/tmp/out dir/report.xml"),
                OsString::from("/tmp/my source"),
            ];
            let (result, lines) = collect(&ProcessRunner::new(), &tool.invocation(args));
            result.expect("run");
            assert_eq!(
                texts(&lines, Channel::Stdout),
                ["--show-text", "-o=/tmp/out dir/report.xml", "/tmp/my source"]
            );
        }

        #[test]
        fn stdin_is_closed() {
            let tool = FakeTool::script("cat\necho after-stdin\n");
            let (result, lines) = collect(&ProcessRunner::new(), &tool.invocation(Vec::new()));
            result.expect("run");
            assert_eq!(texts(&lines, Channel::Stdout), ["after-stdin"]);
        }

        #[test]
        fn crlf_and_unterminated_lines() {
            let tool = FakeTool::script("printf 'a\\r\\nb'\n");
            let (result, lines) = collect(&ProcessRunner::new(), &tool.invocation(Vec::new()));
            result.expect("run");
            assert_eq!(texts(&lines, Channel::Stdout), ["a", "b"]);
        }

        #[test]
        fn large_interleaved_output_does_not_deadlock() {
            let tool = FakeTool::script(
                "i=0\nwhile [ $i -lt 3000 ]; do\n  echo \"out $i\"\n  echo \"err $i\" >&2\n  i=$((i+1))\ndone\n",
            );
            let runner = ProcessRunner::new().with_queue_capacity(4);
            let (result, lines) = collect(&runner, &tool.invocation(Vec::new()));
            result.expect("run");

            let stdout = texts(&lines, Channel::Stdout);
            let stderr = texts(&lines, Channel::Stderr);
            assert_eq!(stdout.len(), 3000);
            assert_eq!(stderr.len(), 3000);
            assert_eq!(stdout[0], "out 0");
            assert_eq!(stdout[2999], "out 2999");
            assert_eq!(stderr[1500], "err 1500");
        }

        #[test]
        fn timeout_kills_the_tool() {
            let tool = FakeTool::script("echo started\nexec sleep 30\n");
            let runner = ProcessRunner::new().with_timeout(Some(Duration::from_millis(200)));
            let started = Instant::now();
            let (result, lines) = collect(&runner, &tool.invocation(Vec::new()));

            assert!(matches!(result, Err(PipelineError::TimedOut { .. })));
            assert!(started.elapsed() < Duration::from_secs(10));
            assert_eq!(texts(&lines, Channel::Stdout), ["started"]);
        }

        #[test]
        fn cancellation_kills_the_tool() {
            let tool = FakeTool::script("echo started\nexec sleep 30\n");
            let token = CancellationToken::new();
            let runner = ProcessRunner::new().with_cancellation(token.clone());
            let started = Instant::now();
            let result = runner.run(&tool.invocation(Vec::new()), &mut |line| {
                if line.text.as_deref() == Some("started") {
                    token.cancel();
                }
            });

            assert!(matches!(result, Err(PipelineError::Cancelled)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn timeout_does_not_wait_for_leftover_pipe_holders() {
            let tool = FakeTool::script("sleep 6 &\necho started\nexec sleep 30\n");
            let runner = ProcessRunner::new().with_timeout(Some(Duration::from_millis(200)));
            let started = Instant::now();
            let result = runner.run(&tool.invocation(Vec::new()), &mut |_| {});

            assert!(matches!(result, Err(PipelineError::TimedOut { .. })));
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[test]
        fn cancellation_does_not_wait_for_leftover_pipe_holders() {
            let tool = FakeTool::script("sleep 6 &\necho started\nexec sleep 30\n");
            let token = CancellationToken::new();
            let runner = ProcessRunner::new().with_cancellation(token.clone());
            let started = Instant::now();
            let result = runner.run(&tool.invocation(Vec::new()), &mut |line| {
                if line.text.as_deref() == Some("started") {
                    token.cancel();
                }
            });

            assert!(matches!(result, Err(PipelineError::Cancelled)));
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[test]
        fn non_executable_file_fails_to_launch() {
            let tool = FakeTool::script("exit 0\n");
            let plain = tool.dir().join("plain");
            fs::write(&plain, "#!/bin/sh\nexit 0\n").expect("write");
            let invocation = ToolInvocation {
                program: plain,
                ..tool.invocation(Vec::new())
            };
            let err = ProcessRunner::new()
                .run(&invocation, &mut |_| {})
                .unwrap_err();
            assert!(matches!(err, PipelineError::ProcessLaunch { .. }));
        }
    }
}
