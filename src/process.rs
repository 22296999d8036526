//! External command execution.
//!
//! Commands are always spawned from an explicit argv; nothing is routed
//! through a shell, so tool paths and file names never need quoting.
//!
//! ```rust,ignore
//! use rfs_builder::process::{Cmd, SystemRunner};
//!
//! let listing = Cmd::new("nm")
//!     .arg("--defined-only")
//!     .arg_path(&kernel_dbg)
//!     .error_msg("listing kernel symbols")
//!     .run_with(&SystemRunner)?;
//! ```

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{PackError, Result};

/// Captured result of a finished child process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stderr and stdout joined for diagnostics, stderr first.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}\n{stdout}"),
            (false, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (true, true) => "no output".to_string(),
        }
    }

    fn status_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Seam between the engine and the host's process table.
pub trait CommandRunner {
    /// Run `argv[0]` with the remaining arguments, feeding `stdin` if given,
    /// and block until the child exits with its output fully captured.
    fn run(&self, argv: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput>;
}

/// Runs commands on the host with `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PackError::format("cannot run an empty command line"))?;

        let spawn_err = |e: std::io::Error| PackError::ExternalTool {
            tool: program.clone(),
            status: "failed to start".to_string(),
            diagnostic: e.to_string(),
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        // Feed stdin from a separate thread so a child that fills its stdout
        // pipe before draining stdin cannot deadlock us.
        let feeder = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.to_vec();
                Some(std::thread::spawn(move || pipe.write_all(&input)))
            }
            _ => None,
        };

        let output = child.wait_with_output().map_err(spawn_err)?;

        if let Some(handle) = feeder {
            match handle.join() {
                Ok(Ok(())) => {}
                // The child may exit without reading everything; its exit
                // status below is the authoritative result.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(spawn_err(e)),
                Err(_) => {
                    return Err(PackError::ExternalTool {
                        tool: program.clone(),
                        status: "stdin writer panicked".to_string(),
                        diagnostic: String::new(),
                    })
                }
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

/// Builder for a single command invocation.
pub struct Cmd {
    argv: Vec<String>,
    stdin: Option<Vec<u8>>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            argv: vec![program.into()],
            stdin: None,
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.argv.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.argv.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Prefix for the diagnostic when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the output even when the command exits nonzero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn run_with(self, runner: &dyn CommandRunner) -> Result<CommandOutput> {
        tracing::debug!(argv = ?self.argv, "running command");
        let output = runner.run(&self.argv, self.stdin.as_deref())?;

        if output.success() || self.allow_fail {
            return Ok(output);
        }

        let diagnostic = match &self.error_msg {
            Some(msg) => format!("{msg}: {}", output.diagnostic()),
            None => output.diagnostic(),
        };
        Err(PackError::ExternalTool {
            tool: self.argv[0].clone(),
            status: output.status_label(),
            diagnostic,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Scripted runner: replies in order and records every invocation.
    #[derive(Default)]
    pub(crate) struct FakeRunner {
        pub(crate) replies: RefCell<Vec<CommandOutput>>,
        pub(crate) calls: RefCell<Vec<(Vec<String>, Option<Vec<u8>>)>>,
    }

    impl FakeRunner {
        pub(crate) fn replying(replies: Vec<CommandOutput>) -> Self {
            Self {
                replies: RefCell::new(replies),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, argv: &[String], stdin: Option<&[u8]>) -> Result<CommandOutput> {
            self.calls
                .borrow_mut()
                .push((argv.to_vec(), stdin.map(<[u8]>::to_vec)));
            let mut replies = self.replies.borrow_mut();
            if replies.is_empty() {
                panic!("unexpected command: {argv:?}");
            }
            Ok(replies.remove(0))
        }
    }

    pub(crate) fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn nonzero_exit_is_external_tool_error_with_diagnostic() {
        let runner = FakeRunner::replying(vec![CommandOutput {
            stdout: String::new(),
            stderr: "nm: 'kernel.dbg': No such file\n".to_string(),
            exit_code: Some(1),
        }]);
        let err = Cmd::new("nm")
            .arg("kernel.dbg")
            .error_msg("listing symbols")
            .run_with(&runner)
            .unwrap_err();
        match err {
            PackError::ExternalTool {
                tool,
                status,
                diagnostic,
            } => {
                assert_eq!(tool, "nm");
                assert_eq!(status, "exit code 1");
                assert!(diagnostic.starts_with("listing symbols: nm: 'kernel.dbg'"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allow_fail_returns_output() {
        let runner = FakeRunner::replying(vec![CommandOutput {
            exit_code: Some(2),
            ..Default::default()
        }]);
        let out = Cmd::new("which")
            .arg("nm")
            .allow_fail()
            .run_with(&runner)
            .unwrap();
        assert!(!out.success());
    }

    #[test]
    fn stdin_is_forwarded() {
        let runner = FakeRunner::replying(vec![ok("foo\n")]);
        Cmd::new("c++filt")
            .stdin("_Z3foov\n")
            .run_with(&runner)
            .unwrap();
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].0, vec!["c++filt".to_string()]);
        assert_eq!(calls[0].1.as_deref(), Some(&b"_Z3foov\n"[..]));
    }

    #[test]
    fn system_runner_captures_stdout_and_stdin() {
        let out = SystemRunner
            .run(&["cat".to_string()], Some(b"hello from stdin"))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello from stdin");
    }

    #[test]
    fn system_runner_reports_missing_program() {
        let err = SystemRunner
            .run(&["definitely_not_a_real_command_12345".to_string()], None)
            .unwrap_err();
        assert!(matches!(err, PackError::ExternalTool { .. }));
    }
}
