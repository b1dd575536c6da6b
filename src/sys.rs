//! External command execution
//!
//! Every kernel interaction goes through [`CommandRunner`]. [`Shell`] sits on
//! top and separates read-only queries from state changes, so dry runs and
//! fail-fast handling live in one place.

use crate::error::{Error, Result};
use crate::manifest::Elevation;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured result of an external command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether the command exited successfully
    pub success: bool,
    /// Exit code, absent when killed by a signal
    pub exit_code: Option<i32>,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful result with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Get combined output (stdout + stderr)
    pub fn output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs external programs to completion
pub trait CommandRunner {
    /// Run `program` with `args` and capture its output
    ///
    /// A non-zero exit is not an error here; only failing to run the program
    /// at all is.
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Runs commands on the local system, escalating through sudo when needed
#[derive(Debug, Clone)]
pub struct SystemRunner {
    sudo: bool,
    timeout: Option<Duration>,
}

impl SystemRunner {
    /// Create a runner for the given elevation mode
    pub fn new(elevation: Elevation, timeout_secs: Option<u64>) -> Self {
        let sudo = match elevation {
            Elevation::Sudo => true,
            Elevation::None => false,
            Elevation::Auto => !nix::unistd::geteuid().is_root(),
        };

        Self {
            sudo,
            timeout: timeout_secs.map(Duration::from_secs),
        }
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg("--").arg(program).args(args);
            cmd
        } else {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    }

    /// Poll the child until it exits or the timeout expires
    fn wait_with_timeout(
        &self,
        mut cmd: Command,
        rendered: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::CommandSpawn {
                command: rendered.to_string(),
                source: e,
            })?;

        let start = Instant::now();
        loop {
            match child.try_wait()? {
                Some(status) => {
                    let mut stdout = String::new();
                    let mut stderr = String::new();

                    if let Some(mut handle) = child.stdout.take() {
                        let _ = handle.read_to_string(&mut stdout);
                    }
                    if let Some(mut handle) = child.stderr.take() {
                        let _ = handle.read_to_string(&mut stderr);
                    }

                    return Ok(CommandOutput {
                        success: status.success(),
                        exit_code: status.code(),
                        stdout,
                        stderr,
                    });
                }
                None => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::CommandTimeout {
                            command: rendered.to_string(),
                            secs: timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let rendered = render(program, args);
        let cmd = self.command(program, args);

        if let Some(timeout) = self.timeout {
            return self.wait_with_timeout(cmd, &rendered, timeout);
        }

        let mut cmd = cmd;
        let output = cmd.output().map_err(|e| Error::CommandSpawn {
            command: rendered,
            source: e,
        })?;

        Ok(CommandOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Render a command line for logs and error messages
pub fn render(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Query/apply front end over a [`CommandRunner`]
pub struct Shell<'a> {
    runner: &'a dyn CommandRunner,
    dry_run: bool,
}

impl<'a> Shell<'a> {
    pub fn new(runner: &'a dyn CommandRunner, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    /// Whether state changes are only being logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a read-only command; the caller inspects the exit status
    ///
    /// Queries run even in dry-run mode.
    pub fn query(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!(command = %render(program, args), "query");
        self.runner.run(program, args)
    }

    /// Run a state-changing command; non-zero exit is fatal
    pub fn apply(&self, program: &str, args: &[&str]) -> Result<()> {
        let rendered = render(program, args);

        if self.dry_run {
            tracing::info!("would run: {}", rendered);
            return Ok(());
        }

        tracing::debug!(command = %rendered, "apply");
        let output = self.runner.run(program, args)?;

        if !output.success {
            let message = if output.stderr.trim().is_empty() {
                format!("exited with status {:?}", output.exit_code)
            } else {
                output.stderr.trim().to_string()
            };
            return Err(Error::CommandFailed {
                command: rendered,
                code: output.exit_code,
                message,
            });
        }

        Ok(())
    }

    /// Run a diagnostic command and return its output, never failing
    ///
    /// Skipped in dry-run mode.
    pub fn probe(&self, program: &str, args: &[&str]) -> Option<CommandOutput> {
        let rendered = render(program, args);

        if self.dry_run {
            tracing::info!("would probe: {}", rendered);
            return None;
        }

        match self.runner.run(program, args) {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::warn!("probe '{}' could not run: {}", rendered, e);
                None
            }
        }
    }
}
