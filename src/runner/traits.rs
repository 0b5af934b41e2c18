//! Abstraction over external commands so the driver and sinks can be
//! exercised without `logtail2`, `send_nsca` or `gmetric` installed.

use std::fmt;
use std::io::{self, BufRead, BufReader, Write};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Program, arguments and optional stdin payload for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Exit status of a finished command. `code` is `None` when the process
/// was killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub code: Option<i32>,
}

impl CommandStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A started command whose stdout can be streamed before it is reaped.
pub trait RunningCommand {
    /// Line-oriented access to the command's stdout.
    fn stdout(&mut self) -> &mut dyn BufRead;

    /// Drains any unread output and waits for the command to exit.
    fn wait(self: Box<Self>) -> io::Result<CommandStatus>;
}

/// Starts external commands.
pub trait CommandRunner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn RunningCommand>>;

    /// Runs a command to completion, discarding its stdout.
    fn run(&self, spec: &CommandSpec) -> io::Result<CommandStatus> {
        self.spawn(spec)?.wait()
    }
}

/// Runs commands with `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn RunningCommand>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        if let Some(input) = &spec.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes())?;
            // stdin is closed here so the child sees EOF.
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;

        Ok(Box::new(SystemCommand {
            child,
            stdout: BufReader::new(stdout),
        }))
    }
}

struct SystemCommand {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl RunningCommand for SystemCommand {
    fn stdout(&mut self) -> &mut dyn BufRead {
        &mut self.stdout
    }

    fn wait(mut self: Box<Self>) -> io::Result<CommandStatus> {
        // A child blocked on a full pipe would never exit.
        io::copy(&mut self.stdout, &mut io::sink())?;
        let status = self.child.wait()?;
        Ok(CommandStatus {
            code: status.code(),
        })
    }
}
