//! In-memory command runner for tests.
//!
//! Responses are keyed by program name. Every invocation is recorded so
//! tests can assert on the exact arguments and stdin a sink produced.

use std::collections::HashMap;
use std::io::{self, BufRead, Cursor};
use std::sync::{Arc, Mutex};

use super::traits::{CommandRunner, CommandSpec, CommandStatus, RunningCommand};

/// Canned behaviour for one program.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Prints `stdout` and exits with `code`.
    Output { stdout: String, code: i32 },
    /// The program cannot be started.
    SpawnError(String),
}

/// Records invocations and replays canned responses.
///
/// Unknown programs succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    responses: HashMap<String, MockResponse>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `program` print `stdout` and exit with `code`.
    pub fn with_output(mut self, program: &str, stdout: impl Into<String>, code: i32) -> Self {
        self.responses.insert(
            program.to_string(),
            MockResponse::Output {
                stdout: stdout.into(),
                code,
            },
        );
        self
    }

    /// Makes spawning `program` fail.
    pub fn with_spawn_error(mut self, program: &str, message: impl Into<String>) -> Self {
        self.responses
            .insert(program.to_string(), MockResponse::SpawnError(message.into()));
        self
    }

    /// Every command spawned so far, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl CommandRunner for MockRunner {
    fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn RunningCommand>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(spec.clone());
        }

        match self.responses.get(&spec.program) {
            Some(MockResponse::SpawnError(message)) => {
                Err(io::Error::new(io::ErrorKind::NotFound, message.clone()))
            }
            Some(MockResponse::Output { stdout, code }) => Ok(Box::new(MockCommand {
                stdout: Cursor::new(stdout.clone().into_bytes()),
                code: *code,
            })),
            None => Ok(Box::new(MockCommand {
                stdout: Cursor::new(Vec::new()),
                code: 0,
            })),
        }
    }
}

struct MockCommand {
    stdout: Cursor<Vec<u8>>,
    code: i32,
}

impl RunningCommand for MockCommand {
    fn stdout(&mut self) -> &mut dyn BufRead {
        &mut self.stdout
    }

    fn wait(self: Box<Self>) -> io::Result<CommandStatus> {
        Ok(CommandStatus {
            code: Some(self.code),
        })
    }
}
