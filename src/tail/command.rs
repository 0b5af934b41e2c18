//! Tail source backed by `logtail2 -f <log> -o <offset file>`.

use std::path::Path;

use tracing::debug;

use super::{TailError, TailSession, TailSource, decode_line};
use crate::runner::{CommandRunner, CommandSpec, CommandStatus, RunningCommand};

pub const DEFAULT_LOGTAIL: &str = "/usr/sbin/logtail2";

pub struct CommandTailSource<R: CommandRunner> {
    logtail: String,
    runner: R,
}

impl<R: CommandRunner> CommandTailSource<R> {
    pub fn new(logtail: impl Into<String>, runner: R) -> Self {
        Self {
            logtail: logtail.into(),
            runner,
        }
    }

    pub fn command_for(&self, log_file: &Path, checkpoint: &Path) -> CommandSpec {
        CommandSpec::new(&self.logtail)
            .arg("-f")
            .arg(log_file.to_string_lossy())
            .arg("-o")
            .arg(checkpoint.to_string_lossy())
    }
}

impl<R: CommandRunner> TailSource for CommandTailSource<R> {
    fn open<'a>(
        &'a self,
        log_file: &Path,
        checkpoint: &Path,
    ) -> Result<Box<dyn TailSession + 'a>, TailError> {
        let spec = self.command_for(log_file, checkpoint);
        debug!("Running {}", spec);
        let command = self.runner.spawn(&spec).map_err(|source| TailError::Spawn {
            command: spec.to_string(),
            source,
        })?;
        Ok(Box::new(CommandSession { command }))
    }
}

struct CommandSession {
    command: Box<dyn RunningCommand>,
}

impl TailSession for CommandSession {
    fn next_line(&mut self) -> Option<Result<String, TailError>> {
        let mut buf = Vec::new();
        match self.command.stdout().read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(decode_line(buf))),
            Err(e) => Some(Err(TailError::Read(e))),
        }
    }

    fn finish(self: Box<Self>) -> Result<CommandStatus, TailError> {
        Ok(self.command.wait()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRunner;

    #[test]
    fn test_builds_logtail_invocation() {
        let source = CommandTailSource::new("logtail2", MockRunner::new());
        let spec = source.command_for(Path::new("/var/log/app.log"), Path::new("/run/x.state"));
        assert_eq!(spec.to_string(), "logtail2 -f /var/log/app.log -o /run/x.state");
    }

    #[test]
    fn test_streams_lines_and_status() {
        let runner = MockRunner::new().with_output("logtail2", "first\nsecond\r\nthird", 0);
        let source = CommandTailSource::new("logtail2", runner.clone());
        let mut session = source.open(Path::new("a.log"), Path::new("a.state")).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = session.next_line() {
            lines.push(line.unwrap());
        }
        assert_eq!(lines, vec!["first", "second", "third"]);
        assert!(session.finish().unwrap().success());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_spawn_failure() {
        let runner = MockRunner::new().with_spawn_error("logtail2", "not installed");
        let source = CommandTailSource::new("logtail2", runner);
        let err = source
            .open(Path::new("a.log"), Path::new("a.state"))
            .err()
            .unwrap();
        assert!(matches!(err, TailError::Spawn { ref command, .. } if command.starts_with("logtail2 -f")));
    }

    #[test]
    fn test_reports_exit_code() {
        let runner = MockRunner::new().with_output("logtail2", "", 1);
        let source = CommandTailSource::new("logtail2", runner);
        let session = source.open(Path::new("a.log"), Path::new("a.state")).unwrap();
        assert_eq!(session.finish().unwrap().code, Some(1));
    }
}
