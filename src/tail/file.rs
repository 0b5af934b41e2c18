//! Built-in incremental reader that needs no external `logtail2`.
//!
//! The checkpoint stores `<inode>\n<offset>\n`, the same layout logtail2
//! uses. Rotation is detected by an inode change or by the file shrinking
//! below the saved offset; either restarts from the beginning.
//!
//! Only complete lines are consumed. A trailing line still being written
//! (no `\n` yet) is left for the next run.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{TailError, TailSession, TailSource, decode_line};
use crate::runner::CommandStatus;

#[derive(Debug, Default, Clone, Copy)]
pub struct FileTailSource;

impl FileTailSource {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Position {
    inode: u64,
    offset: u64,
}

impl TailSource for FileTailSource {
    fn open<'a>(
        &'a self,
        log_file: &Path,
        checkpoint: &Path,
    ) -> Result<Box<dyn TailSession + 'a>, TailError> {
        let log_error = |source| TailError::LogFile {
            path: log_file.to_path_buf(),
            source,
        };

        let mut file = File::open(log_file).map_err(log_error)?;
        let metadata = file.metadata().map_err(log_error)?;
        let inode = get_inode(&metadata);
        let size = metadata.len();

        let saved = read_position(checkpoint);
        let offset = match saved {
            Some(p) if p.inode != inode => {
                debug!("{} rotated (inode changed), reading from start", log_file.display());
                0
            }
            Some(p) if size < p.offset => {
                debug!("{} truncated, reading from start", log_file.display());
                0
            }
            Some(p) => p.offset,
            None => 0,
        };

        file.seek(SeekFrom::Start(offset))?;

        Ok(Box::new(FileSession {
            reader: BufReader::new(file),
            checkpoint: checkpoint.to_path_buf(),
            position: Position { inode, offset },
        }))
    }
}

struct FileSession {
    reader: BufReader<File>,
    checkpoint: PathBuf,
    position: Position,
}

impl TailSession for FileSession {
    fn next_line(&mut self) -> Option<Result<String, TailError>> {
        let mut buf = Vec::new();
        match self.reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) if buf.last() != Some(&b'\n') => None,
            Ok(n) => {
                self.position.offset += n as u64;
                Some(Ok(decode_line(buf)))
            }
            Err(e) => Some(Err(TailError::Read(e))),
        }
    }

    fn finish(self: Box<Self>) -> Result<CommandStatus, TailError> {
        write_position(&self.checkpoint, self.position).map_err(|source| {
            TailError::Checkpoint {
                path: self.checkpoint.clone(),
                source,
            }
        })?;
        Ok(CommandStatus { code: Some(0) })
    }
}

fn read_position(checkpoint: &Path) -> Option<Position> {
    let content = match fs::read_to_string(checkpoint) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read checkpoint {}: {}", checkpoint.display(), e);
            return None;
        }
    };

    let mut fields = content.lines().map(|l| l.trim().parse::<u64>());
    match (fields.next(), fields.next()) {
        (Some(Ok(inode)), Some(Ok(offset))) => Some(Position { inode, offset }),
        _ => {
            warn!(
                "Malformed checkpoint {}, reading log from start",
                checkpoint.display()
            );
            None
        }
    }
}

/// Writes via a temp file and rename so a crash never leaves a torn
/// checkpoint behind.
fn write_position(checkpoint: &Path, position: Position) -> io::Result<()> {
    let mut tmp_name = checkpoint.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut f = File::create(&tmp)?;
    write!(f, "{}\n{}\n", position.inode, position.offset)?;
    f.sync_all()?;
    drop(f);
    fs::rename(&tmp, checkpoint)
}

/// Extract inode from file metadata (Linux-specific).
#[cfg(unix)]
fn get_inode(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

/// Fallback for non-Unix: always returns 0, relying on size-based rotation detection.
#[cfg(not(unix))]
fn get_inode(_metadata: &fs::Metadata) -> u64 {
    0
}
