//! Journal tailing: incrementally read the game's append-only log files.
//!
//! The game writes line-delimited JSON records to files in a single
//! directory, starting a new file per session. The "current" file is the
//! most recently modified one matching the configured name pattern.
//! `poll()` reads whatever complete lines have appeared since the last
//! call, switching to a newer file when one shows up.
//!
//! Nothing here is fatal: an unreadable directory skips the poll, a
//! half-written line stays unconsumed until the next poll, and rotation
//! is an ordinary, logged occurrence.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

/// Where to start reading the first file the tailer opens.
///
/// Files opened by later rotations always start at offset 0 — rotation
/// means a genuinely new file whose every line is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Read the file from the top. For a fresh store with no folded state.
    Beginning,

    /// Skip existing content and only deliver lines appended after the
    /// first poll. For restarts with rehydrated projections.
    End,
}

/// Read position within the file currently being tailed.
///
/// Owned exclusively by the tailer and replaced — not mutated — when
/// rotation to a newer file is detected. Offsets are file-scoped: they
/// only ever advance past newline-terminated lines, so a partial line at
/// EOF is re-read on the next poll.
struct LogCursor {
    path: PathBuf,
    file: File,
    offset: u64,
}

/// Tails the newest matching journal file in a directory.
pub struct JournalTailer {
    dir: PathBuf,
    prefix: String,
    suffix: String,
    start: StartPosition,
    cursor: Option<LogCursor>,
}

impl JournalTailer {
    /// Creates a tailer over `dir` for files named `{prefix}*{suffix}`.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        start: StartPosition,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
            start,
            cursor: None,
        }
    }

    /// Reads all complete lines appended since the last poll, in order.
    ///
    /// Detects rotation first: if a newer matching file exists, the new
    /// file is opened at offset 0 and only then is the old handle
    /// dropped — lines still unread in the old file are abandoned with
    /// it. I/O failures are logged and skipped; a delivered line is
    /// never redelivered.
    pub fn poll(&mut self) -> Vec<String> {
        let Some(latest) = self.latest_file() else {
            return Vec::new();
        };

        if self.cursor.as_ref().is_none_or(|c| c.path != latest) {
            match self.open_cursor(&latest) {
                Ok(cursor) => {
                    if self.cursor.is_some() {
                        info!(file = %latest.display(), "switched to rotated journal file");
                    } else {
                        info!(file = %latest.display(), "opened journal file");
                    }
                    // Replacing the cursor drops the old handle only now,
                    // after the new file opened successfully.
                    self.cursor = Some(cursor);
                }
                Err(e) => {
                    warn!(file = %latest.display(), error = %e, "could not open journal file");
                    return Vec::new();
                }
            }
        }

        let Some(cursor) = self.cursor.as_mut() else {
            return Vec::new();
        };
        match read_complete_lines(cursor) {
            Ok(lines) => lines,
            Err(e) => {
                warn!(file = %cursor.path.display(), error = %e, "journal read failed; will retry");
                Vec::new()
            }
        }
    }

    /// The most recently modified file matching the name pattern, or
    /// `None` when the directory is empty, unreadable, or has no match.
    ///
    /// Ties on modification time break toward the lexicographically
    /// larger name — journal file names embed their creation time, so
    /// the later name is the later file.
    fn latest_file(&self) -> Option<PathBuf> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "journal directory unreadable; skipping poll");
                return None;
            }
        };

        let mut best: Option<(SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&self.prefix) || !name.ends_with(&self.suffix) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let newer = match &best {
                None => true,
                Some((t, p)) => modified > *t || (modified == *t && path > *p),
            };
            if newer {
                best = Some((modified, path));
            }
        }
        best.map(|(_, path)| path)
    }

    fn open_cursor(&self, path: &Path) -> std::io::Result<LogCursor> {
        let file = File::open(path)?;
        // Only the very first file honors the start position; rotated
        // files are new and read from the top.
        let offset = if self.cursor.is_none() && self.start == StartPosition::End {
            file.metadata()?.len()
        } else {
            0
        };
        debug!(file = %path.display(), offset, "journal cursor opened");
        Ok(LogCursor {
            path: path.to_path_buf(),
            file,
            offset,
        })
    }
}

/// Reads from the cursor's offset to EOF and returns the complete lines,
/// advancing the offset past them. Bytes after the last newline are left
/// for the next poll.
fn read_complete_lines(cursor: &mut LogCursor) -> std::io::Result<Vec<String>> {
    cursor.file.seek(SeekFrom::Start(cursor.offset))?;
    let mut buf = Vec::new();
    cursor.file.read_to_end(&mut buf)?;

    let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok(Vec::new());
    };
    let consumed = &buf[..=end];
    cursor.offset += consumed.len() as u64;

    let mut lines = Vec::new();
    for raw in consumed.split(|&b| b == b'\n') {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }
        match std::str::from_utf8(raw) {
            Ok(line) => lines.push(line.to_string()),
            Err(e) => warn!(error = %e, "skipping non-UTF-8 journal line"),
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::OpenOptions;
    use std::io::Write;

    use tempfile::TempDir;

    fn tailer(dir: &TempDir) -> JournalTailer {
        JournalTailer::new(dir.path(), "Journal.", ".log", StartPosition::Beginning)
    }

    fn append(dir: &TempDir, name: &str, content: &str) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.path().join(name))
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn empty_directory_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer(&dir);

        assert!(tailer.poll().is_empty());
        assert!(tailer.poll().is_empty());
    }

    #[test]
    fn missing_directory_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut tailer = JournalTailer::new(
            dir.path().join("nope"),
            "Journal.",
            ".log",
            StartPosition::Beginning,
        );

        assert!(tailer.poll().is_empty());
    }

    #[test]
    fn reads_complete_lines_once() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer(&dir);

        append(&dir, "Journal.0001.log", "{\"event\":\"A\"}\n{\"event\":\"B\"}\n");
        assert_eq!(
            tailer.poll(),
            vec!["{\"event\":\"A\"}".to_string(), "{\"event\":\"B\"}".to_string()]
        );

        // Nothing new: nothing redelivered.
        assert!(tailer.poll().is_empty());

        append(&dir, "Journal.0001.log", "{\"event\":\"C\"}\n");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"C\"}".to_string()]);
    }

    #[test]
    fn partial_line_waits_for_its_newline() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer(&dir);

        append(&dir, "Journal.0001.log", "{\"event\":\"A\"}\n{\"event\":");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"A\"}".to_string()]);

        // The tail fragment is not consumed until terminated.
        assert!(tailer.poll().is_empty());

        append(&dir, "Journal.0001.log", "\"B\"}\n");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"B\"}".to_string()]);
    }

    #[test]
    fn ignores_files_not_matching_pattern() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer(&dir);

        append(&dir, "notes.txt", "hello\n");
        append(&dir, "Journal.0001.log", "{\"event\":\"A\"}\n");

        assert_eq!(tailer.poll(), vec!["{\"event\":\"A\"}".to_string()]);
    }

    #[test]
    fn rotation_switches_to_newer_file_without_redelivery() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer(&dir);

        append(&dir, "Journal.0001.log", "{\"event\":\"A\"}\n{\"event\":\"B\"}\n");
        assert_eq!(tailer.poll().len(), 2);

        // A later session starts a new file. Same mtime granularity is
        // fine: the name tie-break picks the newer session.
        append(&dir, "Journal.0002.log", "{\"event\":\"C\"}\n");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"C\"}".to_string()]);

        // Lines appended to the abandoned file are never delivered.
        append(&dir, "Journal.0001.log", "{\"event\":\"stale\"}\n");
        append(&dir, "Journal.0002.log", "{\"event\":\"D\"}\n");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"D\"}".to_string()]);
    }

    #[test]
    fn rotated_file_is_read_from_its_own_offset_zero() {
        let dir = TempDir::new().unwrap();
        let mut tailer = JournalTailer::new(dir.path(), "Journal.", ".log", StartPosition::End);

        // Start-at-end applies to the first file only.
        append(&dir, "Journal.0001.log", "{\"event\":\"old\"}\n");
        assert!(tailer.poll().is_empty());

        append(&dir, "Journal.0002.log", "{\"event\":\"fresh\"}\n");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"fresh\"}".to_string()]);
    }

    #[test]
    fn start_at_end_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        append(&dir, "Journal.0001.log", "{\"event\":\"history\"}\n");

        let mut tailer = JournalTailer::new(dir.path(), "Journal.", ".log", StartPosition::End);
        assert!(tailer.poll().is_empty());

        append(&dir, "Journal.0001.log", "{\"event\":\"new\"}\n");
        assert_eq!(tailer.poll(), vec!["{\"event\":\"new\"}".to_string()]);
    }

    #[test]
    fn skips_non_utf8_line_and_continues() {
        let dir = TempDir::new().unwrap();
        let mut tailer = tailer(&dir);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.path().join("Journal.0001.log"))
            .unwrap();
        file.write_all(b"{\"event\":\"A\"}\n\xff\xfe\n{\"event\":\"B\"}\n")
            .unwrap();

        assert_eq!(
            tailer.poll(),
            vec!["{\"event\":\"A\"}".to_string(), "{\"event\":\"B\"}".to_string()]
        );
    }
}
