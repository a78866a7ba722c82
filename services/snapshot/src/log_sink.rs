//! Daily rotating log file writer.
//!
//! A [`RotatingLogSink`] appends to `<dir>/<prefix>-<YYYY-MM-DD>.log` and
//! switches to a new file the first time it is written on a new calendar day
//! (local time). The date check, the rotation and the write itself happen
//! under one lock, so every `write` call lands contiguously in exactly one
//! file even with many concurrent writers.

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of the current calendar date.
pub type DateSource = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// The file currently written to and the day it belongs to.
struct RotationState {
    date: NaiveDate,
    file: File,
}

/// Log writer that opens a new file once per calendar day.
pub struct RotatingLogSink {
    dir: PathBuf,
    prefix: String,
    today: DateSource,
    state: Mutex<Option<RotationState>>,
}

impl RotatingLogSink {
    /// Create a sink keyed on the local date. No file is opened until the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self::with_date_source(dir, prefix, Arc::new(|| Local::now().date_naive()))
    }

    /// Create a sink that asks `today` for the current date.
    pub fn with_date_source(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        today: DateSource,
    ) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            today,
            state: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path of the file holding lines written on `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d")))
    }

    /// Date of the currently open file, if any.
    pub fn current_date(&self) -> Option<NaiveDate> {
        self.state.lock().as_ref().map(|state| state.date)
    }

    fn write_locked(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        let today = (self.today)();

        // A replaced handle is dropped, close errors are not reported.
        let current = match state.take() {
            Some(current) if current.date == today => current,
            _ => RotationState {
                date: today,
                file: OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.path_for(today))?,
            },
        };

        state.insert(current).file.write_all(buf)?;
        Ok(buf.len())
    }
}

impl Write for &RotatingLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_locked(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock().as_mut() {
            Some(current) => current.file.flush(),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RotatingLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingLogSink")
            .field("dir", &self.dir)
            .field("prefix", &self.prefix)
            .field("current_date", &self.current_date())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fixed_day(date: NaiveDate) -> (DateSource, Arc<Mutex<NaiveDate>>) {
        let cell = Arc::new(Mutex::new(date));
        let source = {
            let cell = cell.clone();
            Arc::new(move || *cell.lock()) as DateSource
        };
        (source, cell)
    }

    #[test]
    fn test_no_file_before_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RotatingLogSink::new(dir.path(), "app");
        assert!(sink.current_date().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_file_named_by_prefix_and_date() {
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (source, _) = fixed_day(day);
        let sink = RotatingLogSink::with_date_source(dir.path(), "error", source);

        (&sink).write_all(b"first line\n").unwrap();

        let path = dir.path().join("error-2024-01-15.log");
        assert_eq!(sink.path_for(day), path);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "first line\n");
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        std::fs::write(dir.path().join("app-2024-01-15.log"), "earlier run\n").unwrap();

        let (source, _) = fixed_day(day);
        let sink = RotatingLogSink::with_date_source(dir.path(), "app", source);
        (&sink).write_all(b"this run\n").unwrap();

        let contents = std::fs::read_to_string(sink.path_for(day)).unwrap();
        assert_eq!(contents, "earlier run\nthis run\n");
    }

    #[test]
    fn test_rotates_on_date_change() {
        let dir = tempfile::tempdir().unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let tuesday = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let (source, clock) = fixed_day(monday);
        let sink = RotatingLogSink::with_date_source(dir.path(), "app", source);

        (&sink).write_all(b"monday 1\n").unwrap();
        (&sink).write_all(b"monday 2\n").unwrap();
        *clock.lock() = tuesday;
        (&sink).write_all(b"tuesday 1\n").unwrap();

        assert_eq!(sink.current_date(), Some(tuesday));
        assert_eq!(
            std::fs::read_to_string(sink.path_for(monday)).unwrap(),
            "monday 1\nmonday 2\n"
        );
        assert_eq!(
            std::fs::read_to_string(sink.path_for(tuesday)).unwrap(),
            "tuesday 1\n"
        );
    }

    #[test]
    fn test_missing_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sink = RotatingLogSink::new(dir.path().join("does/not/exist"), "app");
        assert!((&sink).write(b"lost\n").is_err());
        assert!(sink.current_date().is_none());
    }

    #[test]
    fn test_recovers_once_directory_exists() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("later");
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let (source, _) = fixed_day(day);
        let sink = RotatingLogSink::with_date_source(&log_dir, "app", source);

        assert!((&sink).write(b"lost\n").is_err());
        std::fs::create_dir_all(&log_dir).unwrap();
        (&sink).write_all(b"kept\n").unwrap();

        assert_eq!(sink.current_date(), Some(day));
        assert_eq!(
            std::fs::read_to_string(sink.path_for(day)).unwrap(),
            "kept\n"
        );
    }

    #[test]
    fn test_concurrent_writes_do_not_interleave() {
        const THREADS: usize = 8;
        const LINES: usize = 500;

        let dir = tempfile::tempdir().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let (source, _) = fixed_day(day);
        let sink = Arc::new(RotatingLogSink::with_date_source(dir.path(), "app", source));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for i in 0..LINES {
                        let line = format!("writer={t:02} line={i:04} {}\n", "x".repeat(64));
                        (&*sink).write_all(line.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let contents = std::fs::read_to_string(sink.path_for(day)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), THREADS * LINES);
        for line in lines {
            assert!(line.starts_with("writer="), "corrupted line: {line}");
            assert!(line.ends_with(&"x".repeat(64)), "corrupted line: {line}");
            assert_eq!(line.len(), "writer=00 line=0000 ".len() + 64);
        }
    }

    #[test]
    fn test_concurrent_writes_across_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let first = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let second = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let (source, clock) = fixed_day(first);
        let sink = Arc::new(RotatingLogSink::with_date_source(dir.path(), "app", source));

        let writer = {
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    (&*sink)
                        .write_all(format!("entry {i:04}\n").as_bytes())
                        .unwrap();
                }
            })
        };
        thread::sleep(std::time::Duration::from_millis(1));
        *clock.lock() = second;
        writer.join().unwrap();

        let old = std::fs::read_to_string(sink.path_for(first)).unwrap_or_default();
        let new = std::fs::read_to_string(sink.path_for(second)).unwrap_or_default();
        let all: Vec<&str> = old.lines().chain(new.lines()).collect();
        assert_eq!(all.len(), 1000);
        for (i, line) in all.iter().enumerate() {
            assert_eq!(*line, format!("entry {i:04}"));
        }
    }
}
