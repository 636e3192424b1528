//! Per-process log sinks backed by append-only files.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Local;
use drover_daemon_types::AppDescriptor;
use tracing::warn;

use super::SUPERVISOR_TARGET;

/// One log file. Lines are appended with an optional timestamp prefix.
#[derive(Debug)]
pub(crate) struct LogSink {
    path: PathBuf,
    date_format: Option<String>,
    file: Mutex<Option<File>>,
}

impl LogSink {
    fn open(path: PathBuf, date_format: Option<String>) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            date_format,
            file: Mutex::new(Some(file)),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn write_line(&self, line: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        let Some(file) = guard.as_mut() else {
            return;
        };
        let result = match &self.date_format {
            Some(format) => writeln!(file, "{}: {line}", Local::now().format(format)),
            None => writeln!(file, "{line}"),
        };
        if let Err(error) = result {
            warn!(
                target: SUPERVISOR_TARGET,
                file = %self.path.display(),
                %error,
                "failed to append log line"
            );
        }
    }

    /// Reopens the file so externally rotated logs are recreated.
    pub(crate) fn reopen(&self) -> io::Result<()> {
        let file = open_append(&self.path)?;
        if let Ok(mut guard) = self.file.lock() {
            *guard = Some(file);
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o640);
    }
    options.open(path)
}

/// The stdout and stderr sinks of one record; merged logs share one sink.
#[derive(Debug, Clone)]
pub(crate) struct LogSinks {
    pub(crate) out: Arc<LogSink>,
    pub(crate) err: Arc<LogSink>,
}

impl LogSinks {
    pub(crate) fn open(
        logs_dir: &Path,
        descriptor: &AppDescriptor,
        id: u32,
        instance: u32,
    ) -> io::Result<Self> {
        let (out_path, err_path) = log_paths(logs_dir, descriptor, id, instance);
        let out = Arc::new(LogSink::open(out_path, descriptor.log_date_format.clone())?);
        let err = if descriptor.merge_logs {
            Arc::clone(&out)
        } else {
            Arc::new(LogSink::open(err_path, descriptor.log_date_format.clone())?)
        };
        Ok(Self { out, err })
    }

    pub(crate) fn reopen(&self) -> io::Result<()> {
        self.out.reopen()?;
        if !Arc::ptr_eq(&self.out, &self.err) {
            self.err.reopen()?;
        }
        Ok(())
    }
}

/// Resolves the stdout and stderr log paths of a record.
///
/// Explicit paths win. Otherwise files are named after the application with
/// an `-<id>` suffix when more than one instance may write to the directory.
pub(crate) fn log_paths(
    logs_dir: &Path,
    descriptor: &AppDescriptor,
    id: u32,
    instance: u32,
) -> (PathBuf, PathBuf) {
    let suffix = if descriptor.instances == 1 && instance == 0 {
        String::new()
    } else {
        format!("-{id}")
    };
    let out = descriptor
        .out_file
        .clone()
        .unwrap_or_else(|| logs_dir.join(format!("{}-out{suffix}.log", descriptor.name)));
    let err = descriptor
        .error_file
        .clone()
        .unwrap_or_else(|| logs_dir.join(format!("{}-error{suffix}.log", descriptor.name)));
    (out, err)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case(1, 0, "api-out.log", "api-error.log")]
    #[case(4, 0, "api-out-7.log", "api-error-7.log")]
    #[case(1, 2, "api-out-7.log", "api-error-7.log")]
    fn names_log_files_after_the_application(
        #[case] instances: i32,
        #[case] instance: u32,
        #[case] out: &str,
        #[case] err: &str,
    ) {
        let descriptor = AppDescriptor {
            instances,
            ..AppDescriptor::new("api", "server")
        };
        let (out_path, err_path) = log_paths(Path::new("/logs"), &descriptor, 7, instance);
        assert_eq!(out_path, Path::new("/logs").join(out));
        assert_eq!(err_path, Path::new("/logs").join(err));
    }

    #[test]
    fn merged_logs_share_one_file() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("tempdir: {error}"));
        let descriptor = AppDescriptor {
            merge_logs: true,
            ..AppDescriptor::new("api", "server")
        };
        let sinks = LogSinks::open(dir.path(), &descriptor, 0, 0)
            .unwrap_or_else(|error| panic!("open sinks: {error}"));
        sinks.out.write_line("hello");
        sinks.err.write_line("oops");

        let content = fs::read_to_string(sinks.out.path()).unwrap_or_default();
        assert_eq!(content, "hello\noops\n");
        assert!(Arc::ptr_eq(&sinks.out, &sinks.err));
    }

    #[test]
    fn reopen_recreates_rotated_files() {
        let dir = TempDir::new().unwrap_or_else(|error| panic!("tempdir: {error}"));
        let sinks = LogSinks::open(dir.path(), &AppDescriptor::new("api", "server"), 0, 0)
            .unwrap_or_else(|error| panic!("open sinks: {error}"));
        let rotated = dir.path().join("rotated.log");
        fs::rename(sinks.out.path(), &rotated).unwrap_or_else(|error| panic!("rename: {error}"));

        sinks.reopen().unwrap_or_else(|error| panic!("reopen: {error}"));
        sinks.out.write_line("fresh");

        assert_eq!(fs::read_to_string(sinks.out.path()).unwrap_or_default(), "fresh\n");
    }
}
