//! Last-N-lines reader over the gateway log file.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Read the last `lines` lines of `path`. Invalid UTF-8 is replaced.
pub fn read_tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    if lines == 0 {
        return Ok(Vec::new());
    }
    let mut reader = BufReader::new(File::open(path)?);
    let mut window: VecDeque<String> = VecDeque::with_capacity(lines.min(4096));
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        if window.len() == lines {
            window.pop_front();
        }
        window.push_back(line);
    }
    Ok(window.into())
}

/// Tail the configured log file on a blocking thread.
///
/// Missing configuration, a missing file and read errors come back as a
/// single explanatory line rather than an error.
pub async fn tail(path: Option<PathBuf>, lines: usize) -> Vec<String> {
    let Some(path) = path else {
        return vec!["Log file path is not configured.".to_string()];
    };

    let shown = path.display().to_string();
    let result = tokio::task::spawn_blocking(move || read_tail(&path, lines)).await;
    match result {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
            vec![format!("Log file not found at: {}", shown)]
        }
        Ok(Err(e)) => {
            tracing::error!(path = %shown, error = %e, "failed to read gateway log");
            vec![format!("Error reading log file: {}", e)]
        }
        Err(e) => {
            tracing::error!(path = %shown, error = %e, "log reader task failed");
            vec![format!("Error reading log file: {}", e)]
        }
    }
}
