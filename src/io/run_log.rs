use crate::types::ChangeResult;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only audit trail of one invocation.
///
/// Creating a logger truncates its backing file. Components receive it by
/// reference and only ever append; nothing reads the log back during a run.
#[derive(Debug)]
pub struct RunLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RunLogger {
    /// Truncate (or create) `path` and write a header
    pub fn create<P: AsRef<Path>>(path: P, title: &str) -> ChangeResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&path)?;
        writeln!(file, "{}", title)?;
        writeln!(file, "Generated: {}", timestamp())?;
        writeln!(file, "{}", "=".repeat(50))?;
        writeln!(file)?;

        log::debug!("Run log reset: {}", path.display());
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped entry; failures are reported but never propagated
    pub fn record(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!("{}", message);

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let written = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "[{}] {}", timestamp(), message));

        if let Err(e) = written {
            log::warn!("Could not append to run log {}: {}", self.path.display(), e);
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
