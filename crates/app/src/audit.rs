use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use whaleflow_core_types::{AuditEvent, SuppressionEvent};

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum AuditLine<'a> {
    Stored(&'a AuditEvent),
    Suppressed(&'a SuppressionEvent),
}

/// Line-delimited JSON audit trail shared by the sink workers.
pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create audit dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log: {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record_stored(&self, event: &AuditEvent) -> Result<()> {
        self.append(&AuditLine::Stored(event))
    }

    pub fn record_suppressed(&self, event: &SuppressionEvent) -> Result<()> {
        self.append(&AuditLine::Suppressed(event))
    }

    fn append(&self, line: &AuditLine<'_>) -> Result<()> {
        let mut raw = serde_json::to_string(line).context("failed to serialize audit line")?;
        raw.push('\n');
        let mut guard = self.file.lock().unwrap_or_else(|poison| poison.into_inner());
        guard
            .write_all(raw.as_bytes())
            .context("failed to append audit line")?;
        Ok(())
    }
}
