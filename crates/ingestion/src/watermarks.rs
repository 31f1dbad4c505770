use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceWatermark {
    pub last_block: u64,
    pub last_time: Option<DateTime<Utc>>,
}

/// Per-source high-watermarks persisted as a JSON map so pollers resume
/// where they left off across restarts. Writes go through a temp file
/// rename so a crash cannot leave a torn map behind.
#[derive(Debug)]
pub struct WatermarkFile {
    path: PathBuf,
    marks: BTreeMap<String, SourceWatermark>,
}

impl WatermarkFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let marks = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read watermarks: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse watermarks: {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, marks })
    }

    pub fn get(&self, source_id: &str) -> SourceWatermark {
        self.marks.get(source_id).cloned().unwrap_or_default()
    }

    pub fn advance(&mut self, source_id: &str, block: u64, time: DateTime<Utc>) -> Result<()> {
        let mark = self.marks.entry(source_id.to_string()).or_default();
        if block < mark.last_block {
            return Ok(());
        }
        mark.last_block = block;
        mark.last_time = Some(time);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create watermark dir: {}", parent.display())
            })?;
        }
        let raw = serde_json::to_string_pretty(&self.marks)
            .context("failed to serialize watermarks")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .with_context(|| format!("failed to write watermarks: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace watermarks: {}", self.path.display()))?;
        Ok(())
    }
}
