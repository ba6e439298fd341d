use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Report metadata, stored next to the markdown as `<id>.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub urls_found: usize,
    #[serde(default)]
    pub pages_scraped: usize,
    #[serde(default)]
    pub pages_failed: usize,
    #[serde(default)]
    pub elapsed_ms: f64,
    #[serde(default)]
    pub file_size: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportDetail {
    #[serde(flatten)]
    pub summary: ReportSummary,
    pub content: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReportStats {
    pub urls_found: usize,
    pub pages_scraped: usize,
    pub pages_failed: usize,
    pub elapsed_ms: f64,
}

/// Ids double as file names, so only short lowercase hex is accepted.
pub fn is_valid_id(id: &str) -> bool {
    (6..=16).contains(&id.len()) && id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'))
}

/// Flat-file report storage: `<id>.md` plus `<id>.json` in one directory.
#[derive(Clone, Debug)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, id: &str) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("{}.md", id)),
            self.dir.join(format!("{}.json", id)),
        )
    }

    pub fn save(
        &self,
        id: &str,
        topic: &str,
        markdown: &str,
        stats: ReportStats,
    ) -> Result<ReportSummary> {
        if !is_valid_id(id) {
            return Err(Error::InvalidInput(format!("Invalid report id: {:?}", id)));
        }
        fs::create_dir_all(&self.dir)?;

        let (md_path, meta_path) = self.paths(id);
        fs::write(&md_path, markdown)?;

        let summary = ReportSummary {
            id: id.to_string(),
            topic: topic.to_string(),
            created_at: Utc::now(),
            urls_found: stats.urls_found,
            pages_scraped: stats.pages_scraped,
            pages_failed: stats.pages_failed,
            elapsed_ms: stats.elapsed_ms,
            file_size: markdown.len() as u64,
        };
        fs::write(&meta_path, serde_json::to_string_pretty(&summary)?)?;

        tracing::info!(report_id = id, path = %md_path.display(), "report saved");
        Ok(summary)
    }

    /// Every readable report, newest first. Corrupt metadata files are skipped.
    pub fn list(&self) -> Result<Vec<ReportSummary>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reports = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|raw| serde_json::from_str::<ReportSummary>(&raw).map_err(Error::from));
            match parsed {
                Ok(summary) => reports.push(summary),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable report metadata"
                    )
                }
            }
        }

        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    pub fn get(&self, id: &str) -> Result<ReportDetail> {
        if !is_valid_id(id) {
            return Err(Error::not_found("Report", id));
        }
        let (md_path, meta_path) = self.paths(id);

        let read = |path: &Path| match fs::read_to_string(path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found("Report", id)),
            Err(e) => Err(e.into()),
        };

        let summary: ReportSummary = serde_json::from_str(&read(&meta_path)?)?;
        let content = read(&md_path)?;
        Ok(ReportDetail { summary, content })
    }

    /// Remove both files of a report. Returns whether anything was deleted.
    pub fn delete(&self, id: &str) -> Result<bool> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let (md_path, meta_path) = self.paths(id);

        let mut deleted = false;
        for path in [meta_path, md_path] {
            match fs::remove_file(&path) {
                Ok(()) => deleted = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if deleted {
            tracing::info!(report_id = id, "report deleted");
        }
        Ok(deleted)
    }
}
