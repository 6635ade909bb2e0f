#![deny(warnings)]

//! Persistence layer: weekly metric snapshots, conversation logs and reports.
//!
//! Snapshots are written whole-file (last write wins per week key); the
//! conversation log is append-only.

mod report;

pub use report::{render_impact_report, write_report, ContributionRow};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sim_core::{parse_week_key, week_key, AgentMessage, ConstraintCatalog, WeekSnapshot};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("stored week key {0:?} is not of the form weekN")]
    BadWeekKey(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable home of the weekly snapshots.
pub trait SnapshotStore {
    /// Every stored week, keyed by week number.
    fn load(&self) -> Result<BTreeMap<u32, WeekSnapshot>, PersistenceError>;

    /// Replace the stored weeks with `weeks`.
    fn save(&mut self, weeks: &BTreeMap<u32, WeekSnapshot>) -> Result<(), PersistenceError>;
}

/// On-disk layout of the metrics file: constraint definitions plus weekly values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsDocument {
    #[serde(default)]
    pub metrics_definitions: ConstraintCatalog,
    #[serde(default)]
    pub weekly_metrics: BTreeMap<String, WeekSnapshot>,
}

impl MetricsDocument {
    /// Read a metrics file; a missing file is an empty document.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        if !path.exists() {
            debug!(path = %path.display(), "metrics file absent, starting empty");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Weekly snapshots keyed by week number, department names normalised.
    pub fn weeks(&self) -> Result<BTreeMap<u32, WeekSnapshot>, PersistenceError> {
        self.weekly_metrics
            .iter()
            .map(|(key, snap)| {
                let week =
                    parse_week_key(key).ok_or_else(|| PersistenceError::BadWeekKey(key.clone()))?;
                let mut snap = snap.clone().normalized();
                snap.week = week;
                Ok((week, snap))
            })
            .collect()
    }

    pub fn set_weeks(&mut self, weeks: &BTreeMap<u32, WeekSnapshot>) {
        self.weekly_metrics = weeks
            .iter()
            .map(|(week, snap)| (week_key(*week), snap.clone()))
            .collect();
    }
}

/// Whole-file JSON store. Each save rewrites the document through a temp file.
#[derive(Debug)]
pub struct JsonMetricsStore {
    path: PathBuf,
    document: MetricsDocument,
}

impl JsonMetricsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let document = MetricsDocument::load(&path)?;
        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Constraint definitions carried in the same file.
    pub fn definitions(&self) -> &ConstraintCatalog {
        &self.document.metrics_definitions
    }
}

impl SnapshotStore for JsonMetricsStore {
    fn load(&self) -> Result<BTreeMap<u32, WeekSnapshot>, PersistenceError> {
        self.document.weeks()
    }

    fn save(&mut self, weeks: &BTreeMap<u32, WeekSnapshot>) -> Result<(), PersistenceError> {
        let mut next = self.document.clone();
        next.set_weeks(weeks);
        let text = serde_json::to_string_pretty(&next)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|e| PersistenceError::io(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| PersistenceError::io(&self.path, e))?;
        self.document = next;
        debug!(path = %self.path.display(), weeks = weeks.len(), "metrics saved");
        Ok(())
    }
}

/// Store kept in memory; used by tests, benches and dry runs.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    weeks: BTreeMap<u32, WeekSnapshot>,
    saves: usize,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weeks(weeks: BTreeMap<u32, WeekSnapshot>) -> Self {
        Self {
            weeks,
            ..Self::default()
        }
    }

    /// Make every following save fail.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn weeks(&self) -> &BTreeMap<u32, WeekSnapshot> {
        &self.weeks
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<BTreeMap<u32, WeekSnapshot>, PersistenceError> {
        Ok(self.weeks.clone())
    }

    fn save(&mut self, weeks: &BTreeMap<u32, WeekSnapshot>) -> Result<(), PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::Rejected("memory store is read-only".into()));
        }
        self.weeks = weeks.clone();
        self.saves += 1;
        Ok(())
    }
}

/// Append-only transcript of advisory discussions, one file per week.
#[derive(Clone, Debug)]
pub struct ConversationLog {
    dir: PathBuf,
}

impl ConversationLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, week: u32) -> PathBuf {
        self.dir.join(format!("week{week}_conversation.txt"))
    }

    pub fn append(
        &self,
        week: u32,
        version: u32,
        messages: &[AgentMessage],
    ) -> Result<PathBuf, PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::io(&self.dir, e))?;
        let path = self.path_for(week);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistenceError::io(&path, e))?;
        let mut out = format!(
            "=== recommendations version {version} ({}) ===\n",
            Utc::now().to_rfc3339()
        );
        for msg in messages {
            out.push_str(&format!("\n{}:\n{}\n", msg.agent, msg.content));
            out.push_str(&"-".repeat(50));
            out.push('\n');
        }
        file.write_all(out.as_bytes())
            .map_err(|e| PersistenceError::io(&path, e))?;
        info!(week, version, messages = messages.len(), "conversation appended");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{ConstraintSpec, MetricKey};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "persistence-{tag}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn week(n: u32, revenue: f64) -> WeekSnapshot {
        let mut s = WeekSnapshot::empty(n);
        s.set(&MetricKey::core("revenue"), revenue);
        s
    }

    #[test]
    fn json_store_rewrites_whole_file_and_keeps_definitions() {
        let dir = temp_dir("json");
        let path = dir.join("metrics_data.json");
        let mut doc = MetricsDocument::default();
        doc.metrics_definitions = ConstraintCatalog::new()
            .with_core("revenue", ConstraintSpec::new(-5.0, 5.0, 1.0));
        doc.weekly_metrics.insert("week1".into(), week(1, 100.0));
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let mut store = JsonMetricsStore::open(&path).unwrap();
        let mut weeks = store.load().unwrap();
        assert_eq!(weeks[&1].get(&MetricKey::core("revenue")), Some(100.0));
        weeks.insert(2, week(2, 105.0));
        store.save(&weeks).unwrap();

        let reopened = JsonMetricsStore::open(&path).unwrap();
        let back = reopened.load().unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[&2].week, 2);
        assert!(reopened
            .definitions()
            .spec_for(&MetricKey::core("revenue"))
            .is_some());
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"week2\""));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = temp_dir("missing");
        let store = JsonMetricsStore::open(dir.join("nope.json")).unwrap();
        assert!(store.load().unwrap().is_empty());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bad_week_key_is_reported() {
        let mut doc = MetricsDocument::default();
        doc.weekly_metrics.insert("latest".into(), week(1, 1.0));
        assert!(matches!(doc.weeks(), Err(PersistenceError::BadWeekKey(_))));
    }

    #[test]
    fn memory_store_can_refuse_writes() {
        let mut store = MemoryStore::new();
        let weeks = BTreeMap::from([(1, week(1, 10.0))]);
        store.save(&weeks).unwrap();
        store.fail_writes(true);
        assert!(store.save(&BTreeMap::new()).is_err());
        assert_eq!(store.weeks().len(), 1);
        assert_eq!(store.saves(), 1);
    }

    #[test]
    fn conversation_log_appends() {
        let dir = temp_dir("log");
        let log = ConversationLog::new(&dir);
        let msgs = vec![AgentMessage::new("CEO", "Grow revenue by 5%")];
        log.append(1, 1, &msgs).unwrap();
        let path = log.append(1, 2, &msgs).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.matches("Grow revenue by 5%").count(), 2);
        assert!(text.contains("version 2"));
        fs::remove_dir_all(&dir).ok();
    }
}
