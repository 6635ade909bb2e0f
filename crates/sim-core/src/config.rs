//! Loading of read-only scenario configuration.

use crate::{normalize_department, parse_week_key, Challenge, CatalogError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("challenge catalog has no weeks")]
    NoChallenges,
    #[error("challenge catalog key {0:?} is not of the form weekN")]
    BadWeekKey(String),
    #[error("challenge catalog is missing week {0}")]
    MissingWeek(u32),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Read a JSON or YAML document; `.yaml`/`.yml` select YAML, anything else JSON.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    debug!(path = %path.display(), yaml, "loading document");
    if yaml {
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    } else {
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Deserialize)]
struct ChallengeFile {
    weekly_challenges: BTreeMap<String, Challenge>,
}

/// Weekly challenges, loaded once per session. Week `n` lives at index `n-1`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChallengeCatalog {
    weeks: Vec<Challenge>,
}

impl ChallengeCatalog {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: ChallengeFile = load_document(path)?;
        Self::from_keyed(file.weekly_challenges)
    }

    /// Build from `weekN -> Challenge` entries; weeks must run 1..=N without gaps.
    pub fn from_keyed(entries: BTreeMap<String, Challenge>) -> Result<Self, ConfigError> {
        let mut by_week = BTreeMap::new();
        for (key, challenge) in entries {
            let week = parse_week_key(&key).ok_or_else(|| ConfigError::BadWeekKey(key.clone()))?;
            by_week.insert(week, challenge);
        }
        if by_week.is_empty() {
            return Err(ConfigError::NoChallenges);
        }
        let mut weeks = Vec::with_capacity(by_week.len());
        for (expected, (week, mut challenge)) in (1u32..).zip(by_week) {
            if week != expected {
                return Err(ConfigError::MissingWeek(expected));
            }
            challenge.week = week;
            challenge.department = normalize_department(&challenge.department);
            weeks.push(challenge);
        }
        Ok(Self { weeks })
    }

    pub fn from_challenges(challenges: Vec<Challenge>) -> Result<Self, ConfigError> {
        let keyed = challenges
            .into_iter()
            .enumerate()
            .map(|(i, c)| (crate::week_key(i as u32 + 1), c))
            .collect();
        Self::from_keyed(keyed)
    }

    pub fn get(&self, week: u32) -> Option<&Challenge> {
        let idx = usize::try_from(week).ok()?.checked_sub(1)?;
        self.weeks.get(idx)
    }

    pub fn total_weeks(&self) -> u32 {
        self.weeks.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn challenge(dept: &str) -> Challenge {
        Challenge {
            week: 0,
            department: dept.to_string(),
            situation: "s".into(),
            available_resources: BTreeMap::new(),
            constraints: BTreeMap::new(),
            possible_approaches: vec![],
        }
    }

    #[test]
    fn weeks_are_one_based_and_normalized() {
        let cat =
            ChallengeCatalog::from_challenges(vec![challenge("sales"), challenge("hr")]).unwrap();
        assert_eq!(cat.total_weeks(), 2);
        assert_eq!(cat.get(1).unwrap().department, "SALES");
        assert_eq!(cat.get(2).unwrap().week, 2);
        assert!(cat.get(0).is_none());
        assert!(cat.get(3).is_none());
    }

    #[test]
    fn gaps_and_bad_keys_fail() {
        let mut m = BTreeMap::new();
        m.insert("week1".to_string(), challenge("sales"));
        m.insert("week3".to_string(), challenge("hr"));
        assert!(matches!(
            ChallengeCatalog::from_keyed(m),
            Err(ConfigError::MissingWeek(2))
        ));
        let mut m = BTreeMap::new();
        m.insert("first".to_string(), challenge("sales"));
        assert!(matches!(
            ChallengeCatalog::from_keyed(m),
            Err(ConfigError::BadWeekKey(_))
        ));
        assert!(matches!(
            ChallengeCatalog::from_keyed(BTreeMap::new()),
            Err(ConfigError::NoChallenges)
        ));
    }

    #[test]
    fn loads_json_and_yaml() {
        let dir = std::env::temp_dir().join(format!("sim-core-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let json = dir.join("challenges.json");
        fs::write(
            &json,
            r#"{"weekly_challenges": {"week1": {"department": "Sales", "situation": "Slow quarter",
                "available_resources": {"budget": 50000}, "constraints": {"timeline": "4 weeks"},
                "possible_approaches": ["discounting"]}}}"#,
        )
        .unwrap();
        let cat = ChallengeCatalog::load(&json).unwrap();
        assert_eq!(cat.get(1).unwrap().possible_approaches, ["discounting"]);

        let yaml = dir.join("challenges.yaml");
        fs::write(
            &yaml,
            "weekly_challenges:\n  week1:\n    department: hr\n    situation: Attrition\n",
        )
        .unwrap();
        let cat = ChallengeCatalog::load(&yaml).unwrap();
        assert_eq!(cat.get(1).unwrap().department, "HR");
        fs::remove_dir_all(&dir).ok();
    }
}
