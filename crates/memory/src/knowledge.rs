//! Secondary store: an embedded redb file holding learned triage patterns,
//! recorded incidents, and remembered skills.
//!
//! This is the optional "long-term memory" mirror.  There is exactly one
//! writer per process, so writes are synchronous and need no replication or
//! conflict handling; when the file cannot be opened, callers degrade to
//! operating without it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pattern_store::PATTERNS_TABLE;

const INCIDENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("incidents");
const SKILLS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("skills");

/// A recorded incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub priority: String,
    pub service: String,
    pub environment: String,
    pub host: String,
    pub symptoms: Vec<String>,
    pub description: String,
    pub solution: Option<String>,
    pub commands_executed: Vec<String>,
    pub created_at: String,
}

/// A remembered operational skill (a named recipe of steps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub created_at: String,
}

pub struct SecondaryStore {
    db: Database,
    path: PathBuf,
}

impl SecondaryStore {
    /// Open or create the secondary store and ensure its tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening secondary store at {}", path.display()))?;
        {
            let tx = db.begin_write()?;
            tx.open_table(PATTERNS_TABLE)?;
            tx.open_table(INCIDENTS_TABLE)?;
            tx.open_table(SKILLS_TABLE)?;
            tx.commit()?;
        }
        debug!(path = %path.display(), "secondary store opened");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn with_write<R>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        f: impl for<'a> FnOnce(
            &mut redb::Table<'a, &'static str, &'static [u8]>,
        ) -> Result<R, redb::StorageError>,
    ) -> Result<R> {
        let tx = self.db.begin_write()?;
        let result = {
            let mut table = tx.open_table(def)?;
            f(&mut table)?
        };
        tx.commit()?;
        Ok(result)
    }

    pub(crate) fn with_read<R>(
        &self,
        def: TableDefinition<'static, &'static str, &'static [u8]>,
        f: impl FnOnce(
            &redb::ReadOnlyTable<&'static str, &'static [u8]>,
        ) -> Result<R, redb::StorageError>,
    ) -> Result<R> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(def)?;
        Ok(f(&table)?)
    }

    // ── Incidents ────────────────────────────────────────────────────────────

    /// Store an incident and return its id.
    #[allow(clippy::too_many_arguments)]
    pub fn record_incident(
        &self,
        title: &str,
        priority: &str,
        service: &str,
        environment: &str,
        host: &str,
        symptoms: Vec<String>,
        description: &str,
    ) -> Result<String> {
        let incident = Incident {
            id: format!("inc_{}", uuid::Uuid::new_v4().simple()),
            title: title.to_string(),
            priority: priority.to_string(),
            service: service.to_string(),
            environment: environment.to_string(),
            host: host.to_string(),
            symptoms,
            description: description.to_string(),
            solution: None,
            commands_executed: vec![],
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let id = incident.id.clone();
        let bytes = serde_json::to_vec(&incident)?;
        self.with_write(INCIDENTS_TABLE, |table| {
            table.insert(id.as_str(), bytes.as_slice())?;
            Ok(())
        })?;
        info!(incident = %id, title, "incident recorded");
        Ok(id)
    }

    /// Attach a solution (and the commands that produced it) to an incident.
    pub fn resolve_incident(
        &self,
        incident_id: &str,
        solution: &str,
        commands: Vec<String>,
    ) -> Result<bool> {
        self.with_write(INCIDENTS_TABLE, |table| {
            let Some(mut incident) = table
                .get(incident_id)?
                .and_then(|guard| serde_json::from_slice::<Incident>(guard.value()).ok())
            else {
                return Ok(false);
            };
            incident.solution = Some(solution.to_string());
            incident.commands_executed = commands;
            let bytes = serde_json::to_vec(&incident)
                .map_err(|e| redb::StorageError::Corrupted(e.to_string()))?;
            table.insert(incident_id, bytes.as_slice())?;
            Ok(true)
        })
    }

    /// Incidents scored by keyword overlap against the query, best first.
    pub fn find_similar_incidents(
        &self,
        query: &str,
        service: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Incident>> {
        let needles: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .map(ToOwned::to_owned)
            .collect();

        let mut scored: Vec<(usize, Incident)> = self.with_read(INCIDENTS_TABLE, |table| {
            let mut scored = Vec::new();
            for entry in table.iter()? {
                let (_, value) = entry?;
                let Ok(incident) = serde_json::from_slice::<Incident>(value.value()) else {
                    continue;
                };
                if let Some(service) = service {
                    if !service.is_empty() && incident.service != service {
                        continue;
                    }
                }
                let haystack = format!(
                    "{} {} {}",
                    incident.title.to_lowercase(),
                    incident.symptoms.join(" ").to_lowercase(),
                    incident.description.to_lowercase()
                );
                let score = needles.iter().filter(|n| haystack.contains(n.as_str())).count();
                if score > 0 || needles.is_empty() {
                    scored.push((score, incident));
                }
            }
            Ok(scored)
        })?;

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        Ok(scored.into_iter().take(limit).map(|(_, i)| i).collect())
    }

    pub fn incident_count(&self) -> Result<u64> {
        self.with_read(INCIDENTS_TABLE, |table| {
            let mut n = 0u64;
            for entry in table.iter()? {
                entry?;
                n += 1;
            }
            Ok(n)
        })
    }

    // ── Skills ───────────────────────────────────────────────────────────────

    pub fn remember_skill(&self, name: &str, description: &str, steps: Vec<String>) -> Result<()> {
        let skill = Skill {
            name: name.to_string(),
            description: description.to_string(),
            steps,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let key = name.to_lowercase();
        let bytes = serde_json::to_vec(&skill)?;
        self.with_write(SKILLS_TABLE, |table| {
            table.insert(key.as_str(), bytes.as_slice())?;
            Ok(())
        })
    }

    /// Exact name match first, then substring match over names and
    /// descriptions.
    pub fn recall_skill(&self, query: &str) -> Result<Option<Skill>> {
        let needle = query.to_lowercase();
        self.with_read(SKILLS_TABLE, |table| {
            if let Some(guard) = table.get(needle.as_str())? {
                if let Ok(skill) = serde_json::from_slice::<Skill>(guard.value()) {
                    return Ok(Some(skill));
                }
            }
            for entry in table.iter()? {
                let (key, value) = entry?;
                let Ok(skill) = serde_json::from_slice::<Skill>(value.value()) else {
                    continue;
                };
                if key.value().contains(&needle)
                    || skill.description.to_lowercase().contains(&needle)
                {
                    return Ok(Some(skill));
                }
            }
            Ok(None)
        })
    }

    pub fn skill_count(&self) -> Result<u64> {
        self.with_read(SKILLS_TABLE, |table| {
            let mut n = 0u64;
            for entry in table.iter()? {
                entry?;
                n += 1;
            }
            Ok(n)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> SecondaryStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.redb");
        std::mem::forget(dir);
        SecondaryStore::open(path).unwrap()
    }

    #[test]
    fn incidents_round_trip_and_rank() {
        let store = open_store();
        let id = store
            .record_incident(
                "MongoDB down on prod",
                "P0",
                "mongodb",
                "prod",
                "prod-db-01",
                vec!["connection refused".to_string()],
                "replica set lost primary",
            )
            .unwrap();
        store
            .record_incident(
                "Disk full on staging",
                "P2",
                "system",
                "staging",
                "stage-01",
                vec!["no space left".to_string()],
                "log rotation broken",
            )
            .unwrap();

        let hits = store
            .find_similar_incidents("mongodb connection refused", None, 5)
            .unwrap();
        assert_eq!(hits[0].id, id);

        assert!(store
            .resolve_incident(&id, "stepped down stale primary", vec!["rs.stepDown()".into()])
            .unwrap());
        let hits = store.find_similar_incidents("mongodb", Some("mongodb"), 5).unwrap();
        assert_eq!(hits[0].solution.as_deref(), Some("stepped down stale primary"));
    }

    #[test]
    fn skills_recall_by_name_and_substring() {
        let store = open_store();
        store
            .remember_skill(
                "rotate-nginx-logs",
                "Force log rotation for nginx",
                vec!["logrotate -f /etc/logrotate.d/nginx".to_string()],
            )
            .unwrap();

        assert!(store.recall_skill("rotate-nginx-logs").unwrap().is_some());
        assert!(store.recall_skill("nginx").unwrap().is_some());
        assert!(store.recall_skill("postgres").unwrap().is_none());
        assert_eq!(store.skill_count().unwrap(), 1);
    }
}
