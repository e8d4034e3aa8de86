//! Host relation operations.
//!
//! Relations are upserted on `(source, target, type)`.  Batch inserts skip
//! relations whose hosts do not resolve instead of failing the batch.

use sqlx::Row;

use crate::error::{StoreError, StoreResult};
use crate::types::{HostRelation, RelationBatchReport, RelationInput};
use crate::{InventoryStore, now, object_to_json};

impl InventoryStore {
    /// Add (or refresh) a relation between two hosts by name.  Returns
    /// `None` when either host does not exist — including the race where a
    /// host is deleted concurrently, which surfaces as a foreign-key
    /// violation and is reported as "not found" rather than an internal
    /// error.
    pub async fn add_relation(&self, relation: &RelationInput) -> StoreResult<Option<i64>> {
        validate_confidence(relation.confidence)?;

        let mut tx = self.pool().begin().await?;
        let id = match add_relation_in_tx(&mut tx, relation).await {
            Ok(id) => id,
            Err(StoreError::Persistence { reason, .. })
                if reason.to_lowercase().contains("foreign key") =>
            {
                return Ok(None);
            }
            Err(other) => return Err(other),
        };
        tx.commit().await?;
        Ok(id)
    }

    /// Add many relations in one transaction.  Unresolvable hosts are
    /// skipped and listed in the report.
    pub async fn add_relations_batch(
        &self,
        relations: &[RelationInput],
    ) -> StoreResult<RelationBatchReport> {
        let mut report = RelationBatchReport::default();
        if relations.is_empty() {
            return Ok(report);
        }
        for relation in relations {
            validate_confidence(relation.confidence)?;
        }

        let mut tx = self.pool().begin().await?;
        for relation in relations {
            match add_relation_in_tx(&mut tx, relation).await? {
                Some(_) => report.saved += 1,
                None => report.skipped.push(format!(
                    "{} -> {} ({})",
                    relation.source_hostname, relation.target_hostname, relation.relation_type
                )),
            }
        }
        tx.commit().await?;
        Ok(report)
    }

    /// Relations, optionally filtered by hostname (either side), type, and
    /// validation flag.  An unknown hostname filter yields an empty list.
    pub async fn get_relations(
        &self,
        hostname: Option<&str>,
        relation_type: Option<&str>,
        validated_only: bool,
    ) -> StoreResult<Vec<HostRelation>> {
        let host_id = match hostname {
            Some(name) => match self.get_host_by_name(name).await? {
                Some(host) => Some(host.id),
                None => return Ok(vec![]),
            },
            None => None,
        };

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(
            "SELECT r.*, s.hostname AS source_hostname, t.hostname AS target_hostname
             FROM host_relations r
             JOIN hosts_v2 s ON r.source_host_id = s.id
             JOIN hosts_v2 t ON r.target_host_id = t.id
             WHERE 1=1",
        );
        if let Some(host_id) = host_id {
            qb.push(" AND (r.source_host_id = ");
            qb.push_bind(host_id);
            qb.push(" OR r.target_host_id = ");
            qb.push_bind(host_id);
            qb.push(")");
        }
        if let Some(relation_type) = relation_type {
            qb.push(" AND r.relation_type = ");
            qb.push_bind(relation_type.to_string());
        }
        if validated_only {
            qb.push(" AND r.validated_by_user = 1");
        }

        let rows = qb.build().fetch_all(self.pool()).await?;
        Ok(rows.iter().map(HostRelation::from_row).collect())
    }

    /// Mark a relation as validated by the user.
    pub async fn validate_relation(&self, relation_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE host_relations SET validated_by_user = 1 WHERE id = ?")
            .bind(relation_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn delete_relation(&self, relation_id: i64) -> StoreResult<bool> {
        let deleted = sqlx::query("DELETE FROM host_relations WHERE id = ?")
            .bind(relation_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

async fn add_relation_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    relation: &RelationInput,
) -> StoreResult<Option<i64>> {
    let source = relation.source_hostname.to_lowercase();
    let target = relation.target_hostname.to_lowercase();

    let source_id = match host_id_by_name(tx, &source).await? {
        Some(id) => id,
        None => return Ok(None),
    };
    let target_id = match host_id_by_name(tx, &target).await? {
        Some(id) => id,
        None => return Ok(None),
    };

    let ts = now();
    let row = sqlx::query(
        "INSERT INTO host_relations
         (source_host_id, target_host_id, relation_type, confidence,
          validated_by_user, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, COALESCE(?, '{}'), ?)
         ON CONFLICT(source_host_id, target_host_id, relation_type) DO UPDATE SET
             confidence = excluded.confidence,
             validated_by_user = excluded.validated_by_user,
             metadata = excluded.metadata,
             updated_at = ?
         RETURNING id",
    )
    .bind(source_id)
    .bind(target_id)
    .bind(&relation.relation_type)
    .bind(relation.confidence)
    .bind(if relation.validated { 1i64 } else { 0i64 })
    .bind(object_to_json(&relation.metadata))
    .bind(&ts)
    .bind(&ts)
    .fetch_one(&mut **tx)
    .await?;

    Ok(Some(row.get("id")))
}

async fn host_id_by_name(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    hostname: &str,
) -> StoreResult<Option<i64>> {
    let row = sqlx::query("SELECT id FROM hosts_v2 WHERE hostname = ?")
        .bind(hostname)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(row.map(|r| r.get("id")))
}

fn validate_confidence(confidence: f64) -> StoreResult<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(StoreError::InvalidInput(format!(
            "confidence must be within [0.0, 1.0], got {confidence}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HostInput;
    use crate::InventoryStore;

    fn relation(source: &str, target: &str, kind: &str) -> RelationInput {
        RelationInput {
            source_hostname: source.to_string(),
            target_hostname: target.to_string(),
            relation_type: kind.to_string(),
            confidence: 0.85,
            validated: false,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn upsert_by_unique_key() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        store.add_host(&HostInput::named("web-01"), None, "t").await.unwrap();
        store.add_host(&HostInput::named("web-02"), None, "t").await.unwrap();

        let id1 = store
            .add_relation(&relation("web-01", "web-02", "cluster_member"))
            .await
            .unwrap()
            .unwrap();
        let mut updated = relation("web-01", "web-02", "cluster_member");
        updated.confidence = 0.95;
        let id2 = store.add_relation(&updated).await.unwrap().unwrap();
        assert_eq!(id1, id2);

        let relations = store.get_relations(None, None, false).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert!((relations[0].confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn batch_skips_unknown_hosts() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        store.add_host(&HostInput::named("db-01"), None, "t").await.unwrap();
        store.add_host(&HostInput::named("db-02"), None, "t").await.unwrap();

        let report = store
            .add_relations_batch(&[
                relation("db-01", "db-02", "database_replica"),
                relation("db-01", "ghost", "depends_on"),
            ])
            .await
            .unwrap();
        assert_eq!(report.saved, 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].contains("ghost"));
    }

    #[tokio::test]
    async fn missing_host_is_not_an_error() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let id = store
            .add_relation(&relation("nope", "nada", "depends_on"))
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn confidence_out_of_range_rejected() {
        let store = InventoryStore::open_in_memory().await.unwrap();
        let mut bad = relation("a", "b", "depends_on");
        bad.confidence = 1.5;
        assert!(store.add_relation(&bad).await.is_err());
    }
}
