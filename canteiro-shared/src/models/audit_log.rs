//! Audit log
//!
//! Append-only, one chain per company. Each entry stores the hash of its predecessor and
//! its own hash:
//!
//! ```text
//! hash_curr = SHA-256(hash_prev || seq || action || 0x00 || entity_type || 0x00 || entity_id || payload)
//! ```
//!
//! `seq` starts at 0 and is contiguous. Editing or deleting any row breaks every hash
//! after it, which [`verify_entries`] reports as the first broken sequence number.
//!
//! Appends run on the caller's transaction and take a per-company advisory lock, so the
//! entry commits or rolls back together with the change it describes.
//!
//! ```no_run
//! use canteiro_shared::models::audit_log::{AuditEntry, NewAuditEntry};
//! use serde_json::json;
//! use sqlx::PgPool;
//! use uuid::Uuid;
//!
//! # async fn example(pool: PgPool, company_id: Uuid, user_id: Uuid, id: Uuid) -> Result<(), sqlx::Error> {
//! let mut tx = pool.begin().await?;
//! AuditEntry::append(&mut tx, company_id, NewAuditEntry {
//!     actor_id: Some(user_id),
//!     action: "delete",
//!     entity_type: "employee",
//!     entity_id: Some(id),
//!     payload: json!({}),
//! }).await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{Page, PageRequest};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub company_id: Uuid,
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub payload: JsonValue,
    #[serde(with = "hex_opt")]
    pub hash_prev: Option<Vec<u8>>,
    #[serde(with = "hex_bytes")]
    pub hash_curr: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: Option<Uuid>,
    pub action: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<Uuid>,
    pub payload: JsonValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
}

/// Outcome of a chain check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub entries: i64,
    /// First entry whose hash or link does not match
    pub first_broken_seq: Option<i64>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Hash of one entry given its predecessor's hash
pub fn compute_hash(
    hash_prev: Option<&[u8]>,
    seq: i64,
    action: &str,
    entity_type: &str,
    entity_id: Option<Uuid>,
    payload: &JsonValue,
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    if let Some(prev) = hash_prev {
        hasher.update(prev);
    }
    hasher.update(seq.to_be_bytes());
    hasher.update(action.as_bytes());
    hasher.update([0u8]);
    hasher.update(entity_type.as_bytes());
    hasher.update([0u8]);
    if let Some(id) = entity_id {
        hasher.update(id.as_bytes());
    }
    // serde_json maps are sorted, so a payload read back from JSONB hashes the same
    hasher.update(payload.to_string().as_bytes());

    hasher.finalize().to_vec()
}

/// Checks an ordered run of entries starting at `seq = 0`
pub fn verify_entries(entries: &[AuditEntry]) -> ChainVerification {
    let mut previous: Option<&[u8]> = None;

    for (expected_seq, entry) in (0i64..).zip(entries) {
        let expected = compute_hash(
            previous,
            entry.seq,
            &entry.action,
            &entry.entity_type,
            entry.entity_id,
            &entry.payload,
        );

        let linked = entry.hash_prev.as_deref() == previous;
        if entry.seq != expected_seq || !linked || entry.hash_curr != expected {
            return ChainVerification {
                valid: false,
                entries: entries.len() as i64,
                first_broken_seq: Some(entry.seq),
            };
        }

        previous = Some(&entry.hash_curr);
    }

    ChainVerification {
        valid: true,
        entries: entries.len() as i64,
        first_broken_seq: None,
    }
}

const COLUMNS: &str = "company_id, seq, ts, actor_id, action, entity_type, entity_id, payload, hash_prev, hash_curr";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &AuditFilter) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(entity_type) = &filter.entity_type {
        qb.push(" AND entity_type = ").push_bind(entity_type.clone());
    }
    if let Some(entity_id) = filter.entity_id {
        qb.push(" AND entity_id = ").push_bind(entity_id);
    }
    if let Some(actor_id) = filter.actor_id {
        qb.push(" AND actor_id = ").push_bind(actor_id);
    }
}

impl AuditEntry {
    pub const SORTABLE: &'static [&'static str] = &["seq"];

    /// Appends an entry to the company's chain
    pub async fn append(conn: &mut PgConnection, company_id: Uuid, data: NewAuditEntry) -> Result<Self, sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(company_id)
            .execute(&mut *conn)
            .await?;

        let last: Option<(i64, Vec<u8>)> = sqlx::query_as(
            "SELECT seq, hash_curr FROM audit_logs WHERE company_id = $1 ORDER BY seq DESC LIMIT 1",
        )
        .bind(company_id)
        .fetch_optional(&mut *conn)
        .await?;

        let (seq, hash_prev) = match last {
            Some((seq, hash)) => (seq + 1, Some(hash)),
            None => (0, None),
        };

        let hash_curr = compute_hash(
            hash_prev.as_deref(),
            seq,
            data.action,
            data.entity_type,
            data.entity_id,
            &data.payload,
        );

        let entry = sqlx::query_as::<_, AuditEntry>(&format!(
            r#"
            INSERT INTO audit_logs
                (company_id, seq, actor_id, action, entity_type, entity_id, payload, hash_prev, hash_curr)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(seq)
        .bind(data.actor_id)
        .bind(data.action)
        .bind(data.entity_type)
        .bind(data.entity_id)
        .bind(data.payload)
        .bind(hash_prev)
        .bind(hash_curr)
        .fetch_one(&mut *conn)
        .await?;

        Ok(entry)
    }

    /// Appends an entry in its own transaction
    pub async fn record(pool: &PgPool, company_id: Uuid, data: NewAuditEntry) -> Result<Self, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let entry = Self::append(&mut tx, company_id, data).await?;
        tx.commit().await?;

        Ok(entry)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &AuditFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM audit_logs");
        push_filters(&mut count, company_id, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM audit_logs", COLUMNS));
        push_filters(&mut query, company_id, filter);
        query
            .push(" ORDER BY seq ")
            .push(page.order.as_sql())
            .push(" LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset);
        let items = query.build_query_as::<AuditEntry>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    /// Recomputes the whole chain of a company
    pub async fn verify_chain(pool: &PgPool, company_id: Uuid) -> Result<ChainVerification, sqlx::Error> {
        let entries = sqlx::query_as::<_, AuditEntry>(&format!(
            "SELECT {} FROM audit_logs WHERE company_id = $1 ORDER BY seq ASC",
            COLUMNS
        ))
        .bind(company_id)
        .fetch_all(pool)
        .await?;

        Ok(verify_entries(&entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(company_id: Uuid, actions: &[&str]) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = Vec::new();
        for (seq, action) in (0i64..).zip(actions) {
            let hash_prev = entries.last().map(|e| e.hash_curr.clone());
            let payload = json!({"seq": seq, "note": action});
            let entity_id = Some(Uuid::new_v4());
            let hash_curr = compute_hash(hash_prev.as_deref(), seq, action, "employee", entity_id, &payload);
            entries.push(AuditEntry {
                company_id,
                seq,
                ts: Utc::now(),
                actor_id: None,
                action: action.to_string(),
                entity_type: "employee".to_string(),
                entity_id,
                payload,
                hash_prev,
                hash_curr,
            });
        }
        entries
    }

    #[test]
    fn test_hash_length_and_sensitivity() {
        let payload = json!({"name": "Ana"});
        let a = compute_hash(None, 0, "create", "employee", None, &payload);
        let b = compute_hash(None, 1, "create", "employee", None, &payload);
        let c = compute_hash(None, 0, "create", "employe", None, &payload);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_field_separator_prevents_ambiguity() {
        let payload = json!({});
        let a = compute_hash(None, 0, "ab", "c", None, &payload);
        let b = compute_hash(None, 0, "a", "bc", None, &payload);
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a: JsonValue = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: JsonValue = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(
            compute_hash(None, 0, "update", "asset", None, &a),
            compute_hash(None, 0, "update", "asset", None, &b)
        );
    }

    #[test]
    fn test_valid_chain() {
        let entries = chain(Uuid::new_v4(), &["create", "update", "delete"]);
        let result = verify_entries(&entries);
        assert!(result.valid);
        assert_eq!(result.entries, 3);
        assert_eq!(result.first_broken_seq, None);
    }

    #[test]
    fn test_empty_chain_is_valid() {
        assert!(verify_entries(&[]).valid);
    }

    #[test]
    fn test_tampered_payload_detected() {
        let mut entries = chain(Uuid::new_v4(), &["create", "update", "delete"]);
        entries[1].payload = json!({"seq": 1, "note": "forged"});
        let result = verify_entries(&entries);
        assert!(!result.valid);
        assert_eq!(result.first_broken_seq, Some(1));
    }

    #[test]
    fn test_deleted_entry_detected() {
        let mut entries = chain(Uuid::new_v4(), &["create", "update", "delete"]);
        entries.remove(1);
        assert_eq!(verify_entries(&entries).first_broken_seq, Some(2));
    }

    #[test]
    fn test_hashes_serialize_as_hex() {
        let entries = chain(Uuid::new_v4(), &["create"]);
        let value = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(value["hash_prev"], JsonValue::Null);
        assert_eq!(value["hash_curr"].as_str().unwrap().len(), 64);
    }
}
