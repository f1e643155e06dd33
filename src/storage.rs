//! SQLite storage for profiles, mining sessions and the local ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collaborators::{Ledger, LedgerReceipt, NetworkStats, RewardStore};
use crate::error::{CollaboratorError, StoreError};
use crate::session::MiningSession;
use crate::types::UserRewardProfile;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    state TEXT NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_current
    ON sessions(user_id) WHERE archived = 0;

CREATE TABLE IF NOT EXISTS ledger_entries (
    idempotency_key TEXT PRIMARY KEY,
    transaction_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    amount REAL NOT NULL,
    issued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger_entries(user_id);
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Backend(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        info!("Opened reward store at {}", path.display());
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Every session ever recorded for a user, newest first
    pub fn session_history(&self, user_id: &str) -> Result<Vec<MiningSession>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM sessions WHERE user_id = ?1 ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(StoreError::from))
            .collect()
    }

    /// Total issued to a user by the local ledger
    pub fn issued_total(&self, user_id: &str) -> Result<f64, StoreError> {
        let conn = self.conn.lock();
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0.0) FROM ledger_entries WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn stored_version(tx: &Transaction<'_>, user_id: &str) -> Result<Option<u64>, StoreError> {
    let version = tx
        .query_row(
            "SELECT version FROM profiles WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(version.map(|v| v as u64))
}

/// Version-checked write. Returns the new version without touching `profile`
/// so a rolled-back transaction leaves the caller's copy unchanged.
fn write_profile(tx: &Transaction<'_>, profile: &UserRewardProfile) -> Result<u64, StoreError> {
    let expected = profile.version;
    let next = expected + 1;
    let mut stored = profile.clone();
    stored.version = next;
    let data = serde_json::to_string(&stored)?;
    let updated_at = profile.updated_at.to_rfc3339();

    let changed = if expected == 0 {
        tx.execute(
            "INSERT OR IGNORE INTO profiles (user_id, version, data, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![profile.user_id, next as i64, data, updated_at],
        )?
    } else {
        tx.execute(
            "UPDATE profiles SET version = ?2, data = ?3, updated_at = ?4 WHERE user_id = ?1 AND version = ?5",
            params![profile.user_id, next as i64, data, updated_at, expected as i64],
        )?
    };

    if changed == 0 {
        let found = stored_version(tx, &profile.user_id)?.unwrap_or(0);
        return Err(StoreError::VersionConflict {
            entity: "profile",
            id: profile.user_id.clone(),
            expected,
            found,
        });
    }
    Ok(next)
}

fn write_session(tx: &Transaction<'_>, session: &MiningSession) -> Result<(), StoreError> {
    let data = serde_json::to_string(session)?;
    let state = serde_json::to_value(session.state)?
        .as_str()
        .unwrap_or_default()
        .to_string();
    tx.execute(
        "INSERT INTO sessions (session_id, user_id, state, archived, data, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
            state = excluded.state,
            archived = excluded.archived,
            data = excluded.data,
            updated_at = excluded.updated_at",
        params![
            session.session_id.to_string(),
            session.user_id,
            state,
            session.state.is_archived() as i64,
            data,
            session.last_update.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn read_receipt(conn: &Connection, key: &str) -> Result<Option<LedgerReceipt>, StoreError> {
    let row = conn
        .query_row(
            "SELECT idempotency_key, transaction_id, user_id, amount, issued_at FROM ledger_entries WHERE idempotency_key = ?1",
            params![key],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;
    row.map(|(idempotency_key, transaction_id, user_id, amount, issued_at)| {
        let issued_at = DateTime::parse_from_rfc3339(&issued_at)
            .map_err(|e| StoreError::Backend(format!("bad timestamp {}: {}", issued_at, e)))?
            .with_timezone(&Utc);
        Ok(LedgerReceipt {
            idempotency_key,
            transaction_id,
            user_id,
            amount,
            issued_at,
        })
    })
    .transpose()
}

#[async_trait]
impl RewardStore for SqliteStore {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserRewardProfile>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM profiles WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn save_profile(&self, profile: &mut UserRewardProfile) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let next = write_profile(&tx, profile)?;
        tx.commit()?;
        profile.version = next;
        Ok(())
    }

    async fn current_session(&self, user_id: &str) -> Result<Option<MiningSession>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE user_id = ?1 AND archived = 0",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<MiningSession>, StoreError> {
        let conn = self.conn.lock();
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.map(|d| serde_json::from_str(&d)).transpose()?)
    }

    async fn commit(
        &self,
        profile: &mut UserRewardProfile,
        session: &MiningSession,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let next = write_profile(&tx, profile)?;
        write_session(&tx, session)?;
        tx.commit()?;
        profile.version = next;
        debug!(
            "Committed {} v{} with session {} ({:?})",
            profile.user_id, next, session.session_id, session.state
        );
        Ok(())
    }

    async fn record_receipt(
        &self,
        session_id: Uuid,
        receipt: &LedgerReceipt,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let data: Option<String> = tx
            .query_row(
                "SELECT data FROM sessions WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Err(StoreError::Backend(format!("unknown session {}", session_id)));
        };
        let mut session: MiningSession = serde_json::from_str(&data)?;
        if let Some(claim) = session.claim.as_mut() {
            claim.ledger_receipt = Some(receipt.clone());
        }
        tx.execute(
            "UPDATE sessions SET data = ?2 WHERE session_id = ?1",
            params![session_id.to_string(), serde_json::to_string(&session)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn network_stats(&self) -> Result<NetworkStats, StoreError> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))?;
        Ok(NetworkStats {
            total_users: total.max(0) as u64,
        })
    }
}

/// Local ledger for single-node deployments: one row per idempotency key
#[async_trait]
impl Ledger for SqliteStore {
    async fn issue_tokens(
        &self,
        user_id: &str,
        amount: f64,
        idempotency_key: &str,
    ) -> Result<LedgerReceipt, CollaboratorError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(CollaboratorError::Rejected(format!("invalid amount {}", amount)));
        }
        let conn = self.conn.lock();
        let unavailable = |e: StoreError| CollaboratorError::Unavailable(e.to_string());
        conn.execute(
            "INSERT OR IGNORE INTO ledger_entries (idempotency_key, transaction_id, user_id, amount, issued_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                idempotency_key,
                Uuid::new_v4().to_string(),
                user_id,
                amount,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| unavailable(e.into()))?;

        let receipt = read_receipt(&conn, idempotency_key)
            .map_err(unavailable)?
            .ok_or_else(|| CollaboratorError::Unavailable("ledger entry vanished".to_string()))?;
        if receipt.user_id != user_id {
            return Err(CollaboratorError::Rejected(format!(
                "idempotency key {} belongs to another user",
                idempotency_key
            )));
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::{MiningCalculator, MiningConfig, MiningInputs};
    use crate::session::RateSnapshot;

    fn profile(user: &str) -> UserRewardProfile {
        UserRewardProfile::new(user, true, Utc::now())
    }

    fn session_for(p: &UserRewardProfile) -> MiningSession {
        let calc = MiningCalculator::new(MiningConfig::default());
        let inputs = MiningInputs::from_profile(p, calc.phase_for(0), 0, Utc::now());
        MiningSession::start(p.user_id.clone(), RateSnapshot::new(inputs, Utc::now()), Utc::now())
    }

    #[tokio::test]
    async fn test_profile_round_trip_and_versioning() {
        let store = SqliteStore::in_memory().unwrap();
        let mut alice = profile("alice");
        store.save_profile(&mut alice).await.unwrap();
        assert_eq!(alice.version, 1);

        let mut stale = store.load_profile("alice").await.unwrap().unwrap();
        alice.holdings = 5.0;
        store.save_profile(&mut alice).await.unwrap();
        assert_eq!(alice.version, 2);

        stale.holdings = 99.0;
        let err = store.save_profile(&mut stale).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
        assert_eq!(stale.version, 1);

        let loaded = store.load_profile("alice").await.unwrap().unwrap();
        assert_eq!(loaded.holdings, 5.0);
        assert!(store.load_profile("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let store = SqliteStore::in_memory().unwrap();
        store.save_profile(&mut profile("bob")).await.unwrap();
        assert!(store.save_profile(&mut profile("bob")).await.is_err());
        assert_eq!(store.network_stats().await.unwrap().total_users, 1);
    }

    #[tokio::test]
    async fn test_commit_is_atomic() {
        let store = SqliteStore::in_memory().unwrap();
        let mut alice = profile("alice");
        store.save_profile(&mut alice).await.unwrap();

        let session = session_for(&alice);
        store.commit(&mut alice, &session).await.unwrap();
        let current = store.current_session("alice").await.unwrap().unwrap();
        assert_eq!(current.session_id, session.session_id);

        // A stale profile version must not write the session either
        let mut stale = alice.clone();
        stale.version = 1;
        let other = session_for(&alice);
        assert!(store.commit(&mut stale, &other).await.is_err());
        assert!(store.find_session(other.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ledger_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store.issue_tokens("alice", 1.5, "claim:1").await.unwrap();
        let again = store.issue_tokens("alice", 1.5, "claim:1").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(store.issued_total("alice").unwrap(), 1.5);

        assert!(store.issue_tokens("mallory", 1.5, "claim:1").await.is_err());
        assert!(store.issue_tokens("alice", 0.0, "claim:2").await.is_err());
    }
}
