//! SQLite-backed template store and audit ledger.
//!
//! One connection behind a mutex serves both tables. Every write is a single
//! statement, so it commits or fails as a unit.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use facegate_core::store::{AuditLedger, InsertError, TemplateStore};
use facegate_core::{
    AccessEvent, EventId, Identity, IdentityId, NewAccessEvent, NewIdentity, Outcome, SnapshotRef,
    StorageError, Template,
};

const IDENTITY_COLUMNS: &str = "id, display_name, credential_token, template, photo_ref, created_at";
const EVENT_COLUMNS: &str = "id, recorded_at, subject_name, outcome, snapshot_ref";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db)?;
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        configure_pragmas(&conn)?;
        run_migrations(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(current_version(&conn))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".into()))
    }
}

fn configure_pragmas(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;",
    )
    .map_err(db)
}

fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    let current = current_version(conn);
    let migrations: [(i64, &str); 1] = [(1, include_str!("../migrations/001_initial.sql"))];

    for (version, sql) in migrations {
        if version > current {
            tracing::info!(version, "running migration");
            conn.execute_batch(sql)
                .map_err(|e| StorageError::Database(format!("migration v{version} failed: {e}")))?;
        }
    }
    Ok(())
}

/// Schema version, 0 before the first migration.
fn current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

fn db(e: rusqlite::Error) -> StorageError {
    StorageError::Database(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("corrupt timestamp {raw:?}: {e}")))
}

struct IdentityRow {
    id: i64,
    display_name: String,
    credential_token: String,
    template: Vec<u8>,
    photo_ref: Option<String>,
    created_at: String,
}

impl IdentityRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            credential_token: row.get(2)?,
            template: row.get(3)?,
            photo_ref: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_identity(self) -> Result<Identity, StorageError> {
        Ok(Identity {
            id: IdentityId(self.id),
            display_name: self.display_name,
            credential_token: self.credential_token,
            template: Template(self.template),
            photo_ref: self.photo_ref.map(SnapshotRef),
            created_at: parse_time(&self.created_at)?,
        })
    }
}

struct EventRow {
    id: i64,
    recorded_at: String,
    subject_name: String,
    outcome: String,
    snapshot_ref: Option<String>,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recorded_at: row.get(1)?,
            subject_name: row.get(2)?,
            outcome: row.get(3)?,
            snapshot_ref: row.get(4)?,
        })
    }

    fn into_event(self) -> Result<AccessEvent, StorageError> {
        let outcome = Outcome::parse(&self.outcome)
            .ok_or_else(|| StorageError::Database(format!("unknown outcome {:?}", self.outcome)))?;
        Ok(AccessEvent {
            id: EventId(self.id),
            timestamp: parse_time(&self.recorded_at)?,
            subject_name: self.subject_name,
            outcome,
            snapshot_ref: self.snapshot_ref.map(SnapshotRef),
        })
    }
}

impl TemplateStore for SqliteStore {
    fn find_by_credential(&self, token: &str) -> Result<Option<Identity>, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE credential_token = ?1"),
                params![token],
                IdentityRow::read,
            )
            .optional()
            .map_err(db)?;
        row.map(IdentityRow::into_identity).transpose()
    }

    fn insert(&self, identity: NewIdentity) -> Result<Identity, InsertError> {
        let conn = self.conn()?;
        let created_at = identity.created_at.to_rfc3339();
        let result = conn.execute(
            "INSERT INTO identities (display_name, credential_token, template, photo_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.display_name,
                identity.credential_token,
                identity.template.as_bytes(),
                identity.photo_ref.as_ref().map(SnapshotRef::as_str),
                created_at,
            ],
        );
        match result {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(InsertError::DuplicateCredential),
            Err(e) => return Err(InsertError::Storage(db(e))),
        }

        Ok(Identity {
            id: IdentityId(conn.last_insert_rowid()),
            display_name: identity.display_name,
            credential_token: identity.credential_token,
            template: identity.template,
            photo_ref: identity.photo_ref,
            created_at: identity.created_at,
        })
    }

    fn delete(&self, id: IdentityId) -> Result<Option<Identity>, StorageError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db)?;
        let row = tx
            .query_row(
                &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ?1"),
                params![id.0],
                IdentityRow::read,
            )
            .optional()
            .map_err(db)?;
        let Some(row) = row else {
            return Ok(None);
        };
        tx.execute("DELETE FROM identities WHERE id = ?1", params![id.0])
            .map_err(db)?;
        tx.commit().map_err(db)?;
        row.into_identity().map(Some)
    }

    fn list_all(&self) -> Result<Vec<Identity>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY id ASC"))
            .map_err(db)?;
        let rows = stmt.query_map([], IdentityRow::read).map_err(db)?;

        let mut identities = Vec::new();
        for row in rows {
            identities.push(row.map_err(db)?.into_identity()?);
        }
        Ok(identities)
    }
}

impl AuditLedger for SqliteStore {
    fn append(&self, event: NewAccessEvent) -> Result<AccessEvent, StorageError> {
        if !event.is_consistent() {
            return Err(StorageError::Rejected(format!(
                "{} event with snapshot present = {}",
                event.outcome,
                event.snapshot_ref.is_some()
            )));
        }

        let conn = self.conn()?;
        // Stamped under the lock so timestamps never disagree with id order.
        let timestamp = Utc::now();
        conn.execute(
            "INSERT INTO access_events (recorded_at, subject_name, outcome, snapshot_ref)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                timestamp.to_rfc3339(),
                event.subject_name,
                event.outcome.as_str(),
                event.snapshot_ref.as_ref().map(SnapshotRef::as_str),
            ],
        )
        .map_err(db)?;

        Ok(AccessEvent {
            id: EventId(conn.last_insert_rowid()),
            timestamp,
            subject_name: event.subject_name,
            outcome: event.outcome,
            snapshot_ref: event.snapshot_ref,
        })
    }

    fn recent(&self, limit: usize) -> Result<Vec<AccessEvent>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM access_events ORDER BY id DESC LIMIT ?1"
            ))
            .map_err(db)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], EventRow::read).map_err(db)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db)?.into_event()?);
        }
        Ok(events)
    }

    fn get(&self, id: EventId) -> Result<Option<AccessEvent>, StorageError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM access_events WHERE id = ?1"),
                params![id.0],
                EventRow::read,
            )
            .optional()
            .map_err(db)?;
        row.map(EventRow::into_event).transpose()
    }
}
