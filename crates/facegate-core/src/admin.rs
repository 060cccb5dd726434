//! Administrative context.
//!
//! Administrative operations take an explicit [`AdminContext`], which only
//! [`AdminAuthority::issue`] can produce. The decision pipeline never sees it.

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::error::StorageError;
use crate::store::{AuditLedger, SnapshotStore, TemplateStore};
use crate::types::{AccessEvent, EventId, Identity, IdentityId};

#[derive(Error, Debug)]
pub enum AdminError {
    #[error("invalid administrator credentials")]
    InvalidCredentials,
    #[error("administrator password is not configured")]
    NotConfigured,
}

/// Proof that the caller authenticated as administrator.
#[derive(Debug, Clone)]
pub struct AdminContext {
    session_id: String,
    issued_at: DateTime<Utc>,
}

impl AdminContext {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Issues [`AdminContext`]s against a configured password digest.
pub struct AdminAuthority {
    digest: Option<[u8; 32]>,
}

impl AdminAuthority {
    /// `None` disables administration entirely.
    pub fn new(password: Option<&str>) -> Self {
        Self {
            digest: password.filter(|p| !p.is_empty()).map(sha256),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    pub fn issue(&self, password: &str) -> Result<AdminContext, AdminError> {
        let expected = self.digest.as_ref().ok_or(AdminError::NotConfigured)?;
        let presented = sha256(password);
        if !bool::from(presented[..].ct_eq(&expected[..])) {
            tracing::warn!("administrator authentication failed");
            return Err(AdminError::InvalidCredentials);
        }

        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let session_id: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        tracing::info!(session = &session_id[..8], "administrator session issued");

        Ok(AdminContext {
            session_id,
            issued_at: Utc::now(),
        })
    }
}

fn sha256(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

pub fn list_identities(_ctx: &AdminContext, store: &dyn TemplateStore) -> Result<Vec<Identity>, StorageError> {
    store.list_all()
}

/// Delete an identity and, best effort, its enrollment photo.
///
/// Ledger entries that name the identity are untouched.
pub fn remove_identity(
    ctx: &AdminContext,
    store: &dyn TemplateStore,
    photos: &dyn SnapshotStore,
    id: IdentityId,
) -> Result<bool, StorageError> {
    let Some(removed) = store.delete(id)? else {
        return Ok(false);
    };
    tracing::info!(id = %id, session = &ctx.session_id[..8], "identity removed");
    if let Some(photo) = &removed.photo_ref {
        if let Err(e) = photos.remove(photo) {
            tracing::warn!(photo = %photo, error = %e, "failed to remove enrollment photo");
        }
    }
    Ok(true)
}

pub fn recent_events(
    _ctx: &AdminContext,
    ledger: &dyn AuditLedger,
    limit: usize,
) -> Result<Vec<AccessEvent>, StorageError> {
    ledger.recent(limit)
}

pub fn event(_ctx: &AdminContext, ledger: &dyn AuditLedger, id: EventId) -> Result<Option<AccessEvent>, StorageError> {
    ledger.get(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_with_correct_password() {
        let authority = AdminAuthority::new(Some("hunter2"));
        let ctx = authority.issue("hunter2").unwrap();
        assert_eq!(ctx.session_id().len(), 32);
        assert!(ctx.issued_at() <= Utc::now());
    }

    #[test]
    fn test_issue_rejects_wrong_password() {
        let authority = AdminAuthority::new(Some("hunter2"));
        assert!(matches!(authority.issue("hunter3"), Err(AdminError::InvalidCredentials)));
        assert!(matches!(authority.issue(""), Err(AdminError::InvalidCredentials)));
    }

    #[test]
    fn test_unconfigured_authority_issues_nothing() {
        assert!(!AdminAuthority::new(None).is_configured());
        assert!(matches!(AdminAuthority::new(None).issue("x"), Err(AdminError::NotConfigured)));
        assert!(matches!(AdminAuthority::new(Some("")).issue(""), Err(AdminError::NotConfigured)));
    }

    #[test]
    fn test_sessions_are_distinct() {
        let authority = AdminAuthority::new(Some("pw"));
        let a = authority.issue("pw").unwrap();
        let b = authority.issue("pw").unwrap();
        assert_ne!(a.session_id(), b.session_id());
    }
}
