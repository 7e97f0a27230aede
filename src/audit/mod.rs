//! Append-only audit trail with retention-bounded lifetime.
//!
//! Entries are immutable once appended and come back in append order. The
//! only other mutation is the retention sweep, which drops entries older than
//! the configured maximum age; [`AuditLog::sweep`] takes an explicit `now` so
//! tests never wait on the wall clock, and the periodic sweeper in
//! [`sweep`](self::sweep) drives the same call on a timer.

mod sweep;

pub use sweep::{spawn_retention_sweeper, SweeperHandle};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::anomaly::Origin;

/// Why an authentication attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    UnknownIdentity,
    BadCredential,
    /// The stored envelope failed integrity checks during verification.
    Integrity,
}

/// What happened, with the fixed fields of each action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditAction {
    IdentityRegistered,
    AuthenticationSucceeded,
    AuthenticationFailed {
        reason: DenialReason,
        failure_count: u32,
        lockout_triggered: bool,
    },
    /// Refused by the governor before any credential work.
    AuthenticationDenied {
        locked_until: DateTime<Utc>,
    },
    CredentialRotated,
    LockoutCleared,
    SensitiveFieldStored {
        field: String,
    },
    SensitiveFieldOpened {
        field: String,
    },
    NewDevice {
        fingerprint: String,
    },
    ImplausibleTravel {
        distance_km: f64,
        minimum_seconds: i64,
        elapsed_seconds: i64,
    },
}

/// Fieldless discriminant of [`AuditAction`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    IdentityRegistered,
    AuthenticationSucceeded,
    AuthenticationFailed,
    AuthenticationDenied,
    CredentialRotated,
    LockoutCleared,
    SensitiveFieldStored,
    SensitiveFieldOpened,
    NewDevice,
    ImplausibleTravel,
}

impl AuditAction {
    #[must_use]
    pub fn kind(&self) -> AuditKind {
        match self {
            Self::IdentityRegistered => AuditKind::IdentityRegistered,
            Self::AuthenticationSucceeded => AuditKind::AuthenticationSucceeded,
            Self::AuthenticationFailed { .. } => AuditKind::AuthenticationFailed,
            Self::AuthenticationDenied { .. } => AuditKind::AuthenticationDenied,
            Self::CredentialRotated => AuditKind::CredentialRotated,
            Self::LockoutCleared => AuditKind::LockoutCleared,
            Self::SensitiveFieldStored { .. } => AuditKind::SensitiveFieldStored,
            Self::SensitiveFieldOpened { .. } => AuditKind::SensitiveFieldOpened,
            Self::NewDevice { .. } => AuditKind::NewDevice,
            Self::ImplausibleTravel { .. } => AuditKind::ImplausibleTravel,
        }
    }
}

/// Immutable audit record. Ordering is append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub identity: Option<String>,
    pub origin: Origin,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
}

impl AuditEntry {
    #[must_use]
    pub fn new(action: AuditAction, identity: Option<&str>, origin: Origin) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.map(str::to_string),
            origin,
            timestamp: Utc::now(),
            action,
        }
    }

    /// Override the timestamp at construction time, for deterministic
    /// retention testing. Entries are immutable once appended.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Entry filter; the default matches everything.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    identity: Option<String>,
    kind: Option<AuditKind>,
}

impl AuditFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = Some(identity.to_string());
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: AuditKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(identity) = &self.identity {
            if entry.identity.as_deref() != Some(identity.as_str()) {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if entry.action.kind() != kind {
                return false;
            }
        }
        true
    }
}

/// Append-only store. One mutex serializes appends and sweeps, which keeps
/// the sequence linearizable and means a sweep can never observe a torn
/// entry; this log is not a per-identity hot path, so the single lock is
/// enough.
pub struct AuditLog {
    max_age: Duration,
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            entries: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn append(&self, entry: AuditEntry) {
        self.entries.lock().await.push(entry);
    }

    /// Entries matching `filter`, in append order.
    pub async fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }

    /// Drop entries older than the maximum age as of `now`; returns how many
    /// were removed. Idempotent for a fixed `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| now - entry.timestamp <= self.max_age);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "audit retention sweep");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn log_with_entries(max_age: Duration, ages_days: &[i64], now: DateTime<Utc>) -> AuditLog {
        let log = AuditLog::new(max_age);
        for days in ages_days {
            log.append(
                AuditEntry::new(
                    AuditAction::AuthenticationSucceeded,
                    Some("a@example.com"),
                    Origin::unknown(),
                )
                .with_timestamp(now - Duration::days(*days)),
            )
            .await;
        }
        log
    }

    #[tokio::test]
    async fn query_returns_append_order() {
        let log = AuditLog::new(Duration::days(180));
        log.append(AuditEntry::new(
            AuditAction::IdentityRegistered,
            Some("a@example.com"),
            Origin::unknown(),
        ))
        .await;
        log.append(AuditEntry::new(
            AuditAction::AuthenticationSucceeded,
            Some("a@example.com"),
            Origin::unknown(),
        ))
        .await;
        log.append(AuditEntry::new(
            AuditAction::AuthenticationSucceeded,
            Some("b@example.com"),
            Origin::unknown(),
        ))
        .await;

        let all = log.query(&AuditFilter::all()).await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].action.kind(), AuditKind::IdentityRegistered);
        assert_eq!(all[1].identity.as_deref(), Some("a@example.com"));
        assert_eq!(all[2].identity.as_deref(), Some("b@example.com"));
    }

    #[tokio::test]
    async fn query_filters_by_identity_and_kind() {
        let log = AuditLog::new(Duration::days(180));
        log.append(AuditEntry::new(
            AuditAction::IdentityRegistered,
            Some("a@example.com"),
            Origin::unknown(),
        ))
        .await;
        log.append(AuditEntry::new(
            AuditAction::AuthenticationSucceeded,
            Some("a@example.com"),
            Origin::unknown(),
        ))
        .await;
        log.append(AuditEntry::new(
            AuditAction::AuthenticationSucceeded,
            Some("b@example.com"),
            Origin::unknown(),
        ))
        .await;

        let for_identity = log
            .query(&AuditFilter::all().with_identity("a@example.com"))
            .await;
        assert_eq!(for_identity.len(), 2);

        let successes = log
            .query(&AuditFilter::all().with_kind(AuditKind::AuthenticationSucceeded))
            .await;
        assert_eq!(successes.len(), 2);

        let combined = log
            .query(
                &AuditFilter::all()
                    .with_identity("b@example.com")
                    .with_kind(AuditKind::AuthenticationSucceeded),
            )
            .await;
        assert_eq!(combined.len(), 1);
    }

    #[tokio::test]
    async fn sweep_honors_max_age_boundary() {
        let now = Utc::now();
        let log = log_with_entries(Duration::days(180), &[181, 179], now).await;

        let removed = log.sweep(now).await;
        assert_eq!(removed, 1);

        let remaining = log.query(&AuditFilter::all()).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, now - Duration::days(179));
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let now = Utc::now();
        let log = log_with_entries(Duration::days(180), &[200, 190, 10], now).await;

        assert_eq!(log.sweep(now).await, 2);
        assert_eq!(log.sweep(now).await, 0);
        assert_eq!(log.len().await, 1);
    }

    #[tokio::test]
    async fn entries_serialize_with_tagged_actions() {
        let entry = AuditEntry::new(
            AuditAction::AuthenticationFailed {
                reason: DenialReason::BadCredential,
                failure_count: 3,
                lockout_triggered: false,
            },
            Some("a@example.com"),
            Origin::unknown(),
        );

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"]["kind"], "authentication_failed");
        assert_eq!(json["action"]["reason"], "bad_credential");
        assert_eq!(json["action"]["failure_count"], 3);
    }
}
