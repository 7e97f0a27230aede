//! Security core façade: registration, authentication, credential rotation,
//! and sensitive-field storage.
//!
//! One normative ordering runs through every authentication decision:
//! governor check, credential verification, governor update, anomaly checks
//! (success only), audit emission. Governor updates and their audit entries
//! are written together before the operation returns, so no decision is ever
//! recorded in one place but not the other.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::anomaly::{AnomalyDetector, Origin, OriginAssessment};
use crate::audit::{
    spawn_retention_sweeper, AuditAction, AuditEntry, AuditFilter, AuditLog, DenialReason,
    SweeperHandle,
};
use crate::error::{Error, Result};
use crate::governor::{AttemptDecision, GovernorConfig, LoginGovernor};
use crate::vault::{Envelope, Vault};

const DEFAULT_RETENTION_DAYS: i64 = 180;
const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;

/// Start-up configuration supplied by the boundary layer.
#[derive(Clone, Copy, Debug)]
pub struct CoreConfig {
    governor: GovernorConfig,
    retention_max_age: Duration,
    sweep_interval: std::time::Duration,
}

impl CoreConfig {
    /// Defaults: 5 tolerated failures, 15 minute lockout, 180 day audit
    /// retention swept hourly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            governor: GovernorConfig::new(),
            retention_max_age: Duration::days(DEFAULT_RETENTION_DAYS),
            sweep_interval: std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_lockout_threshold(mut self, threshold: u32) -> Self {
        self.governor = self.governor.with_threshold(threshold);
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.governor = self.governor.with_lockout_seconds(seconds);
        self
    }

    #[must_use]
    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_max_age = Duration::days(days);
        self
    }

    #[must_use]
    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval = std::time::Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn governor(&self) -> GovernorConfig {
        self.governor
    }

    #[must_use]
    pub fn retention_max_age(&self) -> Duration {
        self.retention_max_age
    }

    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        self.sweep_interval
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Successful authentication, with the anomaly signals observed along the
/// way. The signals never block the authentication itself; they are surfaced
/// so the boundary layer can step up verification if it wants to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthOutcome {
    pub new_device: bool,
    pub implausible_travel: bool,
}

/// The in-process security core. Composes the vault, governor, anomaly
/// detector, and audit log; owns the credential table and nothing else.
pub struct SecurityCore {
    vault: Vault,
    governor: LoginGovernor,
    anomaly: AnomalyDetector,
    audit: Arc<AuditLog>,
    credentials: RwLock<HashMap<String, Envelope>>,
    sweep_interval: std::time::Duration,
}

impl SecurityCore {
    #[must_use]
    pub fn new(key: [u8; 32], config: CoreConfig) -> Self {
        Self {
            vault: Vault::new(key),
            governor: LoginGovernor::new(config.governor()),
            anomaly: AnomalyDetector::new(),
            audit: Arc::new(AuditLog::new(config.retention_max_age())),
            credentials: RwLock::new(HashMap::new()),
            sweep_interval: config.sweep_interval(),
        }
    }

    /// Register a new identity with its secret.
    ///
    /// # Errors
    /// `InvalidInput` for an empty identity or secret, `DuplicateIdentity`
    /// when the identity already has a credential record.
    #[instrument(skip(self, secret, origin))]
    pub async fn register(
        &self,
        identity: &str,
        secret: &SecretString,
        origin: &Origin,
    ) -> Result<()> {
        let identity = normalize_identity(identity)?;
        ensure_secret(secret)?;

        {
            // Uniqueness check and insert under one write guard.
            let mut credentials = self.credentials.write().await;
            if credentials.contains_key(&identity) {
                return Err(Error::DuplicateIdentity);
            }
            let envelope = self.vault.encrypt(secret.expose_secret().as_bytes())?;
            credentials.insert(identity.clone(), envelope);
        }

        self.audit
            .append(AuditEntry::new(
                AuditAction::IdentityRegistered,
                Some(&identity),
                origin.clone(),
            ))
            .await;
        info!(%identity, "identity registered");
        Ok(())
    }

    /// Authenticate an identity with its secret, device fingerprint, and
    /// request origin.
    ///
    /// # Errors
    /// `LockedOut` when the governor refuses the attempt, `UnknownIdentity`
    /// or `BadCredential` on failed verification (both counted as failures),
    /// `Integrity` when the stored envelope does not authenticate.
    #[instrument(skip(self, secret, fingerprint, origin))]
    pub async fn authenticate(
        &self,
        identity: &str,
        secret: &SecretString,
        fingerprint: &str,
        origin: &Origin,
    ) -> Result<AuthOutcome> {
        let identity = normalize_identity(identity)?;
        if fingerprint.trim().is_empty() {
            return Err(Error::InvalidInput("device fingerprint must not be empty"));
        }
        let now = Utc::now();

        // Governor gate first: a locked identity never reaches decrypt or
        // compare work, so its timing gives nothing away about the secret.
        if let AttemptDecision::Locked { until } = self.governor.check_allowed(&identity, now).await
        {
            self.audit
                .append(AuditEntry::new(
                    AuditAction::AuthenticationDenied {
                        locked_until: until,
                    },
                    Some(&identity),
                    origin.clone(),
                ))
                .await;
            return Err(Error::LockedOut { until });
        }

        let Some(envelope) = self.lookup(&identity).await else {
            // Unknown identities count as failures, so probing for accounts
            // behaves exactly like guessing passwords.
            self.record_failed_attempt(&identity, origin, DenialReason::UnknownIdentity, now)
                .await;
            return Err(Error::UnknownIdentity);
        };

        let stored_secret = match self.vault.decrypt(&envelope) {
            Ok(plaintext) => plaintext,
            Err(Error::Integrity) => {
                error!(%identity, "stored credential envelope failed integrity checks");
                self.record_failed_attempt(&identity, origin, DenialReason::Integrity, now)
                    .await;
                return Err(Error::Integrity);
            }
            Err(err) => return Err(err),
        };

        if stored_secret != secret.expose_secret().as_bytes() {
            self.record_failed_attempt(&identity, origin, DenialReason::BadCredential, now)
                .await;
            return Err(Error::BadCredential);
        }

        self.governor.record_success(&identity).await;

        let new_device = self.anomaly.observe_device(&identity, fingerprint).await;
        if new_device {
            info!(%identity, fingerprint, "new device observed");
            self.audit
                .append(AuditEntry::new(
                    AuditAction::NewDevice {
                        fingerprint: fingerprint.to_string(),
                    },
                    Some(&identity),
                    origin.clone(),
                ))
                .await;
        }

        let assessment = self.anomaly.observe_origin(&identity, origin, now).await;
        let implausible_travel = match assessment {
            OriginAssessment::Implausible {
                distance_km,
                minimum_travel,
                elapsed,
            } => {
                warn!(
                    %identity,
                    distance_km, "implausible travel between consecutive authentications"
                );
                self.audit
                    .append(AuditEntry::new(
                        AuditAction::ImplausibleTravel {
                            distance_km,
                            minimum_seconds: minimum_travel.num_seconds(),
                            elapsed_seconds: elapsed.num_seconds(),
                        },
                        Some(&identity),
                        origin.clone(),
                    ))
                    .await;
                true
            }
            OriginAssessment::Plausible => false,
        };

        self.audit
            .append(AuditEntry::new(
                AuditAction::AuthenticationSucceeded,
                Some(&identity),
                origin.clone(),
            ))
            .await;
        info!(%identity, "authentication succeeded");

        Ok(AuthOutcome {
            new_device,
            implausible_travel,
        })
    }

    /// Replace an identity's secret after verifying the current one.
    ///
    /// Verification runs under the same governor rules as authentication, so
    /// rotation attempts cannot be used to brute-force a credential.
    #[instrument(skip(self, current, replacement, origin))]
    pub async fn rotate_credential(
        &self,
        identity: &str,
        current: &SecretString,
        replacement: &SecretString,
        origin: &Origin,
    ) -> Result<()> {
        let identity = normalize_identity(identity)?;
        ensure_secret(replacement)?;
        let now = Utc::now();

        if let AttemptDecision::Locked { until } = self.governor.check_allowed(&identity, now).await
        {
            self.audit
                .append(AuditEntry::new(
                    AuditAction::AuthenticationDenied {
                        locked_until: until,
                    },
                    Some(&identity),
                    origin.clone(),
                ))
                .await;
            return Err(Error::LockedOut { until });
        }

        let Some(envelope) = self.lookup(&identity).await else {
            self.record_failed_attempt(&identity, origin, DenialReason::UnknownIdentity, now)
                .await;
            return Err(Error::UnknownIdentity);
        };

        let stored_secret = match self.vault.decrypt(&envelope) {
            Ok(plaintext) => plaintext,
            Err(Error::Integrity) => {
                error!(%identity, "stored credential envelope failed integrity checks");
                self.record_failed_attempt(&identity, origin, DenialReason::Integrity, now)
                    .await;
                return Err(Error::Integrity);
            }
            Err(err) => return Err(err),
        };

        if stored_secret != current.expose_secret().as_bytes() {
            self.record_failed_attempt(&identity, origin, DenialReason::BadCredential, now)
                .await;
            return Err(Error::BadCredential);
        }

        self.governor.record_success(&identity).await;

        let replacement_envelope = self.vault.encrypt(replacement.expose_secret().as_bytes())?;
        self.credentials
            .write()
            .await
            .insert(identity.clone(), replacement_envelope);

        self.audit
            .append(AuditEntry::new(
                AuditAction::CredentialRotated,
                Some(&identity),
                origin.clone(),
            ))
            .await;
        info!(%identity, "credential rotated");
        Ok(())
    }

    /// Encrypt a sensitive field for a registered identity and return the
    /// envelope; the plaintext is never stored or logged.
    #[instrument(skip(self, value, origin))]
    pub async fn store_sensitive_field(
        &self,
        identity: &str,
        field: &str,
        value: &SecretString,
        origin: &Origin,
    ) -> Result<Envelope> {
        let identity = normalize_identity(identity)?;
        if field.trim().is_empty() {
            return Err(Error::InvalidInput("field name must not be empty"));
        }
        if !self.credentials.read().await.contains_key(&identity) {
            return Err(Error::UnknownIdentity);
        }

        let envelope = self.vault.encrypt(value.expose_secret().as_bytes())?;
        self.audit
            .append(AuditEntry::new(
                AuditAction::SensitiveFieldStored {
                    field: field.to_string(),
                },
                Some(&identity),
                origin.clone(),
            ))
            .await;
        Ok(envelope)
    }

    /// Decrypt a previously stored sensitive field, leaving an audit trace.
    #[instrument(skip(self, envelope, origin))]
    pub async fn open_sensitive_field(
        &self,
        identity: &str,
        field: &str,
        envelope: &Envelope,
        origin: &Origin,
    ) -> Result<Vec<u8>> {
        let identity = normalize_identity(identity)?;
        if field.trim().is_empty() {
            return Err(Error::InvalidInput("field name must not be empty"));
        }
        if !self.credentials.read().await.contains_key(&identity) {
            return Err(Error::UnknownIdentity);
        }

        let plaintext = self.vault.decrypt(envelope)?;
        self.audit
            .append(AuditEntry::new(
                AuditAction::SensitiveFieldOpened {
                    field: field.to_string(),
                },
                Some(&identity),
                origin.clone(),
            ))
            .await;
        Ok(plaintext)
    }

    /// Operator unlock: clears the identity's attempt state.
    #[instrument(skip(self, origin))]
    pub async fn unlock(&self, identity: &str, origin: &Origin) -> Result<()> {
        let identity = normalize_identity(identity)?;
        self.governor.reset(&identity).await;
        self.audit
            .append(AuditEntry::new(
                AuditAction::LockoutCleared,
                Some(&identity),
                origin.clone(),
            ))
            .await;
        Ok(())
    }

    /// Audit entries matching `filter`, in append order, for export by the
    /// boundary layer.
    pub async fn audit_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit.query(filter).await
    }

    /// On-demand retention sweep; returns how many entries were removed.
    pub async fn sweep_now(&self) -> usize {
        self.audit.sweep(Utc::now()).await
    }

    /// Start the periodic retention sweeper. The handle cancels the task on
    /// shutdown (or on drop).
    #[must_use]
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        spawn_retention_sweeper(self.audit.clone(), self.sweep_interval)
    }

    async fn lookup(&self, identity: &str) -> Option<Envelope> {
        self.credentials.read().await.get(identity).cloned()
    }

    /// Governor update and audit entry for a failed verification, written
    /// together.
    async fn record_failed_attempt(
        &self,
        identity: &str,
        origin: &Origin,
        reason: DenialReason,
        now: DateTime<Utc>,
    ) {
        let outcome = self.governor.record_failure(identity, now).await;
        self.audit
            .append(AuditEntry::new(
                AuditAction::AuthenticationFailed {
                    reason,
                    failure_count: outcome.failure_count,
                    lockout_triggered: outcome.lockout_triggered,
                },
                Some(identity),
                origin.clone(),
            ))
            .await;
    }
}

/// Identities are compared after trimming and lowercasing, the same
/// normalization applied at registration.
fn normalize_identity(identity: &str) -> Result<String> {
    let normalized = identity.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(Error::InvalidInput("identity must not be empty"));
    }
    Ok(normalized)
}

fn ensure_secret(secret: &SecretString) -> Result<()> {
    if secret.expose_secret().is_empty() {
        return Err(Error::InvalidInput("secret must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];

    fn core() -> SecurityCore {
        SecurityCore::new(KEY, CoreConfig::new())
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let core = core();
        let origin = Origin::unknown();

        core.register("a@example.com", &secret("pw"), &origin)
            .await
            .unwrap();
        let err = core
            .register("a@example.com", &secret("pw"), &origin)
            .await
            .unwrap_err();
        assert_eq!(err, Error::DuplicateIdentity);
    }

    #[tokio::test]
    async fn register_normalizes_identity() {
        let core = core();
        let origin = Origin::unknown();

        core.register(" Alice@Example.COM ", &secret("pw"), &origin)
            .await
            .unwrap();
        let err = core
            .register("alice@example.com", &secret("pw"), &origin)
            .await
            .unwrap_err();
        assert_eq!(err, Error::DuplicateIdentity);
    }

    #[tokio::test]
    async fn register_validates_input() {
        let core = core();
        let origin = Origin::unknown();

        assert!(matches!(
            core.register("  ", &secret("pw"), &origin).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            core.register("a@example.com", &secret(""), &origin).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn store_sensitive_field_requires_registration() {
        let core = core();
        let origin = Origin::unknown();

        let err = core
            .store_sensitive_field("ghost@example.com", "glucose", &secret("120"), &origin)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnknownIdentity);
    }

    #[tokio::test]
    async fn sensitive_field_roundtrip_with_audit() {
        let core = core();
        let origin = Origin::unknown();
        core.register("a@example.com", &secret("pw"), &origin)
            .await
            .unwrap();

        let envelope = core
            .store_sensitive_field("a@example.com", "glucose", &secret("120"), &origin)
            .await
            .unwrap();
        let plaintext = core
            .open_sensitive_field("a@example.com", "glucose", &envelope, &origin)
            .await
            .unwrap();
        assert_eq!(plaintext, b"120");

        let trail = core
            .audit_entries(&AuditFilter::all().with_identity("a@example.com"))
            .await;
        let kinds: Vec<_> = trail.iter().map(|entry| entry.action.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                crate::audit::AuditKind::IdentityRegistered,
                crate::audit::AuditKind::SensitiveFieldStored,
                crate::audit::AuditKind::SensitiveFieldOpened,
            ]
        );
    }

    #[tokio::test]
    async fn unknown_identity_counts_as_failure() {
        let core = core();
        let origin = Origin::unknown();

        let err = core
            .authenticate("ghost@example.com", &secret("pw"), "device-1", &origin)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnknownIdentity);
        assert_eq!(core.governor.failure_count("ghost@example.com").await, 1);
    }
}
