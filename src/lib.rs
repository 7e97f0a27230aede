//! # Gardi (in-process security core)
//!
//! `gardi` protects credentials at rest, governs authentication attempts
//! against brute force, flags anomalous access, and keeps a tamper-evident,
//! retention-bounded audit trail. It is the security core behind a
//! request-handling front end; routing, status-code mapping, and
//! address-to-location resolution stay with the caller.
//!
//! ## Components
//!
//! - [`vault::Vault`]: AES-256-GCM encryption with self-contained
//!   [`vault::Envelope`]s (fresh IV per call, embedded alongside the
//!   ciphertext).
//! - [`governor::LoginGovernor`]: per-identity failure counting and the
//!   lockout state machine, consulted before any credential work.
//! - [`anomaly::AnomalyDetector`]: known-device tracking and the
//!   travel-plausibility heuristic over consecutive request origins.
//! - [`audit::AuditLog`]: append-only trail with an on-demand sweep and a
//!   spawnable periodic retention sweeper.
//! - [`gardi::SecurityCore`]: the façade the boundary layer calls for
//!   registration, authentication, credential rotation, and sensitive-field
//!   storage.
//!
//! ## Ordering invariant
//!
//! Every authentication decision follows the same sequence: governor check,
//! credential verification, governor update, anomaly checks (success only),
//! audit emission. Failed verifications update the governor and the audit
//! trail together.
//!
//! ## Concurrency
//!
//! Attempt state and behavioral profiles sit behind per-identity locks, so
//! concurrent attempts against one identity serialize without contending
//! with other identities. The audit log serializes appends and sweeps on a
//! single lock; it is not a per-identity hot path.

pub mod anomaly;
pub mod audit;
pub mod error;
pub mod gardi;
pub mod governor;
pub mod vault;

pub use crate::anomaly::{AnomalyDetector, Coordinates, Origin, OriginAssessment};
pub use crate::audit::{
    spawn_retention_sweeper, AuditAction, AuditEntry, AuditFilter, AuditKind, AuditLog,
    DenialReason, SweeperHandle,
};
pub use crate::error::{Error, Result};
pub use crate::gardi::{AuthOutcome, CoreConfig, SecurityCore};
pub use crate::governor::{
    AttemptDecision, FailureOutcome, GovernorConfig, LoginGovernor,
};
pub use crate::vault::{Envelope, Vault};
