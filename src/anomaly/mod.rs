//! Device and origin anomaly tracking, one behavioral profile per identity.
//!
//! The detector is an audit-only signal source: it never blocks an
//! authentication on its own. Device sets grow monotonically; the origin
//! check compares consecutive sightings of the same identity against a
//! minimum feasible travel time derived from great-circle distance.

pub mod geo;

pub use geo::{Coordinates, Origin};

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Outcome of an origin observation.
#[derive(Debug, Clone, PartialEq)]
pub enum OriginAssessment {
    Plausible,
    Implausible {
        distance_km: f64,
        minimum_travel: Duration,
        elapsed: Duration,
    },
}

impl OriginAssessment {
    #[must_use]
    pub fn is_implausible(&self) -> bool {
        matches!(self, Self::Implausible { .. })
    }
}

#[derive(Debug, Default)]
struct IdentityProfile {
    devices: HashSet<String>,
    last_sighting: Option<(Origin, DateTime<Utc>)>,
}

pub struct AnomalyDetector {
    profiles: RwLock<HashMap<String, Arc<Mutex<IdentityProfile>>>>,
}

impl AnomalyDetector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }

    /// Record a device fingerprint; true exactly when it is an anomaly worth
    /// flagging.
    ///
    /// The first fingerprint ever seen for an identity seeds the baseline and
    /// is not flagged. After that, a fingerprint is flagged once when it is
    /// newly added; repeating a known fingerprint returns false.
    pub async fn observe_device(&self, identity: &str, fingerprint: &str) -> bool {
        let profile = self.profile_for(identity).await;
        let mut profile = profile.lock().await;
        if profile.devices.is_empty() {
            profile.devices.insert(fingerprint.to_string());
            return false;
        }
        profile.devices.insert(fingerprint.to_string())
    }

    /// Record an origin sighting at `now` and judge the transition from the
    /// previous one.
    ///
    /// Implausible means the elapsed time between consecutive sightings is
    /// shorter than the minimum feasible travel time between them. A missing
    /// coordinate on either side is insufficient information and judged
    /// plausible, never a false positive.
    pub async fn observe_origin(
        &self,
        identity: &str,
        origin: &Origin,
        now: DateTime<Utc>,
    ) -> OriginAssessment {
        let profile = self.profile_for(identity).await;
        let mut profile = profile.lock().await;
        let previous = profile.last_sighting.replace((origin.clone(), now));

        let Some((previous_origin, previous_at)) = previous else {
            return OriginAssessment::Plausible;
        };
        let (Some(from), Some(to)) = (previous_origin.coordinates, origin.coordinates) else {
            return OriginAssessment::Plausible;
        };

        let distance_km = geo::haversine_km(from, to);
        let minimum_travel = geo::minimum_travel_time(distance_km);
        let elapsed = now - previous_at;
        if elapsed < minimum_travel {
            OriginAssessment::Implausible {
                distance_km,
                minimum_travel,
                elapsed,
            }
        } else {
            OriginAssessment::Plausible
        }
    }

    /// Number of distinct devices seen for `identity`, for harness assertions.
    pub async fn device_count(&self, identity: &str) -> usize {
        match self.profiles.read().await.get(identity) {
            Some(profile) => profile.lock().await.devices.len(),
            None => 0,
        }
    }

    async fn profile_for(&self, identity: &str) -> Arc<Mutex<IdentityProfile>> {
        if let Some(profile) = self.profiles.read().await.get(identity) {
            return profile.clone();
        }
        let mut profiles = self.profiles.write().await;
        profiles.entry(identity.to_string()).or_default().clone()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn madrid() -> Origin {
        Origin::new("Madrid", "M", "ES").with_coordinates(40.4168, -3.7038)
    }

    fn sydney() -> Origin {
        Origin::new("Sydney", "NSW", "AU").with_coordinates(-33.8688, 151.2093)
    }

    #[tokio::test]
    async fn first_device_seeds_baseline_then_new_ones_flag_once() {
        let detector = AnomalyDetector::new();

        assert!(!detector.observe_device("a@example.com", "device-1").await);
        assert!(!detector.observe_device("a@example.com", "device-1").await);
        assert!(detector.observe_device("a@example.com", "device-2").await);
        assert!(!detector.observe_device("a@example.com", "device-2").await);
        assert_eq!(detector.device_count("a@example.com").await, 2);
    }

    #[tokio::test]
    async fn device_sets_are_per_identity() {
        let detector = AnomalyDetector::new();

        assert!(!detector.observe_device("a@example.com", "device-1").await);
        assert!(detector.observe_device("a@example.com", "device-2").await);
        // A different identity starts with its own empty baseline.
        assert!(!detector.observe_device("b@example.com", "device-2").await);
    }

    #[tokio::test]
    async fn first_sighting_is_plausible() {
        let detector = AnomalyDetector::new();
        let assessment = detector
            .observe_origin("a@example.com", &madrid(), Utc::now())
            .await;
        assert_eq!(assessment, OriginAssessment::Plausible);
    }

    #[tokio::test]
    async fn impossible_hop_is_flagged() {
        let detector = AnomalyDetector::new();
        let now = Utc::now();

        detector.observe_origin("a@example.com", &madrid(), now).await;
        let assessment = detector
            .observe_origin("a@example.com", &sydney(), now + Duration::hours(2))
            .await;

        assert!(assessment.is_implausible());
    }

    #[tokio::test]
    async fn slow_hop_is_plausible() {
        let detector = AnomalyDetector::new();
        let now = Utc::now();

        detector.observe_origin("a@example.com", &madrid(), now).await;
        let assessment = detector
            .observe_origin("a@example.com", &sydney(), now + Duration::hours(30))
            .await;

        assert_eq!(assessment, OriginAssessment::Plausible);
    }

    #[tokio::test]
    async fn same_city_minutes_apart_is_plausible() {
        let detector = AnomalyDetector::new();
        let now = Utc::now();

        detector.observe_origin("a@example.com", &madrid(), now).await;
        let assessment = detector
            .observe_origin("a@example.com", &madrid(), now + Duration::minutes(1))
            .await;

        assert_eq!(assessment, OriginAssessment::Plausible);
    }

    #[tokio::test]
    async fn unknown_origin_is_never_suspicious() {
        let detector = AnomalyDetector::new();
        let now = Utc::now();

        detector.observe_origin("a@example.com", &madrid(), now).await;
        let assessment = detector
            .observe_origin("a@example.com", &Origin::unknown(), now + Duration::minutes(1))
            .await;
        assert_eq!(assessment, OriginAssessment::Plausible);

        // The unknown sighting also blanks the history for the next check.
        let assessment = detector
            .observe_origin("a@example.com", &sydney(), now + Duration::minutes(2))
            .await;
        assert_eq!(assessment, OriginAssessment::Plausible);
    }
}
