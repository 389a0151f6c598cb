use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    domain::{Registration, normalize_email},
    ttl_store::TtlStore,
};

/// Stages registration payloads in memory until the email is confirmed, so
/// unverified submissions never reach the durable store. A payload read by
/// [`take`](Self::take) stays staged until [`discard`](Self::discard) runs
/// after the durable commit; a failed commit therefore loses nothing.
pub struct PendingRegistry {
    store: Arc<TtlStore<Registration>>,
    ttl: Duration,
}

impl PendingRegistry {
    pub fn new(store: Arc<TtlStore<Registration>>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn stage(&self, registration: Registration) {
        self.stage_at(registration, Utc::now());
    }

    /// Re-staging the same email silently replaces the payload and restarts
    /// its TTL; this is the resend flow, not an error.
    pub fn stage_at(&self, registration: Registration, now: DateTime<Utc>) {
        let key = registration.normalized_email();
        self.store.put_at(&key, registration, self.ttl, now);
        debug!(email = %key, "staged pending registration");
    }

    pub fn take(&self, email: &str) -> Option<Registration> {
        self.take_at(email, Utc::now())
    }

    pub fn take_at(&self, email: &str, now: DateTime<Utc>) -> Option<Registration> {
        self.store.get_at(&normalize_email(email), now)
    }

    pub fn discard(&self, email: &str) {
        let key = normalize_email(email);
        self.store.remove(&key);
        debug!(email = %key, "discarded pending registration");
    }

    pub fn staged(&self) -> usize {
        self.store.stats().count
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;

    fn registration(email: &str, domain: &str) -> Registration {
        Registration {
            full_name: "Asha Verma".to_string(),
            branch: "CSE".to_string(),
            roll_number: "2200290100042".to_string(),
            gender: "Female".to_string(),
            scholar: "Day Scholar".to_string(),
            student_number: "2229042".to_string(),
            student_email: email.to_string(),
            mobile_number: "9876543210".to_string(),
            domain: domain.to_string(),
        }
    }

    fn registry() -> PendingRegistry {
        PendingRegistry::new(Arc::new(TtlStore::new()), Duration::from_secs(1800))
    }

    #[test]
    fn stage_then_take_returns_payload() {
        let registry = registry();
        let now = Utc::now();
        registry.stage_at(registration("a@x.com", "ML"), now);
        let taken = registry.take_at("a@x.com", now).expect("staged payload");
        assert_eq!(taken.domain, "ML");
    }

    #[test]
    fn restage_replaces_payload() {
        let registry = registry();
        let now = Utc::now();
        registry.stage_at(registration("a@x.com", "ML"), now);
        registry.stage_at(registration("a@x.com", "Web"), now);
        let taken = registry.take_at("a@x.com", now).expect("staged payload");
        assert_eq!(taken.domain, "Web");
        assert_eq!(registry.staged(), 1);
    }

    #[test]
    fn take_does_not_remove_payload() {
        let registry = registry();
        let now = Utc::now();
        registry.stage_at(registration("a@x.com", "ML"), now);
        assert!(registry.take_at("a@x.com", now).is_some());
        assert!(
            registry.take_at("a@x.com", now).is_some(),
            "payload must survive a read so a failed persist can retry"
        );
    }

    #[test]
    fn discard_removes_payload() {
        let registry = registry();
        let now = Utc::now();
        registry.stage_at(registration("a@x.com", "ML"), now);
        registry.discard("a@x.com");
        assert_eq!(registry.take_at("a@x.com", now), None);
        assert_eq!(registry.staged(), 0);
    }

    #[test]
    fn staged_payload_expires() {
        let registry = registry();
        let now = Utc::now();
        registry.stage_at(registration("a@x.com", "ML"), now);
        let later = now + TimeDelta::minutes(31);
        assert_eq!(registry.take_at("a@x.com", later), None);
    }

    #[test]
    fn key_is_normalized_email() {
        let registry = registry();
        let now = Utc::now();
        registry.stage_at(registration("Asha@X.COM", "ML"), now);
        assert!(registry.take_at("asha@x.com", now).is_some());
    }
}
