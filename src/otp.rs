use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rand::{Rng, seq::SliceRandom};
use tracing::debug;

use crate::{domain::normalize_email, ttl_store::TtlStore};

pub const OTP_LEN: usize = 5;
const OTP_LETTERS: usize = 2;
const OTP_DIGITS: usize = 3;

/// Issues and verifies one-time email confirmation codes on top of a
/// dedicated [`TtlStore`]. Codes are single-use: a successful verify consumes
/// the entry before returning.
///
/// The 2-letter/3-digit shape is a product requirement, not a security
/// parameter; the keyspace is small and the code is only ever sent to the
/// mailbox being confirmed.
pub struct OtpGate {
    store: Arc<TtlStore<String>>,
    ttl: Duration,
}

impl OtpGate {
    pub fn new(store: Arc<TtlStore<String>>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn issue(&self, email: &str) -> String {
        self.issue_at(email, Utc::now())
    }

    /// Generates a fresh code and stores it under the normalized email,
    /// replacing any prior unconsumed code for that address.
    pub fn issue_at(&self, email: &str, now: DateTime<Utc>) -> String {
        let code = generate_code();
        let key = normalize_email(email);
        self.store.put_at(&key, code.clone(), self.ttl, now);
        debug!(email = %key, ttl_secs = self.ttl.as_secs(), "issued verification code");
        code
    }

    pub fn verify(&self, email: &str, code: &str) -> bool {
        self.verify_at(email, code, Utc::now())
    }

    /// True iff a live entry exists and matches. Missing, expired and
    /// mismatched codes are indistinguishable to the caller.
    pub fn verify_at(&self, email: &str, code: &str, now: DateTime<Utc>) -> bool {
        let key = normalize_email(email);
        self.store.take_if_at(&key, now, |stored| stored == code).is_some()
    }

    /// Drops any outstanding code without consuming it, used when a re-staged
    /// registration is configured to invalidate the previous code.
    pub fn revoke(&self, email: &str) {
        self.store.remove(&normalize_email(email));
    }

    pub fn outstanding(&self) -> usize {
        self.store.stats().count
    }
}

/// 5 characters: exactly 2 uppercase ASCII letters and 3 ASCII digits in
/// uniformly shuffled positions.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut chars = [0u8; OTP_LEN];
    for slot in chars.iter_mut().take(OTP_LETTERS) {
        *slot = rng.gen_range(b'A'..=b'Z');
    }
    for slot in chars.iter_mut().skip(OTP_LETTERS).take(OTP_DIGITS) {
        *slot = rng.gen_range(b'0'..=b'9');
    }
    chars.shuffle(&mut rng);
    String::from_utf8(chars.to_vec()).expect("ascii code")
}
