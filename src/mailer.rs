use std::{future::Future, pin::Pin};

use tracing::info;

pub type SendFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Outbound notification boundary. The core only needs to know whether the
/// code reached the transport; real SMTP delivery lives behind this seam.
pub trait Mailer: Send + Sync {
    fn send_code(&self, email: &str, code: &str) -> SendFuture;
    fn send_confirmation(&self, email: &str) -> SendFuture;
}

/// Logs instead of sending. Used when no transport is configured, matching
/// the service's development mode: the code shows up in the server log.
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_code(&self, email: &str, code: &str) -> SendFuture {
        let email = email.to_string();
        let code = code.to_string();
        Box::pin(async move {
            info!(email = %email, code = %code, "mail transport disabled, verification code logged");
            true
        })
    }

    fn send_confirmation(&self, email: &str) -> SendFuture {
        let email = email.to_string();
        Box::pin(async move {
            info!(email = %email, "mail transport disabled, confirmation logged");
            true
        })
    }
}
