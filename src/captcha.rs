use serde::Deserialize;
use tracing::{debug, warn};

pub const SITEVERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Clone)]
pub struct CaptchaVerifier {
    client: reqwest::Client,
    secret: Option<String>,
    verify_url: String,
}

impl CaptchaVerifier {
    pub fn new(client: reqwest::Client, secret: &str) -> Self {
        Self::with_verify_url(client, secret, SITEVERIFY_URL)
    }

    pub fn with_verify_url(client: reqwest::Client, secret: &str, verify_url: &str) -> Self {
        let secret = match secret.trim() {
            "" => None,
            s => Some(s.to_string()),
        };
        Self {
            client,
            secret,
            verify_url: verify_url.to_string(),
        }
    }

    /// Verifies a reCAPTCHA response token. Without a configured secret the
    /// check is skipped and accepted (development mode). Transport errors
    /// count as "not valid", never as a server fault.
    pub async fn verify(&self, response_token: &str) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            debug!("captcha secret not configured, accepting token unchecked");
            return true;
        };

        let result = self
            .client
            .post(&self.verify_url)
            .form(&[("secret", secret), ("response", response_token)])
            .send()
            .await;
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "captcha verification request failed");
                return false;
            }
        };
        match response.json::<SiteVerifyResponse>().await {
            Ok(body) => {
                debug!(success = body.success, score = ?body.score, "captcha verified");
                body.success
            }
            Err(err) => {
                warn!(error = %err, "captcha verification response unreadable");
                false
            }
        }
    }
}
