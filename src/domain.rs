use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Registration payload as submitted by the form. Field names follow the
/// frontend wire format, hence the camelCase rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub full_name: String,
    pub branch: String,
    pub roll_number: String,
    pub gender: String,
    pub scholar: String,
    pub student_number: String,
    pub student_email: String,
    pub mobile_number: String,
    pub domain: String,
}

#[derive(Debug)]
pub enum ValidationError {
    EmptyField { field: &'static str },
    InvalidEmail,
    InvalidMobileNumber,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField { field } => write!(f, "field {field} must not be empty"),
            Self::InvalidEmail => write!(f, "studentEmail is not a valid email address"),
            Self::InvalidMobileNumber => write!(f, "mobileNumber must be exactly 10 digits"),
        }
    }
}

impl std::error::Error for ValidationError {}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
}

/// Canonical staging key: emails are matched case-insensitively across
/// register, resend and verify.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

impl Registration {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let required: [(&'static str, &str); 9] = [
            ("fullName", &self.full_name),
            ("branch", &self.branch),
            ("rollNumber", &self.roll_number),
            ("gender", &self.gender),
            ("scholar", &self.scholar),
            ("studentNumber", &self.student_number),
            ("studentEmail", &self.student_email),
            ("mobileNumber", &self.mobile_number),
            ("domain", &self.domain),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyField { field });
            }
        }
        if !email_regex().is_match(self.student_email.trim()) {
            return Err(ValidationError::InvalidEmail);
        }
        let mobile = self.mobile_number.trim();
        if mobile.len() != 10 || !mobile.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError::InvalidMobileNumber);
        }
        Ok(())
    }

    pub fn normalized_email(&self) -> String {
        normalize_email(&self.student_email)
    }
}
