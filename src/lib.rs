pub mod backup;
pub mod captcha;
pub mod config;
pub mod domain;
pub mod export;
pub mod http;
pub mod id;
pub mod mailer;
pub mod otp;
pub mod pending;
pub mod store;
pub mod ttl_store;
pub mod version;
