use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "evreg",
    about = "Event registration backend",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the registration HTTP server (default).
    Run,

    /// Write a snapshot of verified records to the backup directory and exit.
    Export,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "EVREG_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:8000"
    )]
    pub bind: SocketAddr,

    #[arg(
        long,
        global = true,
        env = "EVREG_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        global = true,
        env = "EVREG_BACKUP_DIR",
        value_name = "PATH",
        default_value = "./backups"
    )]
    pub backup_dir: PathBuf,

    #[arg(
        long = "backup-interval-hours",
        global = true,
        env = "EVREG_BACKUP_INTERVAL_HOURS",
        value_name = "HOURS",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(1..=168)
    )]
    pub backup_interval_hours: u64,

    #[arg(
        long = "backup-retry-minutes",
        global = true,
        env = "EVREG_BACKUP_RETRY_MINUTES",
        value_name = "MINS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=1440)
    )]
    pub backup_retry_minutes: u64,

    #[arg(
        long = "backup-startup-delay-minutes",
        global = true,
        env = "EVREG_BACKUP_STARTUP_DELAY_MINUTES",
        value_name = "MINS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(0..=60)
    )]
    pub backup_startup_delay_minutes: u64,

    #[arg(
        long = "backup-run-timeout-secs",
        global = true,
        env = "EVREG_BACKUP_RUN_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(5..=600)
    )]
    pub backup_run_timeout_secs: u64,

    #[arg(
        long = "otp-ttl-minutes",
        global = true,
        env = "EVREG_OTP_TTL_MINUTES",
        value_name = "MINS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=60)
    )]
    pub otp_ttl_minutes: u64,

    #[arg(
        long = "pending-ttl-minutes",
        global = true,
        env = "EVREG_PENDING_TTL_MINUTES",
        value_name = "MINS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..=240)
    )]
    pub pending_ttl_minutes: u64,

    #[arg(
        long = "sweep-interval-minutes",
        global = true,
        env = "EVREG_SWEEP_INTERVAL_MINUTES",
        value_name = "MINS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=60)
    )]
    pub sweep_interval_minutes: u64,

    #[arg(
        long = "revoke-otp-on-restage",
        global = true,
        env = "EVREG_REVOKE_OTP_ON_RESTAGE",
        value_name = "BOOL",
        default_value_t = false,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub revoke_otp_on_restage: bool,

    #[arg(
        long,
        global = true,
        env = "EVREG_ADMIN_TOKEN",
        value_name = "TOKEN",
        default_value = ""
    )]
    pub admin_token: String,

    #[arg(
        long,
        global = true,
        env = "EVREG_RECAPTCHA_SECRET",
        value_name = "SECRET",
        default_value = ""
    )]
    pub recaptcha_secret: String,
}
