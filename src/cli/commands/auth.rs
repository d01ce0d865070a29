use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

use crate::api::handlers::auth::{
    access_token::MIN_SECRET_BYTES, MAX_ACCESS_TOKEN_TTL_SECONDS, MAX_LOCK_DURATION_SECONDS,
    MAX_REFRESH_TOKEN_TTL_SECONDS,
};

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_lockout_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL, used as the CORS origin and to decide the cookie Secure flag")
                .env("PARTGATE_FRONTEND_BASE_URL")
                .default_value("https://partgate.dev"),
        )
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("HS256 signing secret for access tokens (at least 32 bytes)")
                .env("PARTGATE_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token TTL in seconds")
                .env("PARTGATE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TOKEN_TTL_SECONDS)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token TTL in seconds")
                .env("PARTGATE_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TOKEN_TTL_SECONDS)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("lockout-threshold")
                .long("lockout-threshold")
                .help("Consecutive failed logins before the account locks")
                .env("PARTGATE_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(i32).range(1..)),
        )
        .arg(
            Arg::new("lockout-duration-seconds")
                .long("lockout-duration-seconds")
                .help("How long a locked account stays locked, in seconds")
                .env("PARTGATE_LOCKOUT_DURATION_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LOCK_DURATION_SECONDS)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub jwt_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub lockout_threshold: i32,
    pub lockout_duration_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if a required value is missing or the secret is too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>("jwt-secret")
            .map(|secret| SecretString::from(secret.as_str()))
            .context("missing required argument: --jwt-secret")?;
        // Never echo the value back.
        if jwt_secret.expose_secret().len() < MIN_SECRET_BYTES {
            bail!("--jwt-secret must be at least {MIN_SECRET_BYTES} bytes");
        }

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            jwt_secret,
            access_token_ttl_seconds: required(matches, "access-token-ttl-seconds")?,
            refresh_token_ttl_seconds: required(matches, "refresh-token-ttl-seconds")?,
            lockout_threshold: required(matches, "lockout-threshold")?,
            lockout_duration_seconds: required(matches, "lockout-duration-seconds")?,
        })
    }
}

fn required<T: Copy + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .copied()
        .with_context(|| format!("missing required argument: --{id}"))
}
