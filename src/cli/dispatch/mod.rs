//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action that runs, here always the API
//! server with its auth configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        jwt_secret: auth_opts.jwt_secret,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        lockout_threshold: auth_opts.lockout_threshold,
        lockout_duration_seconds: auth_opts.lockout_duration_seconds,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const DSN: &str = "postgres://user@localhost:5432/partgate";

    #[test]
    fn short_jwt_secret_rejected() {
        temp_env::with_vars(
            [
                ("PARTGATE_DSN", Some(DSN)),
                ("PARTGATE_JWT_SECRET", Some("too-short")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["partgate"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    let message = err.to_string();
                    assert!(message.contains("at least 32 bytes"));
                    assert!(!message.contains("too-short"));
                }
            },
        );
    }

    #[test]
    fn server_action_carries_auth_options() {
        temp_env::with_vars(
            [
                ("PARTGATE_DSN", Some(DSN)),
                (
                    "PARTGATE_JWT_SECRET",
                    Some("0123456789abcdef0123456789abcdef"),
                ),
                ("PARTGATE_ACCESS_TOKEN_TTL_SECONDS", Some("300")),
                ("PARTGATE_PORT", None),
                ("PARTGATE_REFRESH_TOKEN_TTL_SECONDS", None),
                ("PARTGATE_LOCKOUT_THRESHOLD", None),
                ("PARTGATE_LOCKOUT_DURATION_SECONDS", None),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["partgate"]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected server action");
                };
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, DSN);
                assert_eq!(args.access_token_ttl_seconds, 300);
                assert_eq!(args.refresh_token_ttl_seconds, 604_800);
                assert_eq!(args.lockout_threshold, 5);
                assert_eq!(args.lockout_duration_seconds, 1800);
                assert_eq!(
                    args.jwt_secret.expose_secret(),
                    "0123456789abcdef0123456789abcdef"
                );
            },
        );
    }
}
