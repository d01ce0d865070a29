//! # Partgate (Marketplace Auth Core)
//!
//! `partgate` is the authentication and authorization core of the auto-parts
//! marketplace API. Administrators, suppliers and mobile users log in with a
//! password and receive a pair of tokens; every protected endpoint then checks
//! the caller's role against a module/action permission table.
//!
//! ## Sessions
//!
//! - **Access token:** short-lived HS256 JWT returned in the response body and
//!   sent back as `Authorization: Bearer`. Validation is pure, no database hit.
//! - **Refresh token:** opaque 256-bit value in an `HttpOnly` cookie. The
//!   database stores only its SHA-256 digest. Each refresh rotates it with a
//!   compare-and-swap so a stolen value works at most once.
//!
//! ## Lockout
//!
//! Consecutive failed logins are counted with a single atomic `UPDATE`. At the
//! threshold the account locks for a fixed window; the lock lifts lazily on the
//! next attempt after it expires, on success, or through the admin unlock route.
//!
//! ## Authorization
//!
//! Permissions are rows of `(role, module) -> read/create/update/delete`.
//! Anything missing (role, row, active status) means "denied". Module names are
//! a closed enum checked against the `modules` table at startup.
//!
//! The schema lives in `sql/schema.sql`.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::Module;
    use anyhow::{ensure, Context, Result};
    use std::{fs, path::PathBuf};

    // Normalize SQL to avoid brittle formatting checks in schema tests.
    fn canonical_schema() -> Result<String> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("sql/schema.sql");
        let sql = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read SQL file at {}", path.display()))?;
        Ok(sql
            .chars()
            .filter(|ch| !ch.is_whitespace())
            .map(|ch| ch.to_ascii_lowercase())
            .collect())
    }

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn schema_seeds_every_module() -> Result<()> {
        let canonical = canonical_schema()?;
        for module in Module::ALL {
            ensure!(
                canonical.contains(&format!("('{}')", module.as_str())),
                "Module {module} is not seeded in sql/schema.sql"
            );
        }
        Ok(())
    }

    #[test]
    fn schema_keeps_security_constraints() -> Result<()> {
        let canonical = canonical_schema()?;
        ensure!(canonical.contains("token_hashbyteanotnullunique"));
        ensure!(canonical.contains("check(failed_attempts>=0)"));
        ensure!(canonical.contains("primarykey(role_id,module_id)"));
        Ok(())
    }
}
