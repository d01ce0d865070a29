//! API handlers for partgate.
//!
//! `auth` holds the authentication and authorization core; `health` is the
//! probe used by load balancers.

pub mod auth;
pub mod health;
