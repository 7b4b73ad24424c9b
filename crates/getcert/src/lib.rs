//! ACME v1 certificate client library.
//!
//! The binary in `main.rs` is a thin wrapper around these modules:
//!
//! - [`config`] - workspace + per-domain configuration (`getssl.cfg`)
//! - [`crypto`] - keys, JWK/JWS, CSR and X.509 handling
//! - [`acme`] - nonce-tracking transport and the signed request engine
//! - [`challenge`] - HTTP-01 / DNS-01 orchestration
//! - [`lifecycle`] - the full issue/renew/deploy pipeline
//! - [`session`] - on-disk workspace, temp dir and cleanup guarantees

pub mod acme;
pub mod challenge;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod dns;
pub mod env_expand;
pub mod hooks;
pub mod lifecycle;
pub mod probe;
pub mod session;
pub mod transport;
