//! ACME certificate lifecycle management
//!
//! This crate decides when a certificate must be issued or renewed, keeps
//! account and certificate state on disk with crash-safe writes, and exports
//! usable key/cert material for a TLS-terminating server. The ACME protocol
//! itself is reached through the [`AcmeClient`] trait; DNS-01 record
//! manipulation goes through [`ChallengeProvider`].

pub mod account;
pub mod client;
pub mod dns;
pub mod export;
pub mod lifecycle;
pub mod provider;
pub mod storage;
pub mod types;

pub use client::{AcmeClient, DirectoryClient};
pub use lifecycle::{decide, run_pass, Decision};
pub use provider::{provider_by_name, ChallengeProvider};
pub use storage::CertStore;
pub use types::{AccountRecord, AcmeError, AcmeResult, CertificateBundle};
