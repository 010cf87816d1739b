//! Rendezvous: session orchestration for two-party threshold keygen and signing
//!
//! ## Description
//!
//! This crate contains the server half of a t-of-n threshold key generation and signing
//! service. A remote client and this server each hold one share of a key; neither party
//! ever holds the full private key. The multi-round MPC math itself is delegated to an
//! external signer (see [`signer::MpcSigner`]), this crate only orchestrates *when* and
//! *where* those rounds happen.
//!
//! ## Protocol Summary
//!
//! For every keygen or signing run the server asks the signer to allocate a *room*, a
//! rendezvous channel both parties join. The HTTP handler answers immediately with the
//! room identifier (and for keygen, the server's keygen id), then the run itself is handed
//! to the [`dispatcher::Dispatcher`] which executes it detached from the request. The
//! client joins the same room and the two parties complete the rounds together.
//!
//! Keygen results are kept in memory by the [`store::SessionStore`] under a sliding TTL,
//! so every signing request or existence check keeps a share alive. Nothing survives a
//! process restart.
//!
//! ## Usage Notes
//!
//! A detached run never reports back to the request that started it. Callers learn whether
//! keygen completed by probing `/api/check-exists`, and clients validate their local
//! [`backup::BackupPackage`] the same way before trusting it.
//!
//! > ⚠ Overlapping keygen requests for the same user and scheme race; the last run to
//! finish wins.

pub mod backup;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod room;
pub mod routes;
pub mod scheme;
pub mod session;
pub mod signer;
pub mod store;
pub mod ttl_cache;

pub use error::Error;
pub use scheme::Scheme;
