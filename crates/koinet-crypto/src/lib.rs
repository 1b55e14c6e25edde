//! Cryptographic primitives for the KOI-net node.
//!
//! Two concerns live here:
//!
//! - [`hash`] — SHA-256 digests used for content hashes, edge RIDs, and
//!   the RID/public-key identity binding.
//! - [`keys`] — ECDSA P-256 keypairs that sign and verify wire envelopes.
//!   Public keys travel as base64-encoded SPKI DER strings; signatures as
//!   base64-encoded raw `r || s` bytes.

pub mod hash;
pub mod keys;

pub use keys::{Keypair, PublicKey};
