//! Local key material for nodes
//!
//! Nodes hold their own private keys and only ever send certificate signing
//!  requests to the backend:
//!
//! - **Node keys**: RSA (2048 bits or more) or EC (P-256, P-384), written as
//!   PKCS#8 PEM. Legacy PKCS#1 RSA keys are still loaded.
//! - **CSRs**: common name plus DNS and IP subject alternative names
//! - **Service-account key**: RSA key in PKCS#1 PEM, generated once per
//!   cluster and stored in the backend

mod keys;

pub use keys::{generate_rsa_pkcs1_pem, KeyError, KeySpec, KeyType, PrivateKey, MIN_RSA_BITS};
