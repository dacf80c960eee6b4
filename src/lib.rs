//! This is the documentation for the `kpabe` crate.
//!
//! * Developped by: Vipul Goyal, Omkant Pandey, Amit Sahai, Brent Waters,
//!   "Attribute-Based Encryption for Fine-Grained Access Control of Encrypted Data"
//! * Published in: ACM CCS 2006
//! * Available from: <https://eprint.iacr.org/2006/309.pdf>
//! * Type: encryption (key-policy attribute-based)
//! * Setting: bilinear groups (asymmetric)
//!
//! A ciphertext is produced under a set of attributes, a private key under
//! an access policy. Decryption succeeds exactly when the ciphertext's
//! attribute set satisfies the key's policy. Numeric attributes
//! (`level = 9`, 8 bits wide) and numeric comparisons in policies
//! (`level > 5`, 8 bits wide) are supported through the bit-decomposition
//! encoding of the kpabe toolkit: a comparison compiles into a small
//! threshold tree over per-bit attributes, so the scheme itself only ever
//! handles named attributes.
//!
//! # Examples
//!
//! ```
//! use kpabe::schemes::gpsw::*;
//! use kpabe::utils::policy::{Attribute, CompareOp, PolicyNode, UniverseAttribute};
//!
//! let mut rng = rand::thread_rng();
//! let universe = vec![
//!     UniverseAttribute::bare("sysadmin"),
//!     UniverseAttribute::numeric("level", 8),
//! ];
//! let (pk, msk) = setup(&mut rng, &universe).unwrap();
//! let policy = PolicyNode::and(vec![
//!     PolicyNode::attr("sysadmin"),
//!     PolicyNode::compare("level", CompareOp::Gt, 5, 8),
//! ]);
//! let sk = keygen(&mut rng, &pk, &msk, &policy).unwrap();
//! let attributes = vec![Attribute::bare("sysadmin"), Attribute::numeric("level", 9, 8)];
//! let ct = encrypt(&mut rng, &pk, &attributes, b"our plaintext!").unwrap();
//! assert_eq!(decrypt(&sk, &ct).unwrap(), b"our plaintext!");
//! ```
pub mod error;
pub mod schemes;
pub mod utils;

pub use crate::error::AbeError;
