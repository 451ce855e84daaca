//! A pure-Rust leveled homomorphic encryption library.
//!
//! fhelix implements two RLWE schemes over a shared double-CRT polynomial
//! layer ([`fhelix_ring`]): an exact integer scheme with plaintext modulus t
//! ([`bfv`]) and an approximate fixed-point scheme over complex slots
//! ([`ckks`]), together with CKKS bootstrapping ([`ckks::bootstrap`]).
//!
//! Evaluators own their scratch memory and are single-threaded; call
//! `shallow_copy` to obtain an instance that shares all immutable data
//! (parameters and keys) but carries fresh pools, and run the copies on
//! disjoint ciphertexts in parallel.
//!
//! # Example
//!
//! ```rust
//! use fhelix::bfv::{BatchEncoder, BfvParametersBuilder, Decryptor, Encryptor, Evaluator, KeyGenerator};
//!
//! fn main() -> fhelix::Result<()> {
//! 	let params = BfvParametersBuilder::new()
//! 		.log_n(12)
//! 		.plaintext_modulus(65537)
//! 		.moduli_sizes(&[54, 54, 54])
//! 		.build()?;
//!
//! 	let mut keygen = KeyGenerator::new(&params);
//! 	let sk = keygen.gen_secret_key();
//! 	let encoder = BatchEncoder::new(&params)?;
//! 	let encryptor = Encryptor::new(&params, &sk);
//! 	let decryptor = Decryptor::new(&params, &sk);
//! 	let mut evaluator = Evaluator::new(&params)?;
//!
//! 	let pt = encoder.encode(&[1, 2, 3, 4])?;
//! 	let ct = encryptor.encrypt(&pt)?;
//! 	let doubled = evaluator.add(&ct, &ct)?;
//!
//! 	let decoded = encoder.decode(&decryptor.decrypt(&doubled))?;
//! 	assert_eq!(&decoded[..4], &[2, 4, 6, 8]);
//! 	Ok(())
//! }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod keys;
mod keyswitch;
mod serialization;

pub mod bfv;
pub mod ckks;

pub use error::{Error, Result};
pub use keys::{RelinearizationKey, RotationKeySet, SwitchingKey};
pub use serialization::{FromBytes, ToBytes};
