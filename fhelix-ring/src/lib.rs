//! RNS polynomial ring arithmetic.
//!
//! This crate implements the arithmetic layer consumed by the `fhelix`
//! evaluators: prime-field arithmetic in Montgomery form, negacyclic
//! number-theoretic transforms, polynomials in double-CRT representation,
//! and the RNS basis-conversion tools (fast basis extension and gadget
//! decomposition) that scheme-level operations are built from.

#![deny(rustdoc::broken_intra_doc_links)]

mod error;
mod modulus;
mod ntt;
mod poly;
mod ring;
mod rns;

pub use error::{Error, Result};
pub use modulus::{generate_primes, Modulus};
pub use ntt::NttTables;
pub use poly::Poly;
pub use ring::{Ring, GALOIS_GEN};
pub use rns::{BasisExtender, Decomposer};
