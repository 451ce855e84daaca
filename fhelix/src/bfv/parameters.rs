use std::sync::Arc;

use fhelix_ring::{generate_primes, Ring};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Policy for the scale-and-round step closing a BFV multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleRoundPolicy {
	/// Multiply the extended tensor by t before dividing by Q. Lower noise,
	/// but requires the auxiliary basis to absorb an extra factor of t.
	MulThenDown,
	/// Divide by Q first, then multiply by t. Adds noise on the order of
	/// |t| but only needs the auxiliary basis to cover Q itself.
	DownThenMul,
}

/// Parameters of the BFV scheme: ring degree, ciphertext chain Q, key-switch
/// extension P, the auxiliary multiplication basis Q', and the plaintext
/// modulus t, together with every ring and constant derived from them.
#[derive(Debug, Clone)]
pub struct BfvParameters {
	pub(crate) n: usize,
	pub(crate) log_n: usize,
	pub(crate) t: u64,
	pub(crate) sigma: f64,
	pub(crate) policy: ScaleRoundPolicy,

	pub(crate) moduli_q: Vec<u64>,
	pub(crate) moduli_p: Vec<u64>,
	pub(crate) moduli_qmul: Vec<u64>,

	pub(crate) ring_q: Arc<Ring>,
	pub(crate) ring_qmul: Arc<Ring>,
	pub(crate) ring_p: Arc<Ring>,
	pub(crate) ring_qp: Arc<Ring>,
	/// NTT over Z_t, present when t supports batching (t = 1 mod 2n).
	pub(crate) ring_t: Option<Arc<Ring>>,

	/// P mod q_j, the in-block gadget residue for key generation.
	pub(crate) p_mod_q: Vec<u64>,
	/// -t^-1 mod q_j, the plaintext scale-up factor.
	pub(crate) delta_mod_q: Vec<u64>,
	/// Q mod t.
	pub(crate) q_mod_t: u64,
}

impl BfvParameters {
	/// Ring degree n.
	pub fn degree(&self) -> usize {
		self.n
	}

	/// Plaintext modulus t.
	pub fn plaintext_modulus(&self) -> u64 {
		self.t
	}

	/// Ciphertext moduli chain Q.
	pub fn moduli(&self) -> &[u64] {
		&self.moduli_q
	}

	/// Key-switch extension chain P.
	pub fn extension_moduli(&self) -> &[u64] {
		&self.moduli_p
	}

	/// Number of primes per gadget block.
	pub fn alpha(&self) -> usize {
		self.moduli_p.len()
	}

	/// Number of gadget blocks.
	pub fn beta(&self) -> usize {
		self.moduli_q.len().div_ceil(self.moduli_p.len())
	}

	pub(crate) fn two_n(&self) -> u64 {
		2 * self.n as u64
	}

	/// Galois element of the column rotation by `k` slots to the left.
	pub fn galois_element_for_column_rotation(&self, k: usize) -> u64 {
		pow_mod_u64(fhelix_ring::GALOIS_GEN, k as u64, self.two_n())
	}

	/// Galois element of the inverse generator, for right rotations.
	pub(crate) fn galois_generator_inverse(&self) -> u64 {
		// 5 has order n/2 in (Z/2nZ)*.
		pow_mod_u64(fhelix_ring::GALOIS_GEN, (self.n as u64 >> 1) - 1, self.two_n())
	}

	/// Galois element of the row swap.
	pub fn galois_element_row_swap(&self) -> u64 {
		self.two_n() - 1
	}
}

pub(crate) fn pow_mod_u64(base: u64, mut e: u64, m: u64) -> u64 {
	let mut acc = 1u64;
	let mut b = base % m;
	while e > 0 {
		if e & 1 == 1 {
			acc = (acc as u128 * b as u128 % m as u128) as u64;
		}
		b = (b as u128 * b as u128 % m as u128) as u64;
		e >>= 1;
	}
	acc
}

/// Builder for [`BfvParameters`].
#[derive(Debug, Clone, Default)]
pub struct BfvParametersBuilder {
	log_n: Option<usize>,
	plaintext_modulus: Option<u64>,
	moduli_sizes: Vec<usize>,
	extension_sizes: Vec<usize>,
	sigma: Option<f64>,
	policy: Option<ScaleRoundPolicy>,
}

impl BfvParametersBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the base-two logarithm of the ring degree.
	pub fn log_n(mut self, log_n: usize) -> Self {
		self.log_n = Some(log_n);
		self
	}

	/// Sets the plaintext modulus t.
	pub fn plaintext_modulus(mut self, t: u64) -> Self {
		self.plaintext_modulus = Some(t);
		self
	}

	/// Sets the bit sizes of the ciphertext moduli q_i.
	pub fn moduli_sizes(mut self, sizes: &[usize]) -> Self {
		self.moduli_sizes = sizes.to_vec();
		self
	}

	/// Sets the bit sizes of the key-switch extension moduli p_j.
	pub fn extension_sizes(mut self, sizes: &[usize]) -> Self {
		self.extension_sizes = sizes.to_vec();
		self
	}

	/// Sets the standard deviation of the error distribution.
	pub fn sigma(mut self, sigma: f64) -> Self {
		self.sigma = Some(sigma);
		self
	}

	/// Selects the scale-and-round policy for multiplications.
	pub fn scale_round_policy(mut self, policy: ScaleRoundPolicy) -> Self {
		self.policy = Some(policy);
		self
	}

	pub fn build(self) -> Result<Arc<BfvParameters>> {
		let log_n = self
			.log_n
			.ok_or_else(|| Error::InvalidParameters("log_n must be set".into()))?;
		if !(4..=16).contains(&log_n) {
			return Err(Error::InvalidParameters(format!(
				"log_n must be in 4..=16, got {log_n}"
			)));
		}
		let n = 1usize << log_n;

		let t = self
			.plaintext_modulus
			.ok_or_else(|| Error::InvalidParameters("plaintext_modulus must be set".into()))?;

		if self.moduli_sizes.is_empty() {
			return Err(Error::InvalidParameters("at least one ciphertext modulus is required".into()));
		}
		for s in self.moduli_sizes.iter().chain(&self.extension_sizes) {
			if !(10..=60).contains(s) {
				return Err(Error::InvalidParameters(format!(
					"moduli sizes must be in 10..=60 bits, got {s}"
				)));
			}
		}

		let sigma = self.sigma.unwrap_or(3.2);
		if sigma <= 0.0 {
			return Err(Error::InvalidParameters("sigma must be positive".into()));
		}

		let extension_sizes = if self.extension_sizes.is_empty() {
			vec![60]
		} else {
			self.extension_sizes
		};

		let mut taken: Vec<u64> = vec![];
		let moduli_q = generate_chain(&self.moduli_sizes, n, &mut taken)?;
		if moduli_q.iter().any(|&q| q <= t) {
			return Err(Error::InvalidParameters(
				"every ciphertext modulus must exceed the plaintext modulus".into(),
			));
		}
		let moduli_p = generate_chain(&extension_sizes, n, &mut taken)?;
		// The auxiliary basis must dominate Q so that the tensor product of
		// two centered ciphertexts is exact over Q * Q'.
		let moduli_qmul = generate_chain(&vec![60; moduli_q.len() + 1], n, &mut taken)?;

		let ring_q = Arc::new(Ring::new(n, &moduli_q)?);
		let ring_qmul = Arc::new(Ring::new(n, &moduli_qmul)?);
		let ring_p = Arc::new(Ring::new(n, &moduli_p)?);
		let mut qp = moduli_q.clone();
		qp.extend_from_slice(&moduli_p);
		let ring_qp = Arc::new(Ring::new(n, &qp)?);
		let ring_t = Ring::new(n, &[t]).ok().map(Arc::new);

		let p_big: BigUint = moduli_p.iter().product();
		let p_mod_q = ring_q
			.moduli()
			.iter()
			.map(|m| (&p_big % m.modulus()).to_u64().unwrap())
			.collect();

		let q_big = ring_q.modulus_big().clone();
		let q_mod_t = (&q_big % t).to_u64().unwrap();
		let delta_mod_q = ring_q
			.moduli()
			.iter()
			.map(|m| m.neg(m.inv(m.reduce(t))))
			.collect();

		debug!(
			n,
			t,
			moduli_q = moduli_q.len(),
			moduli_p = moduli_p.len(),
			"built BFV parameters"
		);

		Ok(Arc::new(BfvParameters {
			n,
			log_n,
			t,
			sigma,
			policy: self.policy.unwrap_or(ScaleRoundPolicy::DownThenMul),
			moduli_q,
			moduli_p,
			moduli_qmul,
			ring_q,
			ring_qmul,
			ring_p,
			ring_qp,
			ring_t,
			p_mod_q,
			delta_mod_q,
			q_mod_t,
		}))
	}
}

pub(crate) fn generate_chain(sizes: &[usize], n: usize, taken: &mut Vec<u64>) -> Result<Vec<u64>> {
	let mut chain = Vec::with_capacity(sizes.len());
	for &size in sizes {
		let p = generate_primes(size, n, 1, taken)?[0];
		taken.push(p);
		chain.push(p);
	}
	Ok(chain)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_validates() {
		assert!(BfvParametersBuilder::new().build().is_err());
		assert!(BfvParametersBuilder::new().log_n(2).plaintext_modulus(65537).build().is_err());
		assert!(BfvParametersBuilder::new()
			.log_n(5)
			.plaintext_modulus(65537)
			.moduli_sizes(&[8])
			.build()
			.is_err());
	}

	#[test]
	fn builds_distinct_chains() {
		let params = BfvParametersBuilder::new()
			.log_n(5)
			.plaintext_modulus(65537)
			.moduli_sizes(&[50, 50])
			.build()
			.unwrap();
		let mut all = params.moduli_q.clone();
		all.extend_from_slice(&params.moduli_p);
		all.extend_from_slice(&params.moduli_qmul);
		let count = all.len();
		all.sort_unstable();
		all.dedup();
		assert_eq!(all.len(), count);
		assert!(params.ring_t.is_some());
		assert_eq!(params.beta(), 2);
	}

	#[test]
	fn galois_elements() {
		let params = BfvParametersBuilder::new()
			.log_n(5)
			.plaintext_modulus(65537)
			.moduli_sizes(&[50])
			.build()
			.unwrap();
		assert_eq!(params.galois_element_for_column_rotation(1), 5);
		assert_eq!(params.galois_element_row_swap(), 63);
		let g = fhelix_ring::GALOIS_GEN;
		let inv = params.galois_generator_inverse();
		assert_eq!(g * inv % params.two_n(), 1);
	}
}
