use std::sync::Arc;

use fhelix_ring::Ring;
use num_traits::ToPrimitive;
use tracing::debug;

use crate::bfv::{generate_chain, pow_mod_u64};
use crate::{Error, Result};

/// Parameters of the CKKS scheme: ring degree, packed slot count, the
/// ciphertext chain Q, the key-switch extension P, and the default scale.
#[derive(Debug, Clone)]
pub struct CkksParameters {
	pub(crate) n: usize,
	pub(crate) log_n: usize,
	pub(crate) log_slots: usize,
	pub(crate) default_scale: f64,
	pub(crate) sigma: f64,

	pub(crate) moduli_q: Vec<u64>,
	pub(crate) moduli_p: Vec<u64>,

	pub(crate) ring_q: Arc<Ring>,
	pub(crate) ring_p: Arc<Ring>,
	pub(crate) ring_qp: Arc<Ring>,

	/// P mod q_j, the in-block gadget residue for key generation.
	pub(crate) p_mod_q: Vec<u64>,
}

impl CkksParameters {
	pub fn degree(&self) -> usize {
		self.n
	}

	pub fn log_n(&self) -> usize {
		self.log_n
	}

	/// Number of packed plaintext slots.
	pub fn slots(&self) -> usize {
		1 << self.log_slots
	}

	pub fn log_slots(&self) -> usize {
		self.log_slots
	}

	/// The largest number of packed slots the ring supports.
	pub fn max_log_slots(&self) -> usize {
		self.log_n - 1
	}

	pub fn default_scale(&self) -> f64 {
		self.default_scale
	}

	pub fn moduli(&self) -> &[u64] {
		&self.moduli_q
	}

	pub fn max_level(&self) -> usize {
		self.moduli_q.len() - 1
	}

	/// q_l as a float, for scale arithmetic.
	pub fn qi_f64(&self, level: usize) -> f64 {
		self.moduli_q[level] as f64
	}

	pub fn alpha(&self) -> usize {
		self.moduli_p.len()
	}

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

	pub(crate) fn galois_generator_inverse(&self) -> u64 {
		pow_mod_u64(fhelix_ring::GALOIS_GEN, (self.n as u64 >> 1) - 1, self.two_n())
	}

	/// Galois element of the slot conjugation.
	pub fn galois_element_conjugate(&self) -> u64 {
		self.two_n() - 1
	}
}

/// Builder for [`CkksParameters`].
#[derive(Debug, Clone, Default)]
pub struct CkksParametersBuilder {
	log_n: Option<usize>,
	log_slots: Option<usize>,
	moduli_sizes: Vec<usize>,
	extension_sizes: Vec<usize>,
	default_scale: Option<f64>,
	sigma: Option<f64>,
}

impl CkksParametersBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn log_n(mut self, log_n: usize) -> Self {
		self.log_n = Some(log_n);
		self
	}

	/// Sets the packed slot count; defaults to the maximum, n/2.
	pub fn log_slots(mut self, log_slots: usize) -> Self {
		self.log_slots = Some(log_slots);
		self
	}

	/// Sets the bit sizes of the ciphertext moduli q_i; the first entry is
	/// the base prime q_0.
	pub fn moduli_sizes(mut self, sizes: &[usize]) -> Self {
		self.moduli_sizes = sizes.to_vec();
		self
	}

	pub fn extension_sizes(mut self, sizes: &[usize]) -> Self {
		self.extension_sizes = sizes.to_vec();
		self
	}

	/// Sets the default encoding scale.
	pub fn default_scale(mut self, scale: f64) -> Self {
		self.default_scale = Some(scale);
		self
	}

	pub fn sigma(mut self, sigma: f64) -> Self {
		self.sigma = Some(sigma);
		self
	}

	pub fn build(self) -> Result<Arc<CkksParameters>> {
		let log_n = self
			.log_n
			.ok_or_else(|| Error::InvalidParameters("log_n must be set".into()))?;
		if !(4..=16).contains(&log_n) {
			return Err(Error::InvalidParameters(format!(
				"log_n must be in 4..=16, got {log_n}"
			)));
		}
		let n = 1usize << log_n;
		let log_slots = self.log_slots.unwrap_or(log_n - 1);
		if log_slots >= log_n {
			return Err(Error::InvalidParameters(format!(
				"log_slots {log_slots} must be below log_n {log_n}"
			)));
		}

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
		let moduli_p = generate_chain(&extension_sizes, n, &mut taken)?;

		let ring_q = Arc::new(Ring::new(n, &moduli_q)?);
		let ring_p = Arc::new(Ring::new(n, &moduli_p)?);
		let mut qp = moduli_q.clone();
		qp.extend_from_slice(&moduli_p);
		let ring_qp = Arc::new(Ring::new(n, &qp)?);

		let p_big = ring_p.modulus_big().clone();
		let p_mod_q = ring_q
			.moduli()
			.iter()
			.map(|m| (&p_big % m.modulus()).to_u64().unwrap())
			.collect();

		let default_scale = self
			.default_scale
			.unwrap_or_else(|| (moduli_q.get(1).copied().unwrap_or(moduli_q[0])) as f64);

		debug!(
			n,
			log_slots,
			levels = moduli_q.len(),
			scale = default_scale.log2(),
			"built CKKS parameters"
		);

		Ok(Arc::new(CkksParameters {
			n,
			log_n,
			log_slots,
			default_scale,
			sigma,
			moduli_q,
			moduli_p,
			ring_q,
			ring_p,
			ring_qp,
			p_mod_q,
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builder_defaults() {
		let params = CkksParametersBuilder::new()
			.log_n(6)
			.moduli_sizes(&[45, 40, 40])
			.build()
			.unwrap();
		assert_eq!(params.slots(), 32);
		assert_eq!(params.max_level(), 2);
		assert_eq!(params.alpha(), 1);
	}

	#[test]
	fn rejects_oversized_slots() {
		assert!(CkksParametersBuilder::new()
			.log_n(6)
			.log_slots(6)
			.moduli_sizes(&[45])
			.build()
			.is_err());
	}
}
