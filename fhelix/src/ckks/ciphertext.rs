use std::sync::Arc;

use fhelix_ring::Poly;

use super::parameters::CkksParameters;

/// A CKKS ciphertext: polynomials over the chain prefix q_0..q_level, in
/// NTT form at rest, carrying the encoding scale of the packed values.
#[derive(Debug, Clone)]
pub struct Ciphertext {
	pub(crate) params: Arc<CkksParameters>,
	pub(crate) value: Vec<Poly>,
	pub(crate) scale: f64,
	pub(crate) level: usize,
}

impl Ciphertext {
	/// Allocates a zero ciphertext of the given degree at a level.
	pub fn new(params: &Arc<CkksParameters>, degree: usize, level: usize, scale: f64) -> Self {
		Ciphertext {
			params: params.clone(),
			value: (0..=degree)
				.map(|_| Poly::new(level + 1, params.n))
				.collect(),
			scale,
			level,
		}
	}

	pub fn degree(&self) -> usize {
		self.value.len() - 1
	}

	pub fn level(&self) -> usize {
		self.level
	}

	pub fn scale(&self) -> f64 {
		self.scale
	}

	/// Overrides the tracked scale without touching the payload.
	pub(crate) fn set_scale(&mut self, scale: f64) {
		self.scale = scale;
	}

	/// Drops CRT rows down to `level`; the message and scale are unchanged.
	pub fn drop_to_level(&mut self, level: usize) {
		assert!(level <= self.level);
		for p in self.value.iter_mut() {
			p.coeffs.truncate(level + 1);
		}
		self.level = level;
	}
}

/// A CKKS plaintext: one polynomial in NTT form at a level, with its scale.
#[derive(Debug, Clone)]
pub struct Plaintext {
	pub(crate) params: Arc<CkksParameters>,
	pub(crate) poly: Poly,
	pub(crate) scale: f64,
	pub(crate) level: usize,
}

impl Plaintext {
	pub fn level(&self) -> usize {
		self.level
	}

	pub fn scale(&self) -> f64 {
		self.scale
	}

	pub fn poly(&self) -> &Poly {
		&self.poly
	}
}
