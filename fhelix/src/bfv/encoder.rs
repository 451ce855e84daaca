use std::sync::Arc;

use fhelix_ring::{Poly, Ring, GALOIS_GEN};
use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::{Error, Result};

use super::element::Plaintext;
use super::parameters::BfvParameters;

/// Packs vectors of integers mod t into the SIMD slots of a BFV plaintext.
///
/// Batching requires t to be an NTT-friendly prime (t = 1 mod 2n). Slots
/// follow the Galois-generator order, so the evaluator's column rotations
/// shift the two rows cyclically and the row swap exchanges them.
pub struct BatchEncoder {
	params: Arc<BfvParameters>,
	ring_t: Arc<Ring>,
	/// Slot index -> coefficient index of the plaintext NTT.
	index_map: Vec<usize>,
}

impl BatchEncoder {
	pub fn new(params: &Arc<BfvParameters>) -> Result<Self> {
		let ring_t = params
			.ring_t
			.clone()
			.ok_or_else(|| Error::InvalidParameters(format!(
				"plaintext modulus {} does not support batching",
				params.t
			)))?;

		let n = params.n;
		let log_n = params.log_n as u32;
		let two_n = params.two_n();
		let row = n >> 1;
		let mut index_map = vec![0usize; n];
		let mut pos = 1u64;
		for i in 0..row {
			let index1 = ((pos - 1) >> 1) as usize;
			let index2 = ((two_n - pos - 1) >> 1) as usize;
			index_map[i] = (index1.reverse_bits()) >> (usize::BITS - log_n);
			index_map[i | row] = (index2.reverse_bits()) >> (usize::BITS - log_n);
			pos = pos * GALOIS_GEN % two_n;
		}

		Ok(BatchEncoder {
			params: params.clone(),
			ring_t,
			index_map,
		})
	}

	/// Number of slots: the full ring degree, as two rows of n/2.
	pub fn slots(&self) -> usize {
		self.params.n
	}

	/// Encodes up to n values mod t, padding with zeros, and scales the
	/// message up into R_Q.
	pub fn encode(&self, values: &[u64]) -> Result<Plaintext> {
		if values.len() > self.params.n {
			return Err(Error::InvalidParameters(format!(
				"cannot encode {} values into {} slots",
				values.len(),
				self.params.n
			)));
		}

		let t_mod = &self.ring_t.moduli()[0];
		let mut m = Poly::new(1, self.params.n);
		for (i, v) in values.iter().enumerate() {
			m.coeffs[0][self.index_map[i]] = t_mod.reduce(*v);
		}
		self.ring_t.inv_ntt_inplace(&mut m);

		// floor(Q * m / t) mod q_j = (-t^-1 mod q_j) * ((Q mod t) * m mod t).
		let ring_q = &self.params.ring_q;
		let mut poly = ring_q.new_poly();
		for k in 0..self.params.n {
			let r = t_mod.mul(m.coeffs[0][k], self.params.q_mod_t);
			for (j, qm) in ring_q.moduli().iter().enumerate() {
				poly.coeffs[j][k] = qm.mul(self.params.delta_mod_q[j], r);
			}
		}

		Ok(Plaintext::from_poly(&self.params, poly))
	}

	/// Decodes a plaintext back to its slot values: rounds t/Q times the
	/// coefficients, then evaluates the plaintext NTT.
	pub fn decode(&self, pt: &Plaintext) -> Result<Vec<u64>> {
		let ring_q = &self.params.ring_q;
		let q = ring_q.modulus_big();
		let q_half = q >> 1u32;
		let t = self.params.t;

		let lifted = ring_q.reconstruct(ring_q.max_level(), pt.poly());
		let mut m = Poly::new(1, self.params.n);
		for (k, v) in lifted.iter().enumerate() {
			// Round(t * v / Q) mod t; the final reduction absorbs the wrap
			// of noisy encodings of zero.
			let scaled: BigUint = (v * t + &q_half) / q;
			m.coeffs[0][k] = (&scaled % t).to_u64().unwrap();
		}
		self.ring_t.ntt_inplace(&mut m);

		Ok((0..self.params.n).map(|i| m.coeffs[0][self.index_map[i]]).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bfv::parameters::BfvParametersBuilder;

	#[test]
	fn encode_decode_round_trip() {
		let params = BfvParametersBuilder::new()
			.log_n(5)
			.plaintext_modulus(65537)
			.moduli_sizes(&[50, 50])
			.build()
			.unwrap();
		let encoder = BatchEncoder::new(&params).unwrap();

		let values: Vec<u64> = (0..32u64).map(|i| i * i % 65537).collect();
		let pt = encoder.encode(&values).unwrap();
		assert_eq!(encoder.decode(&pt).unwrap(), values);
	}

	#[test]
	fn short_vectors_are_padded() {
		let params = BfvParametersBuilder::new()
			.log_n(5)
			.plaintext_modulus(65537)
			.moduli_sizes(&[50])
			.build()
			.unwrap();
		let encoder = BatchEncoder::new(&params).unwrap();
		let pt = encoder.encode(&[7, 11]).unwrap();
		let decoded = encoder.decode(&pt).unwrap();
		assert_eq!(decoded[0], 7);
		assert_eq!(decoded[1], 11);
		assert!(decoded[2..].iter().all(|&v| v == 0));
	}
}
