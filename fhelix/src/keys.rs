//! Key material shared by the BFV and CKKS evaluators.
//!
//! Switching keys encrypt a source secret under the working secret, one pair
//! per gadget block, in the extended basis Q*P. They are immutable once
//! generated and may be shared freely across evaluators.

use std::collections::HashMap;

use fhelix_ring::{Poly, Ring};
use itertools::izip;
use rand::Rng;

/// A key-switching key: for each gadget block i, a pair (b_i, a_i) over
/// Q*P with b_i = -a_i * s + e_i + g_i * s_src, where g_i is the block
/// gadget factor P * (Q/D_i) * ((Q/D_i)^-1 mod D_i). Both polynomials are
/// kept in NTT and Montgomery form, ready for the key-switch inner product.
#[derive(Debug, Clone)]
pub struct SwitchingKey {
	pub(crate) pairs: Vec<[Poly; 2]>,
}

impl SwitchingKey {
	/// Number of gadget blocks the key covers.
	pub fn beta(&self) -> usize {
		self.pairs.len()
	}
}

/// An ordered list of switching keys; index k reduces degree k+2 to k+1.
#[derive(Debug, Clone)]
pub struct RelinearizationKey {
	pub(crate) keys: Vec<SwitchingKey>,
}

impl RelinearizationKey {
	/// The largest ciphertext degree this key can relinearize.
	pub fn max_degree(&self) -> usize {
		self.keys.len() + 1
	}
}

/// A sparse collection of rotation keys: column rotations in both
/// directions, plus the row-swap key (the conjugation key for CKKS).
#[derive(Debug, Clone, Default)]
pub struct RotationKeySet {
	pub(crate) left: HashMap<usize, SwitchingKey>,
	pub(crate) right: HashMap<usize, SwitchingKey>,
	pub(crate) row: Option<SwitchingKey>,
}

impl RotationKeySet {
	pub fn new() -> Self {
		Self::default()
	}

	/// True when every power-of-two column rotation, in both directions,
	/// is present for a slot count of `slots`.
	pub fn has_all_pow2(&self, slots: usize) -> bool {
		let mut i = 1;
		while i < slots {
			if !self.left.contains_key(&i) || !self.right.contains_key(&i) {
				return false;
			}
			i <<= 1;
		}
		true
	}

	/// Shifts of the column rotation keys present, for diagnostics.
	pub fn left_shifts(&self) -> Vec<usize> {
		let mut s: Vec<usize> = self.left.keys().copied().collect();
		s.sort_unstable();
		s
	}
}

/// Generates a switching key from `s_src` to `s_dst` over the Q*P chain.
///
/// `s_src` is in NTT form, `s_dst_mform` in NTT and Montgomery form;
/// `p_mod_q[j]` holds P mod q_j, the in-block gadget residue.
pub(crate) fn gen_switching_key<R: Rng>(
	ring_qp: &Ring, q_limbs: usize, alpha: usize, sigma: f64, s_src: &Poly, s_dst_mform: &Poly,
	p_mod_q: &[u64], rng: &mut R,
) -> SwitchingKey {
	let beta = q_limbs.div_ceil(alpha);
	let mut pairs = Vec::with_capacity(beta);

	for block in 0..beta {
		let start = block * alpha;
		let end = (start + alpha).min(q_limbs);

		let mut a = ring_qp.new_poly();
		ring_qp.sample_uniform(rng, &mut a);

		let mut b = ring_qp.new_poly();
		ring_qp.sample_gaussian(sigma, rng, &mut b);
		ring_qp.ntt_inplace(&mut b);

		for (j, m) in ring_qp.moduli().iter().enumerate() {
			let g = if j >= start && j < end {
				m.mform(p_mod_q[j])
			} else {
				0
			};
			for (bk, ak, sk, dk) in izip!(
				b.coeffs[j].iter_mut(),
				&a.coeffs[j],
				&s_src.coeffs[j],
				&s_dst_mform.coeffs[j]
			) {
				if g != 0 {
					*bk = m.add(*bk, m.mred(*sk, g));
				}
				*bk = m.sub(*bk, m.mred(*dk, *ak));
			}
		}

		ring_qp.mform_inplace_lvl(ring_qp.max_level(), &mut a);
		ring_qp.mform_inplace_lvl(ring_qp.max_level(), &mut b);
		pairs.push([b, a]);
	}

	SwitchingKey { pairs }
}
