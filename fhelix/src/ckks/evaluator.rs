use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use fhelix_ring::{BasisExtender, Decomposer, Poly, GALOIS_GEN};
use num_complex::Complex64;
use tracing::trace;

use crate::bfv::pow_mod_u64;
use crate::keys::{RelinearizationKey, RotationKeySet, SwitchingKey};
use crate::keyswitch::{key_switch_accumulate, KeySwitchPools};
use crate::{Error, Result};

use super::ciphertext::{Ciphertext, Plaintext};
use super::encoder::PtDiagMatrix;
use super::parameters::CkksParameters;

/// Relative tolerance when matching operand scales.
const SCALE_EPS: f64 = 1e-9;

/// The CKKS evaluator: approximate slot arithmetic with scale and level
/// tracking, rescaling, relinearization, rotations and plaintext-matrix
/// products.
///
/// Single-threaded; use [`Evaluator::shallow_copy`] for parallel work on
/// disjoint ciphertexts.
pub struct Evaluator {
	params: Arc<CkksParameters>,
	extender_p: BasisExtender,
	decomposer: Decomposer,
	ks_pools: KeySwitchPools,
	pool_q: [Poly; 2],
	/// NTT image of X^(n/2) in Montgomery form: the slot constant i.
	x_half: Poly,
	perm_indices: HashMap<u64, Vec<usize>>,
}

impl Evaluator {
	pub fn new(params: &Arc<CkksParameters>) -> Result<Self> {
		let ring_q = &params.ring_q;
		let mut x_half = ring_q.new_poly();
		for row in x_half.coeffs.iter_mut() {
			row[params.n / 2] = 1;
		}
		ring_q.ntt_inplace(&mut x_half);
		ring_q.mform_inplace_lvl(ring_q.max_level(), &mut x_half);

		Ok(Evaluator {
			extender_p: BasisExtender::new(ring_q, &params.ring_p),
			decomposer: Decomposer::new(ring_q, &params.ring_p),
			ks_pools: KeySwitchPools::new(&params.ring_qp),
			pool_q: [ring_q.new_poly(), ring_q.new_poly()],
			x_half,
			perm_indices: HashMap::new(),
			params: params.clone(),
		})
	}

	/// A copy with fresh pools sharing all immutable data.
	pub fn shallow_copy(&self) -> Self {
		Evaluator {
			extender_p: self.extender_p.clone(),
			decomposer: self.decomposer.clone(),
			ks_pools: KeySwitchPools::new(&self.params.ring_qp),
			pool_q: [self.params.ring_q.new_poly(), self.params.ring_q.new_poly()],
			x_half: self.x_half.clone(),
			perm_indices: self.perm_indices.clone(),
			params: self.params.clone(),
		}
	}

	pub fn params(&self) -> &Arc<CkksParameters> {
		&self.params
	}

	fn scales_match(a: f64, b: f64) -> bool {
		(a / b - 1.0).abs() < SCALE_EPS
	}

	/// Aligns a pair of operands on their common level and checks scales.
	fn check_pair(&self, a: &Ciphertext, b: &Ciphertext) -> Result<usize> {
		if !Self::scales_match(a.scale, b.scale) {
			return Err(Error::ScaleMismatch(a.scale, b.scale));
		}
		Ok(a.level.min(b.level))
	}

	pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let level = self.check_pair(a, b)?;
		let ring = &self.params.ring_q;
		let d = a.degree().max(b.degree());
		let mut out = Ciphertext::new(&self.params, d, level, a.scale);
		let min_d = a.degree().min(b.degree());
		for i in 0..=min_d {
			ring.add_lvl(level, &a.value[i], &b.value[i], &mut out.value[i]);
		}
		let longer = if a.degree() > b.degree() { &a.value } else { &b.value };
		for i in min_d + 1..=d {
			out.value[i].copy_from(&longer[i]);
		}
		Ok(out)
	}

	pub fn add_inplace(&self, ct: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
		let sum = self.add(ct, b)?;
		*ct = sum;
		Ok(())
	}

	pub fn sub(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let level = self.check_pair(a, b)?;
		let ring = &self.params.ring_q;
		let d = a.degree().max(b.degree());
		let mut out = Ciphertext::new(&self.params, d, level, a.scale);
		let min_d = a.degree().min(b.degree());
		for i in 0..=min_d {
			ring.sub_lvl(level, &a.value[i], &b.value[i], &mut out.value[i]);
		}
		for i in min_d + 1..=d {
			if b.degree() > a.degree() {
				ring.neg_lvl(level, &b.value[i], &mut out.value[i]);
			} else {
				out.value[i].copy_from(&a.value[i]);
			}
		}
		Ok(out)
	}

	/// Addition without the modular reduction; callers reduce later.
	pub fn add_no_mod(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let level = self.check_pair(a, b)?;
		let ring = &self.params.ring_q;
		let d = a.degree().max(b.degree());
		let mut out = Ciphertext::new(&self.params, d, level, a.scale);
		let min_d = a.degree().min(b.degree());
		for i in 0..=min_d {
			ring.add_no_mod_lvl(level, &a.value[i], &b.value[i], &mut out.value[i]);
		}
		let longer = if a.degree() > b.degree() { &a.value } else { &b.value };
		for i in min_d + 1..=d {
			out.value[i].copy_from(&longer[i]);
		}
		Ok(out)
	}

	/// Subtraction through a modulus lift instead of a reduction.
	pub fn sub_no_mod(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		let level = self.check_pair(a, b)?;
		let ring = &self.params.ring_q;
		let d = a.degree().max(b.degree());
		let mut out = Ciphertext::new(&self.params, d, level, a.scale);
		let min_d = a.degree().min(b.degree());
		for i in 0..=min_d {
			ring.sub_no_mod_lvl(level, &a.value[i], &b.value[i], &mut out.value[i]);
		}
		for i in min_d + 1..=d {
			if b.degree() > a.degree() {
				ring.neg_lvl(level, &b.value[i], &mut out.value[i]);
			} else {
				out.value[i].copy_from(&a.value[i]);
			}
		}
		Ok(out)
	}

	/// Reduces every coefficient modulo its prime.
	pub fn reduce(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, a.degree(), a.level, a.scale);
		for (i, p) in a.value.iter().enumerate() {
			ring.reduce_lvl(a.level, p, &mut out.value[i]);
		}
		Ok(out)
	}

	/// Multiplies by an integer scalar; the scale is unchanged.
	pub fn mul_scalar(&self, a: &Ciphertext, scalar: u64) -> Result<Ciphertext> {
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, a.degree(), a.level, a.scale);
		for (i, p) in a.value.iter().enumerate() {
			ring.mul_scalar_lvl(a.level, p, scalar, &mut out.value[i]);
		}
		Ok(out)
	}

	pub fn neg(&self, a: &Ciphertext) -> Result<Ciphertext> {
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, a.degree(), a.level, a.scale);
		for (i, p) in a.value.iter().enumerate() {
			ring.neg_lvl(a.level, p, &mut out.value[i]);
		}
		Ok(out)
	}

	pub fn add_plain(&self, ct: &Ciphertext, pt: &Plaintext) -> Result<Ciphertext> {
		if !Self::scales_match(ct.scale, pt.scale) {
			return Err(Error::ScaleMismatch(ct.scale, pt.scale));
		}
		let level = ct.level.min(pt.level);
		let mut out = ct.clone();
		out.drop_to_level(level);
		self.params.ring_q.add_assign_lvl(level, &pt.poly, &mut out.value[0]);
		Ok(out)
	}

	pub fn sub_plain(&self, ct: &Ciphertext, pt: &Plaintext) -> Result<Ciphertext> {
		if !Self::scales_match(ct.scale, pt.scale) {
			return Err(Error::ScaleMismatch(ct.scale, pt.scale));
		}
		let level = ct.level.min(pt.level);
		let mut out = ct.clone();
		out.drop_to_level(level);
		self.params.ring_q.sub_assign_lvl(level, &pt.poly, &mut out.value[0]);
		Ok(out)
	}

	/// Multiplies by a plaintext; the scales multiply.
	pub fn mul_plain(&mut self, ct: &Ciphertext, pt: &Plaintext) -> Result<Ciphertext> {
		let level = ct.level.min(pt.level);
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, ct.degree(), level, ct.scale * pt.scale);
		ring.mform_lvl(level, &pt.poly, &mut self.pool_q[0]);
		for (i, p) in ct.value.iter().enumerate() {
			ring.mul_coeffs_montgomery_lvl(level, &self.pool_q[0], p, &mut out.value[i]);
		}
		Ok(out)
	}

	/// Adds a complex constant, encoded at the ciphertext scale.
	pub fn add_const(&self, ct: &Ciphertext, c: Complex64) -> Result<Ciphertext> {
		let mut out = ct.clone();
		self.add_const_inplace(&mut out, c)?;
		Ok(out)
	}

	pub fn add_const_inplace(&self, ct: &mut Ciphertext, c: Complex64) -> Result<()> {
		let level = ct.level;
		let re = (c.re * ct.scale).round() as i128;
		let im = (c.im * ct.scale).round() as i128;
		let moduli = self.params.ring_q.moduli();
		for j in 0..=level {
			let m = &moduli[j];
			let re_j = reduce_signed(re, m.modulus());
			// A real constant is the all-re vector in the NTT domain; the
			// imaginary part rides on X^(n/2).
			if re_j != 0 {
				for v in ct.value[0].coeffs[j].iter_mut() {
					*v = m.add(*v, re_j);
				}
			}
			if im != 0 {
				let s = m.mform(reduce_signed(im, m.modulus()));
				for (v, x) in ct.value[0].coeffs[j].iter_mut().zip(&self.x_half.coeffs[j]) {
					*v = m.add(*v, m.mred(*x, s));
				}
			}
		}
		Ok(())
	}

	/// Multiplies by a complex constant encoded at the given scale; follow
	/// with a rescale when `const_scale` is a prime of the chain.
	pub fn mult_by_const_scaled(&self, ct: &Ciphertext, c: Complex64, const_scale: f64) -> Result<Ciphertext> {
		let level = ct.level;
		let re = (c.re * const_scale).round() as i128;
		let im = (c.im * const_scale).round() as i128;
		let moduli = self.params.ring_q.moduli();
		let mut out = Ciphertext::new(&self.params, ct.degree(), level, ct.scale * const_scale);

		for (i, p) in ct.value.iter().enumerate() {
			for j in 0..=level {
				let m = &moduli[j];
				let re_m = m.mform(reduce_signed(re, m.modulus()));
				let im_m = m.mform(reduce_signed(im, m.modulus()));
				let (src, dst) = (&p.coeffs[j], &mut out.value[i].coeffs[j]);
				let xh = &self.x_half.coeffs[j];
				for k in 0..src.len() {
					let mut acc = m.mred(src[k], re_m);
					if im != 0 {
						// src * X^(n/2) carries the imaginary part.
						let rot = m.mred(src[k], xh[k]);
						acc = m.add(acc, m.mred(rot, im_m));
					}
					dst[k] = acc;
				}
			}
		}
		Ok(out)
	}

	/// Multiplies by a constant at the scale of the current top prime, so
	/// one rescale restores the ciphertext scale.
	pub fn mult_by_const(&self, ct: &Ciphertext, c: Complex64) -> Result<Ciphertext> {
		let const_scale = self.params.qi_f64(ct.level);
		self.mult_by_const_scaled(ct, c, const_scale)
	}

	/// Multiplies the slots by i, a scale-free monomial product.
	pub fn mult_by_i(&self, ct: &Ciphertext) -> Result<Ciphertext> {
		let level = ct.level;
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, ct.degree(), level, ct.scale);
		for (i, p) in ct.value.iter().enumerate() {
			ring.mul_coeffs_montgomery_lvl(level, &self.x_half, p, &mut out.value[i]);
		}
		Ok(out)
	}

	/// Divides the slots by i (multiplies by -X^(n/2)).
	pub fn div_by_i(&self, ct: &Ciphertext) -> Result<Ciphertext> {
		let mut out = self.mult_by_i(ct)?;
		let ring = &self.params.ring_q;
		for p in out.value.iter_mut() {
			ring.neg_inplace_lvl(out.level, p);
		}
		Ok(out)
	}

	/// Tensor product of two degree-1 ciphertexts; the output has degree 2
	/// and the scales multiply.
	pub fn mul(&mut self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		if a.degree() != 1 || b.degree() != 1 {
			return Err(Error::NotCanonicalDegree(a.degree().max(b.degree())));
		}
		let level = a.level.min(b.level);
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, 2, level, a.scale * b.scale);

		let [m0, m1] = &mut self.pool_q;
		ring.mform_lvl(level, &a.value[0], m0);
		ring.mform_lvl(level, &a.value[1], m1);

		ring.mul_coeffs_montgomery_lvl(level, m0, &b.value[0], &mut out.value[0]);
		ring.mul_coeffs_montgomery_lvl(level, m0, &b.value[1], &mut out.value[1]);
		ring.mul_coeffs_montgomery_and_add_lvl(level, m1, &b.value[0], &mut out.value[1]);
		ring.mul_coeffs_montgomery_lvl(level, m1, &b.value[1], &mut out.value[2]);
		Ok(out)
	}

	/// Squares a degree-1 ciphertext, doubling the cross term.
	pub fn square(&mut self, a: &Ciphertext) -> Result<Ciphertext> {
		if a.degree() != 1 {
			return Err(Error::NotCanonicalDegree(a.degree()));
		}
		let level = a.level;
		let ring = &self.params.ring_q;
		let mut out = Ciphertext::new(&self.params, 2, level, a.scale * a.scale);

		let [m0, m1] = &mut self.pool_q;
		ring.mform_lvl(level, &a.value[0], m0);
		ring.mform_lvl(level, &a.value[1], m1);

		ring.mul_coeffs_montgomery_lvl(level, m0, &a.value[0], &mut out.value[0]);
		ring.mul_coeffs_montgomery_lvl(level, m0, &a.value[1], &mut out.value[1]);
		ring.mul_scalar_assign_lvl(level, 2, &mut out.value[1]);
		ring.mul_coeffs_montgomery_lvl(level, m1, &a.value[1], &mut out.value[2]);
		Ok(out)
	}

	/// Multiplies and immediately relinearizes back to degree 1.
	pub fn mul_relin(&mut self, a: &Ciphertext, b: &Ciphertext, rlk: &RelinearizationKey) -> Result<Ciphertext> {
		let mut out = self.mul(a, b)?;
		self.relinearize_inplace(&mut out, rlk)?;
		Ok(out)
	}

	pub fn square_relin(&mut self, a: &Ciphertext, rlk: &RelinearizationKey) -> Result<Ciphertext> {
		let mut out = self.square(a)?;
		self.relinearize_inplace(&mut out, rlk)?;
		Ok(out)
	}

	pub fn relinearize(&mut self, ct: &Ciphertext, rlk: &RelinearizationKey) -> Result<Ciphertext> {
		let mut out = ct.clone();
		self.relinearize_inplace(&mut out, rlk)?;
		Ok(out)
	}

	pub fn relinearize_inplace(&mut self, ct: &mut Ciphertext, rlk: &RelinearizationKey) -> Result<()> {
		let d = ct.degree();
		if d < 2 {
			return Ok(());
		}
		if rlk.max_degree() < d {
			return Err(Error::MissingRelinearizationKey {
				supported: rlk.max_degree(),
				got: d,
			});
		}
		let level = ct.level;
		let (head, tail) = ct.value.split_at_mut(2);
		let (c0, c1) = head.split_at_mut(1);
		for deg in (2..=d).rev() {
			self.switch_key_ntt(&tail[deg - 2], level, &rlk.keys[deg - 2], &mut c0[0], &mut c1[0])?;
		}
		ct.value.truncate(2);
		Ok(())
	}

	/// Key-switch kernel entry for NTT-resident inputs: accumulates the
	/// switched image of `cx_ntt` onto c0 and c1.
	fn switch_key_ntt(
		&mut self, cx_ntt: &Poly, level: usize, key: &SwitchingKey, c0: &mut Poly, c1: &mut Poly,
	) -> Result<()> {
		let Evaluator {
			params,
			extender_p,
			decomposer,
			ks_pools,
			pool_q,
			..
		} = self;
		let ring_q = &params.ring_q;
		let ring_qp = &params.ring_qp;
		let q_limbs = params.moduli_q.len();

		for j in 0..=level {
			pool_q[0].coeffs[j].copy_from_slice(&cx_ntt.coeffs[j]);
			ring_q.inv_ntt_row(j, &mut pool_q[0].coeffs[j]);
		}

		key_switch_accumulate(ring_qp, decomposer, q_limbs, level, &pool_q[0], key, ks_pools)?;

		let [_, _, acc0, acc1, _] = &mut ks_pools.polys;
		extender_p.mod_down_ntt_pq(level, acc0);
		extender_p.mod_down_ntt_pq(level, acc1);
		ring_q.add_assign_lvl(level, acc0, c0);
		ring_q.add_assign_lvl(level, acc1, c1);
		Ok(())
	}

	/// Re-encrypts a degree-1 ciphertext under the key the switching key
	/// points at.
	pub fn switch_keys(&mut self, ct: &Ciphertext, key: &SwitchingKey) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let mut out = Ciphertext::new(&self.params, 1, ct.level, ct.scale);
		out.value[0].copy_from(&ct.value[0]);
		let cx = ct.value[1].clone();
		let (c0, c1) = out.value.split_at_mut(1);
		self.switch_key_ntt(&cx, ct.level, key, &mut c0[0], &mut c1[0])?;
		Ok(out)
	}

	/// Divides by the top prime with centered rounding, dropping one level.
	pub fn rescale(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
		let mut out = ct.clone();
		self.rescale_inplace(&mut out)?;
		Ok(out)
	}

	pub fn rescale_inplace(&mut self, ct: &mut Ciphertext) -> Result<()> {
		let level = ct.level;
		if level == 0 {
			return Err(Error::LevelExhausted(0));
		}
		let ring = &self.params.ring_q;
		let moduli = ring.moduli();
		let m_top = &moduli[level];
		let q_l = m_top.modulus();
		let half = q_l >> 1;

		for p in ct.value.iter_mut() {
			let mut top = p.coeffs.pop().expect("level row present");
			ring.inv_ntt_row(level, &mut top);
			// u = x_top + q_l/2, for the centered quotient.
			for v in top.iter_mut() {
				*v = m_top.add(*v, half);
			}
			for j in 0..level {
				let m = &moduli[j];
				let inv = m.mform(m.inv(m.reduce(q_l)));
				let h = m.reduce(half);
				let row = &mut self.pool_q[0].coeffs[j];
				for (r, t) in row.iter_mut().zip(&top) {
					*r = m.reduce(*t);
				}
				ring.ntt_row(j, row);
				for (v, u) in p.coeffs[j].iter_mut().zip(row.iter()) {
					*v = m.mred(m.sub(m.add(*v, h), *u), inv);
				}
			}
		}
		ct.level -= 1;
		ct.scale /= q_l as f64;
		Ok(())
	}

	fn perm_table(&mut self, gal: u64) -> &Vec<usize> {
		let params = &self.params;
		self.perm_indices
			.entry(gal)
			.or_insert_with(|| params.ring_q.permute_ntt_index(gal))
	}

	fn permute_ntt(&mut self, ct: &Ciphertext, gal: u64, key: &SwitchingKey) -> Result<Ciphertext> {
		let level = ct.level;
		let mut out = Ciphertext::new(&self.params, 1, level, ct.scale);
		{
			let table = self.perm_table(gal).clone();
			let ring = &self.params.ring_q;
			ring.permute_ntt_lvl(level, &ct.value[0], &table, &mut out.value[0]);
			ring.permute_ntt_lvl(level, &ct.value[1], &table, &mut self.pool_q[1]);
		}
		let cx = std::mem::replace(&mut self.pool_q[1], self.params.ring_q.new_poly());
		let (c0, c1) = out.value.split_at_mut(1);
		let res = self.switch_key_ntt(&cx, level, key, &mut c0[0], &mut c1[0]);
		self.pool_q[1] = cx;
		res?;
		Ok(out)
	}

	/// Rotates the packed slots `k` positions to the left, resolving the
	/// shift through the available keys.
	pub fn rotate(&mut self, ct: &Ciphertext, k: usize, keys: &RotationKeySet) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let slots = self.params.slots();
		let k = k % slots;
		if k == 0 {
			return Ok(ct.clone());
		}

		if let Some(key) = keys.left.get(&k) {
			let gal = self.params.galois_element_for_column_rotation(k);
			return self.permute_ntt(ct, gal, key);
		}

		if !keys.has_all_pow2(slots) {
			return Err(Error::MissingRotationKey(k));
		}

		let k_right = slots - k;
		let mut cur = ct.clone();
		if k.count_ones() <= k_right.count_ones() {
			trace!(k, "rotating left over pow2 keys");
			let mut generator = GALOIS_GEN;
			let mut remaining = k;
			let mut index = 1usize;
			while remaining > 0 {
				if remaining & 1 == 1 {
					cur = self.permute_ntt(&cur, generator, &keys.left[&index])?;
				}
				generator = pow_mod_u64(generator, 2, self.params.two_n());
				index <<= 1;
				remaining >>= 1;
			}
		} else {
			trace!(k = k_right, "rotating right over pow2 keys");
			let mut generator = self.params.galois_generator_inverse();
			let mut remaining = k_right;
			let mut index = 1usize;
			while remaining > 0 {
				if remaining & 1 == 1 {
					cur = self.permute_ntt(&cur, generator, &keys.right[&index])?;
				}
				generator = pow_mod_u64(generator, 2, self.params.two_n());
				index <<= 1;
				remaining >>= 1;
			}
		}
		Ok(cur)
	}

	/// Rotation by a raw Galois shift, without reduction modulo the packed
	/// slot count; the SubSum folding rotates past it.
	pub(crate) fn rotate_raw(&mut self, ct: &Ciphertext, k: usize, keys: &RotationKeySet) -> Result<Ciphertext> {
		let key = keys.left.get(&k).ok_or(Error::MissingRotationKey(k))?;
		let gal = self.params.galois_element_for_column_rotation(k);
		self.permute_ntt(ct, gal, key)
	}

	/// Conjugates every slot.
	pub fn conjugate(&mut self, ct: &Ciphertext, keys: &RotationKeySet) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let key = keys.row.as_ref().ok_or(Error::MissingConjugationKey)?;
		let gal = self.params.galois_element_conjugate();
		self.permute_ntt(ct, gal, key)
	}

	/// Sums every slot into every slot by doubling rotations.
	pub fn inner_sum(&mut self, ct: &Ciphertext, keys: &RotationKeySet) -> Result<Ciphertext> {
		let mut acc = ct.clone();
		let mut i = 1;
		while i < self.params.slots() {
			let rotated = self.rotate(&acc, i, keys)?;
			acc = self.add(&acc, &rotated)?;
			i <<= 1;
		}
		Ok(acc)
	}

	/// Homomorphic product with an encoded diagonal matrix via baby-step /
	/// giant-step rotations. The output scale is the product of the input
	/// and matrix scales; the caller rescales.
	pub fn multiply_by_diag_matrix(
		&mut self, ct: &Ciphertext, mat: &PtDiagMatrix, keys: &RotationKeySet,
	) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let level = ct.level.min(mat.level);
		let mut aligned = ct.clone();
		aligned.drop_to_level(level);

		// Baby rotations, computed once per distinct baby step. Shifts live
		// in the matrix dimension, which may exceed the packed slot count,
		// so they resolve against exact keys.
		let mut babies: BTreeMap<usize, Ciphertext> = BTreeMap::new();
		babies.insert(0, aligned.clone());
		for &i in mat.vec.keys() {
			let b = i % mat.n1;
			if !babies.contains_key(&b) {
				let rotated = self.rotate_raw(&aligned, b, keys)?;
				babies.insert(b, rotated);
			}
		}

		// Group diagonals by giant step.
		let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
		for &i in mat.vec.keys() {
			groups.entry(i - i % mat.n1).or_default().push(i);
		}

		let mut out = Ciphertext::new(&self.params, 1, level, ct.scale * mat.scale);
		for (&giant, indices) in &groups {
			let mut acc = Ciphertext::new(&self.params, 1, level, out.scale);
			{
				let ring = &self.params.ring_q;
				for &i in indices {
					let baby = &babies[&(i % mat.n1)];
					let pt = &mat.vec[&i];
					ring.mul_coeffs_montgomery_and_add_lvl(level, pt, &baby.value[0], &mut acc.value[0]);
					ring.mul_coeffs_montgomery_and_add_lvl(level, pt, &baby.value[1], &mut acc.value[1]);
				}
			}
			if giant == 0 {
				out = self.add(&out, &acc)?;
			} else {
				let rotated = self.rotate_raw(&acc, giant, keys)?;
				out = self.add(&out, &rotated)?;
			}
		}
		Ok(out)
	}
}

pub(crate) fn reduce_signed(x: i128, q: u64) -> u64 {
	let q = q as i128;
	let r = x % q;
	if r < 0 {
		(r + q) as u64
	} else {
		r as u64
	}
}
