use std::sync::Arc;

use fhelix_ring::{BasisExtender, Decomposer, Poly, Ring, GALOIS_GEN};
use num_bigint::BigUint;
use tracing::trace;

use crate::keys::{RelinearizationKey, RotationKeySet, SwitchingKey};
use crate::keyswitch::{key_switch_accumulate, KeySwitchPools};
use crate::{Error, Result};

use super::element::{Ciphertext, Operand};
use super::parameters::{BfvParameters, ScaleRoundPolicy};

/// Tensor pools hold one slot per output polynomial, bounding the degree
/// sum a multiplication can produce.
const TENSOR_SLOTS: usize = 6;

/// The BFV evaluator: element-wise ciphertext algebra, the tensor-and-round
/// multiplication engine, key switching, relinearization, and slot
/// rotations.
///
/// An evaluator owns its scratch polynomials and must not be shared between
/// threads; [`Evaluator::shallow_copy`] yields an instance with fresh pools
/// that shares all parameters, tables and keys.
pub struct Evaluator {
	params: Arc<BfvParameters>,
	extender_qmul: BasisExtender,
	extender_p: BasisExtender,
	decomposer: Decomposer,
	/// floor(Q'/2), the centering offset of the scale-and-round.
	qmul_half: BigUint,

	pool_q: [Poly; 2],
	ks_pools: KeySwitchPools,
	// Tensor scratch: operand images, Montgomery copies and accumulators,
	// each in basis Q and in the auxiliary basis Q'.
	pool_a_q: Vec<Poly>,
	pool_a_qm: Vec<Poly>,
	pool_b_q: Vec<Poly>,
	pool_b_qm: Vec<Poly>,
	pool_c_q: Vec<Poly>,
	pool_c_qm: Vec<Poly>,
	pool_m_q: Vec<Poly>,
	pool_m_qm: Vec<Poly>,
}

impl Evaluator {
	pub fn new(params: &Arc<BfvParameters>) -> Result<Self> {
		let ring_q = &params.ring_q;
		let ring_qmul = &params.ring_qmul;
		let alloc_q = || (0..TENSOR_SLOTS).map(|_| ring_q.new_poly()).collect::<Vec<_>>();
		let alloc_qm = || (0..TENSOR_SLOTS).map(|_| ring_qmul.new_poly()).collect::<Vec<_>>();

		Ok(Evaluator {
			extender_qmul: BasisExtender::new(ring_q, ring_qmul),
			extender_p: BasisExtender::new(ring_q, &params.ring_p),
			decomposer: Decomposer::new(ring_q, &params.ring_p),
			qmul_half: ring_qmul.modulus_big() >> 1u32,
			pool_q: [ring_q.new_poly(), ring_q.new_poly()],
			ks_pools: KeySwitchPools::new(&params.ring_qp),
			pool_a_q: alloc_q(),
			pool_a_qm: alloc_qm(),
			pool_b_q: alloc_q(),
			pool_b_qm: alloc_qm(),
			pool_c_q: alloc_q(),
			pool_c_qm: alloc_qm(),
			pool_m_q: alloc_q(),
			pool_m_qm: alloc_qm(),
			params: params.clone(),
		})
	}

	/// A copy sharing all immutable data (parameters, conversion tables)
	/// but owning fresh pools; safe to drive from another thread on
	/// disjoint ciphertexts.
	pub fn shallow_copy(&self) -> Self {
		let params = &self.params;
		let ring_q = &params.ring_q;
		let ring_qmul = &params.ring_qmul;
		let alloc_q = || (0..TENSOR_SLOTS).map(|_| ring_q.new_poly()).collect::<Vec<_>>();
		let alloc_qm = || (0..TENSOR_SLOTS).map(|_| ring_qmul.new_poly()).collect::<Vec<_>>();
		Evaluator {
			extender_qmul: self.extender_qmul.clone(),
			extender_p: self.extender_p.clone(),
			decomposer: self.decomposer.clone(),
			qmul_half: self.qmul_half.clone(),
			pool_q: [ring_q.new_poly(), ring_q.new_poly()],
			ks_pools: KeySwitchPools::new(&params.ring_qp),
			pool_a_q: alloc_q(),
			pool_a_qm: alloc_qm(),
			pool_b_q: alloc_q(),
			pool_b_qm: alloc_qm(),
			pool_c_q: alloc_q(),
			pool_c_qm: alloc_qm(),
			pool_m_q: alloc_q(),
			pool_m_qm: alloc_qm(),
			params: params.clone(),
		}
	}

	pub fn params(&self) -> &Arc<BfvParameters> {
		&self.params
	}

	fn check_binary(op0: &impl Operand, op1: &impl Operand) -> Result<usize> {
		if op0.degree() + op1.degree() == 0 {
			return Err(Error::PlaintextOnlyOperands);
		}
		Ok(op0.degree().max(op1.degree()))
	}

	fn binary_op<F>(&self, op0: &impl Operand, op1: &impl Operand, f: F) -> Result<Ciphertext>
	where
		F: Fn(&Ring, &Poly, &Poly, &mut Poly),
	{
		let out_degree = Self::check_binary(op0, op1)?;
		let mut out = Ciphertext::new(&self.params, out_degree);
		let ring = &self.params.ring_q;

		let min_degree = op0.degree().min(op1.degree());
		for i in 0..=min_degree {
			f(ring, &op0.polys()[i], &op1.polys()[i], &mut out.value[i]);
		}
		let longer = if op0.degree() > op1.degree() { op0.polys() } else { op1.polys() };
		for i in min_degree + 1..=out_degree {
			out.value[i].copy_from(&longer[i]);
		}
		Ok(out)
	}

	/// Adds op0 to op1.
	pub fn add(&self, op0: &impl Operand, op1: &impl Operand) -> Result<Ciphertext> {
		self.binary_op(op0, op1, |r, a, b, c| r.add(a, b, c))
	}

	/// Adds op1 to `ct` in place.
	pub fn add_inplace(&self, ct: &mut Ciphertext, op1: &impl Operand) -> Result<()> {
		if ct.degree() + op1.degree() == 0 {
			return Err(Error::PlaintextOnlyOperands);
		}
		let ring = &self.params.ring_q;
		let min_degree = ct.degree().min(op1.degree());
		ct.resize(ct.degree().max(op1.degree()));
		for i in 0..=min_degree {
			ring.add_assign(&op1.polys()[i], &mut ct.value[i]);
		}
		for i in min_degree + 1..=op1.degree() {
			ct.value[i].copy_from(&op1.polys()[i]);
		}
		Ok(())
	}

	/// Adds without modular reduction; follow with [`Evaluator::reduce`].
	pub fn add_no_mod(&self, op0: &impl Operand, op1: &impl Operand) -> Result<Ciphertext> {
		self.binary_op(op0, op1, |r, a, b, c| r.add_no_mod(a, b, c))
	}

	/// Subtracts op1 from op0.
	pub fn sub(&self, op0: &impl Operand, op1: &impl Operand) -> Result<Ciphertext> {
		let mut out = self.binary_op(op0, op1, |r, a, b, c| r.sub(a, b, c))?;
		// The copied tail of a longer right operand enters negated.
		if op1.degree() > op0.degree() {
			let ring = &self.params.ring_q;
			for i in op0.degree() + 1..=op1.degree() {
				ring.neg_inplace_lvl(ring.max_level(), &mut out.value[i]);
			}
		}
		Ok(out)
	}

	/// Subtracts op1 from `ct` in place.
	pub fn sub_inplace(&self, ct: &mut Ciphertext, op1: &impl Operand) -> Result<()> {
		if ct.degree() + op1.degree() == 0 {
			return Err(Error::PlaintextOnlyOperands);
		}
		let ring = &self.params.ring_q;
		let min_degree = ct.degree().min(op1.degree());
		ct.resize(ct.degree().max(op1.degree()));
		for i in 0..=min_degree {
			ring.sub_assign_lvl(ring.max_level(), &op1.polys()[i], &mut ct.value[i]);
		}
		for i in min_degree + 1..=op1.degree() {
			ct.value[i].copy_from(&op1.polys()[i]);
			ring.neg_inplace_lvl(ring.max_level(), &mut ct.value[i]);
		}
		Ok(())
	}

	/// Subtracts with a modulus lift instead of a reduction.
	pub fn sub_no_mod(&self, op0: &impl Operand, op1: &impl Operand) -> Result<Ciphertext> {
		let mut out = self.binary_op(op0, op1, |r, a, b, c| r.sub_no_mod(a, b, c))?;
		if op1.degree() > op0.degree() {
			let ring = &self.params.ring_q;
			for i in op0.degree() + 1..=op1.degree() {
				ring.neg_inplace_lvl(ring.max_level(), &mut out.value[i]);
			}
		}
		Ok(out)
	}

	/// Negates every polynomial of the operand.
	pub fn neg(&self, op: &impl Operand) -> Result<Ciphertext> {
		let mut out = Ciphertext::new(&self.params, op.degree());
		let ring = &self.params.ring_q;
		for (i, p) in op.polys().iter().enumerate() {
			ring.neg(p, &mut out.value[i]);
		}
		Ok(out)
	}

	pub fn neg_inplace(&self, ct: &mut Ciphertext) {
		let ring = &self.params.ring_q;
		for p in ct.value.iter_mut() {
			ring.neg_inplace_lvl(ring.max_level(), p);
		}
	}

	/// Applies a full modular reduction to every coefficient.
	pub fn reduce(&self, op: &impl Operand) -> Result<Ciphertext> {
		let mut out = Ciphertext::new(&self.params, op.degree());
		let ring = &self.params.ring_q;
		for (i, p) in op.polys().iter().enumerate() {
			ring.reduce(p, &mut out.value[i]);
		}
		Ok(out)
	}

	pub fn reduce_inplace(&self, ct: &mut Ciphertext) {
		let ring = &self.params.ring_q;
		for p in ct.value.iter_mut() {
			ring.reduce_inplace_lvl(ring.max_level(), p);
		}
	}

	/// Multiplies the operand by an integer scalar.
	pub fn mul_scalar(&self, op: &impl Operand, scalar: u64) -> Result<Ciphertext> {
		let mut out = Ciphertext::new(&self.params, op.degree());
		let ring = &self.params.ring_q;
		for (i, p) in op.polys().iter().enumerate() {
			ring.mul_scalar(p, scalar, &mut out.value[i]);
		}
		Ok(out)
	}

	pub fn mul_scalar_inplace(&self, ct: &mut Ciphertext, scalar: u64) {
		let ring = &self.params.ring_q;
		for p in ct.value.iter_mut() {
			ring.mul_scalar_assign_lvl(ring.max_level(), scalar, p);
		}
	}

	/// Multiplies op0 by op1: tensor product over the extended basis
	/// Q * Q', then the t/Q scale-and-round back to Q. The output degree is
	/// the sum of the operand degrees.
	pub fn mul(&mut self, op0: &Ciphertext, op1: &impl Operand) -> Result<Ciphertext> {
		let out_degree = op0.degree() + op1.degree();
		if out_degree + 1 > TENSOR_SLOTS {
			return Err(Error::DegreeTooSmall {
				required: out_degree,
				got: TENSOR_SLOTS - 1,
			});
		}
		let mut out = Ciphertext::new(&self.params, out_degree);
		self.tensor_and_rescale(op0.polys(), Some(op1.polys()), &mut out.value)?;
		Ok(out)
	}

	/// Squares the ciphertext, with the off-diagonal products computed once
	/// and doubled.
	pub fn square(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
		let out_degree = 2 * ct.degree();
		if out_degree + 1 > TENSOR_SLOTS {
			return Err(Error::DegreeTooSmall {
				required: out_degree,
				got: TENSOR_SLOTS - 1,
			});
		}
		let mut out = Ciphertext::new(&self.params, out_degree);
		self.tensor_and_rescale(ct.polys(), None, &mut out.value)?;
		Ok(out)
	}

	/// The tensor engine. `el1 = None` selects the squaring path.
	fn tensor_and_rescale(
		&mut self, el0: &[Poly], el1: Option<&[Poly]>, out: &mut [Poly],
	) -> Result<()> {
		let Evaluator {
			params,
			extender_qmul,
			qmul_half,
			pool_a_q,
			pool_a_qm,
			pool_b_q,
			pool_b_qm,
			pool_c_q,
			pool_c_qm,
			pool_m_q,
			pool_m_qm,
			..
		} = self;
		let ring_q = &params.ring_q;
		let ring_qm = &params.ring_qmul;
		let level = ring_q.max_level();
		let d0 = el0.len() - 1;
		let d1 = el1.map_or(d0, |e| e.len() - 1);
		let d_out = d0 + d1;

		// Extend both operands from Q to Q * Q' and move them to the NTT
		// domain on both sides.
		for (i, p) in el0.iter().enumerate() {
			extender_qmul.mod_up_split_qp(level, p, &mut pool_a_qm[i]);
			ring_q.ntt(p, &mut pool_a_q[i]);
			ring_qm.ntt_inplace(&mut pool_a_qm[i]);
		}
		if let Some(el1) = el1 {
			for (i, p) in el1.iter().enumerate() {
				extender_qmul.mod_up_split_qp(level, p, &mut pool_b_qm[i]);
				ring_q.ntt(p, &mut pool_b_q[i]);
				ring_qm.ntt_inplace(&mut pool_b_qm[i]);
			}
		}

		for k in 0..=d_out {
			pool_c_q[k].zero();
			pool_c_qm[k].zero();
		}

		match el1 {
			// Squaring: accumulate each off-diagonal product once, double,
			// then add the diagonal.
			None => {
				for i in 0..=d0 {
					ring_q.mform(&pool_a_q[i], &mut pool_m_q[i]);
					ring_qm.mform(&pool_a_qm[i], &mut pool_m_qm[i]);
				}
				for i in 0..=d0 {
					for j in i + 1..=d0 {
						ring_q.mul_coeffs_montgomery_and_add(&pool_m_q[i], &pool_a_q[j], &mut pool_c_q[i + j]);
						ring_qm.mul_coeffs_montgomery_and_add(&pool_m_qm[i], &pool_a_qm[j], &mut pool_c_qm[i + j]);
					}
				}
				for k in 0..=d_out {
					ring_q.mul_scalar_assign_lvl(level, 2, &mut pool_c_q[k]);
					ring_qm.mul_scalar_assign_lvl(ring_qm.max_level(), 2, &mut pool_c_qm[k]);
				}
				for i in 0..=d0 {
					ring_q.mul_coeffs_montgomery_and_add(&pool_m_q[i], &pool_a_q[i], &mut pool_c_q[2 * i]);
					ring_qm.mul_coeffs_montgomery_and_add(&pool_m_qm[i], &pool_a_qm[i], &mut pool_c_qm[2 * i]);
				}
			}
			Some(_) => {
				for i in 0..=d0 {
					ring_q.mform(&pool_a_q[i], &mut pool_m_q[i]);
					ring_qm.mform(&pool_a_qm[i], &mut pool_m_qm[i]);
					for j in 0..=d1 {
						ring_q.mul_coeffs_montgomery_and_add(&pool_m_q[i], &pool_b_q[j], &mut pool_c_q[i + j]);
						ring_qm.mul_coeffs_montgomery_and_add(&pool_m_qm[i], &pool_b_qm[j], &mut pool_c_qm[i + j]);
					}
				}
			}
		}

		// Back to coefficient form, then the t/Q scale-and-round: divide by
		// Q on the Q' side, re-embed into Q with centering, and multiply by
		// t at the position the policy dictates.
		let t = params.t;
		for k in 0..=d_out {
			ring_q.inv_ntt_inplace(&mut pool_c_q[k]);
			ring_qm.inv_ntt_inplace(&mut pool_c_qm[k]);

			if params.policy == ScaleRoundPolicy::MulThenDown {
				ring_q.mul_scalar_assign_lvl(level, t, &mut pool_c_q[k]);
				ring_qm.mul_scalar_assign_lvl(ring_qm.max_level(), t, &mut pool_c_qm[k]);
			}

			extender_qmul.mod_down_split_qp(level, &pool_c_q[k], &mut pool_c_qm[k]);
			ring_qm.add_scalar_bigint_assign_lvl(ring_qm.max_level(), qmul_half, &mut pool_c_qm[k]);
			extender_qmul.mod_up_split_pq(level, &pool_c_qm[k], &mut out[k]);
			ring_q.sub_scalar_bigint_assign_lvl(level, qmul_half, &mut out[k]);

			if params.policy == ScaleRoundPolicy::DownThenMul {
				ring_q.mul_scalar_assign_lvl(level, t, &mut out[k]);
			}
		}
		Ok(())
	}

	/// Runs one gadget key switch of `cx` and accumulates the result onto
	/// `c0` and `c1`.
	fn switch_key_into(
		&mut self, cx: &Poly, key: &SwitchingKey, c0: &mut Poly, c1: &mut Poly,
	) -> Result<()> {
		let Evaluator {
			params,
			extender_p,
			decomposer,
			ks_pools,
			..
		} = self;
		let ring_q = &params.ring_q;
		let ring_qp = &params.ring_qp;
		let level = ring_q.max_level();
		let q_limbs = params.moduli_q.len();

		key_switch_accumulate(ring_qp, decomposer, q_limbs, level, cx, key, ks_pools)?;

		let [_, _, acc0, acc1, _] = &mut ks_pools.polys;
		ring_qp.inv_ntt_inplace(acc0);
		ring_qp.inv_ntt_inplace(acc1);
		extender_p.mod_down_pq(level, acc0);
		extender_p.mod_down_pq(level, acc1);
		ring_q.add_assign(acc0, c0);
		ring_q.add_assign(acc1, c1);
		Ok(())
	}

	/// Re-encrypts a degree-1 ciphertext under the key the switching key
	/// points at.
	pub fn switch_keys(&mut self, ct: &Ciphertext, key: &SwitchingKey) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let mut out = Ciphertext::new(&self.params, 1);
		out.value[0].copy_from(&ct.value[0]);
		let cx = ct.value[1].clone();
		let (c0, c1) = out.value.split_at_mut(1);
		self.switch_key_into(&cx, key, &mut c0[0], &mut c1[0])?;
		Ok(out)
	}

	/// Reduces the ciphertext degree to 1, consuming one switching key per
	/// surplus degree, highest degree first.
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

		let (head, tail) = ct.value.split_at_mut(2);
		let (c0, c1) = head.split_at_mut(1);
		for deg in (2..=d).rev() {
			self.switch_key_into(&tail[deg - 2], &rlk.keys[deg - 2], &mut c0[0], &mut c1[0])?;
		}
		ct.value.truncate(2);
		Ok(())
	}

	/// Applies X -> X^gal to both polynomials of a degree-1 ciphertext and
	/// restores the canonical key: the permuted c1 is consumed by the key
	/// switch and the output c1 holds only the switched part.
	fn permute(&mut self, ct: &Ciphertext, gal: u64, key: &SwitchingKey, out: &mut Ciphertext) -> Result<()> {
		let ring_q = &self.params.ring_q;
		out.resize(1);
		ring_q.permute(&ct.value[0], gal, &mut out.value[0]);
		ring_q.permute(&ct.value[1], gal, &mut self.pool_q[0]);
		out.value[1].zero();

		let cx = std::mem::replace(&mut self.pool_q[0], self.params.ring_q.new_poly());
		let (c0, c1) = out.value.split_at_mut(1);
		let res = self.switch_key_into(&cx, key, &mut c0[0], &mut c1[0]);
		self.pool_q[0] = cx;
		res
	}

	/// Rotates the packed columns `k` slots to the left. Uses the exact
	/// rotation key when present; otherwise decomposes `k` (or its right
	/// complement, whichever has lower Hamming weight) over the
	/// power-of-two keys.
	pub fn rotate_columns(&mut self, ct: &Ciphertext, k: usize, keys: &RotationKeySet) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let slots = self.params.n >> 1;
		let k = k & (slots - 1);
		if k == 0 {
			return Ok(ct.clone());
		}

		let mut out = Ciphertext::new(&self.params, 1);
		if let Some(key) = keys.left.get(&k) {
			let gal = self.params.galois_element_for_column_rotation(k);
			self.permute(ct, gal, key, &mut out)?;
			return Ok(out);
		}

		if !keys.has_all_pow2(slots) {
			return Err(Error::MissingRotationKey(k));
		}

		let k_right = slots - k;
		if k.count_ones() <= k_right.count_ones() {
			trace!(k, "rotating left over pow2 keys");
			self.rotate_pow2(ct, GALOIS_GEN, k, false, keys, &mut out)?;
		} else {
			trace!(k = k_right, "rotating right over pow2 keys");
			self.rotate_pow2(ct, self.params.galois_generator_inverse(), k_right, true, keys, &mut out)?;
		}
		Ok(out)
	}

	fn rotate_pow2(
		&mut self, ct: &Ciphertext, mut generator: u64, mut k: usize, right: bool,
		keys: &RotationKeySet, out: &mut Ciphertext,
	) -> Result<()> {
		let mask = self.params.two_n() - 1;
		let mut first = true;
		let mut index = 1usize;
		let src = ct.clone();
		let mut cur = src;
		while k > 0 {
			if k & 1 == 1 {
				let key = if right { &keys.right[&index] } else { &keys.left[&index] };
				let mut step = Ciphertext::new(&self.params, 1);
				self.permute(&cur, generator, key, &mut step)?;
				cur = step;
				first = false;
			}
			generator = (generator as u128 * generator as u128 % (mask as u128 + 1)) as u64 & mask;
			index <<= 1;
			k >>= 1;
		}
		debug_assert!(!first);
		*out = cur;
		Ok(())
	}

	/// Swaps the two plaintext rows.
	pub fn rotate_rows(&mut self, ct: &Ciphertext, keys: &RotationKeySet) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let key = keys.row.as_ref().ok_or(Error::MissingConjugationKey)?;
		let mut out = Ciphertext::new(&self.params, 1);
		let gal = self.params.galois_element_row_swap();
		self.permute(ct, gal, key, &mut out)?;
		Ok(out)
	}

	/// Sums every slot into every slot: log(n/2) column rotations followed
	/// by a row swap.
	pub fn inner_sum(&mut self, ct: &Ciphertext, keys: &RotationKeySet) -> Result<Ciphertext> {
		if ct.degree() != 1 {
			return Err(Error::NotCanonicalDegree(ct.degree()));
		}
		let mut acc = ct.clone();
		let mut i = 1;
		while i < self.params.n >> 1 {
			let rotated = self.rotate_columns(&acc, i, keys)?;
			self.add_inplace(&mut acc, &rotated)?;
			i <<= 1;
		}
		let swapped = self.rotate_rows(&acc, keys)?;
		self.add_inplace(&mut acc, &swapped)?;
		Ok(acc)
	}
}
