//! The gadget key-switch kernel shared by both schemes.

use fhelix_ring::{Decomposer, Poly, Ring};

use crate::keys::SwitchingKey;
use crate::{Error, Result};

/// Scratch polynomials in the extended basis Q*P used by one key switch:
/// the decomposed digit, the NTT image of the input, the two accumulators,
/// and an NTT staging buffer.
#[derive(Debug, Clone)]
pub(crate) struct KeySwitchPools {
	pub polys: [Poly; 5],
}

impl KeySwitchPools {
	pub fn new(ring_qp: &Ring) -> Self {
		KeySwitchPools {
			polys: [
				ring_qp.new_poly(),
				ring_qp.new_poly(),
				ring_qp.new_poly(),
				ring_qp.new_poly(),
				ring_qp.new_poly(),
			],
		}
	}
}

/// Runs the gadget inner product of `cx` (coefficient form, basis Q at
/// `level`) against `key`, leaving the two accumulators in NTT form over
/// the active Q*P rows: pools 2 and 3 hold the c0 and c1 contributions.
///
/// Montgomery products of the key against each digit are accumulated
/// without reduction; a reduction pass runs every eight blocks, and once
/// more at the end if the loop did not close on one.
pub(crate) fn key_switch_accumulate(
	ring_qp: &Ring, decomposer: &Decomposer, q_limbs: usize, level: usize, cx: &Poly,
	key: &SwitchingKey, pools: &mut KeySwitchPools,
) -> Result<()> {
	let beta = decomposer.beta(level);
	if key.beta() < beta {
		return Err(Error::SwitchingKeyMismatch {
			expected: beta,
			got: key.beta(),
		});
	}

	let n = ring_qp.degree();
	let alpha = decomposer.alpha();
	let p_limbs = ring_qp.moduli().len() - q_limbs;

	let [digit, cx_ntt, acc0, acc1, staging] = &mut pools.polys;
	for p in [&mut *digit, &mut *cx_ntt, &mut *acc0, &mut *acc1, &mut *staging] {
		p.zero();
	}

	// NTT image of the input over the active Q rows; in-block digit rows
	// coincide with it and skip their forward transform.
	for j in 0..=level {
		cx_ntt.coeffs[j].copy_from_slice(&cx.coeffs[j]);
		ring_qp.ntt_row(j, &mut cx_ntt.coeffs[j]);
	}

	let active_rows: Vec<usize> = (0..=level).chain(q_limbs..q_limbs + p_limbs).collect();

	let mut reduce = 0usize;
	for block in 0..beta {
		decomposer.decompose(level, block, cx, digit);

		let start = block * alpha;
		let end = (start + alpha).min(level + 1);

		for &j in &active_rows {
			let m = &ring_qp.moduli()[j];
			let in_block = j >= start && j < end;
			if !in_block {
				staging.coeffs[j].copy_from_slice(&digit.coeffs[j]);
				ring_qp.ntt_row(j, &mut staging.coeffs[j]);
			}
			let d_ntt = if in_block {
				&cx_ntt.coeffs[j]
			} else {
				&staging.coeffs[j]
			};

			let b_key = &key.pairs[block][0].coeffs[j];
			let a_key = &key.pairs[block][1].coeffs[j];
			let r0 = &mut acc0.coeffs[j];
			let r1 = &mut acc1.coeffs[j];
			for y in 0..n {
				r0[y] = r0[y].wrapping_add(m.mred(b_key[y], d_ntt[y]));
				r1[y] = r1[y].wrapping_add(m.mred(a_key[y], d_ntt[y]));
			}
		}

		if reduce & 7 == 7 {
			for &j in &active_rows {
				let m = &ring_qp.moduli()[j];
				for v in acc0.coeffs[j].iter_mut() {
					*v = m.reduce(*v);
				}
				for v in acc1.coeffs[j].iter_mut() {
					*v = m.reduce(*v);
				}
			}
		}
		reduce += 1;
	}

	if reduce == 0 || (reduce - 1) & 7 != 7 {
		for &j in &active_rows {
			let m = &ring_qp.moduli()[j];
			for v in acc0.coeffs[j].iter_mut() {
				*v = m.reduce(*v);
			}
			for v in acc1.coeffs[j].iter_mut() {
				*v = m.reduce(*v);
			}
		}
	}

	Ok(())
}
