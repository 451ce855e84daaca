use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;

use crate::modulus::Modulus;
use crate::poly::Poly;
use crate::ring::{bigint_mod_u64, Ring};

/// One direction of an approximate CRT basis conversion: source residues are
/// recombined as sum_i y_i * (A/a_i) - v * A with the overflow count v
/// estimated in floating point. The estimate is off by at most one, which
/// shifts the lifted integer by +-A; every consumer tolerates that as noise.
#[derive(Debug, Clone)]
struct ConvTable {
	src: Vec<Modulus>,
	dst: Vec<Modulus>,
	/// (A/a_i)^-1 mod a_i.
	ahat_inv: Vec<u64>,
	/// (A/a_i) mod b_j, indexed [i][j].
	ahat_mod_b: Vec<Vec<u64>>,
	/// A mod b_j.
	a_mod_b: Vec<u64>,
	/// 1 / a_i, for the overflow estimate.
	src_rcp: Vec<f64>,
}

impl ConvTable {
	fn new(src: &[Modulus], dst: &[Modulus]) -> Self {
		let a: BigUint = src.iter().map(|m| m.modulus()).product();
		let mut ahat_inv = Vec::with_capacity(src.len());
		let mut ahat_mod_b = Vec::with_capacity(src.len());
		for m in src {
			let ahat = &a / m.modulus();
			ahat_inv.push(m.inv(bigint_mod_u64(&ahat, m.modulus())));
			ahat_mod_b.push(dst.iter().map(|d| bigint_mod_u64(&ahat, d.modulus())).collect());
		}
		ConvTable {
			ahat_inv,
			ahat_mod_b,
			a_mod_b: dst.iter().map(|d| bigint_mod_u64(&a, d.modulus())).collect(),
			src_rcp: src.iter().map(|m| 1.0 / m.modulus() as f64).collect(),
			src: src.to_vec(),
			dst: dst.to_vec(),
		}
	}

	/// Converts `n` coefficients from the source rows to the destination
	/// rows. Rows must all hold at least `n` values.
	fn convert(&self, n: usize, src: &[Vec<u64>], dst: &mut [Vec<u64>]) {
		debug_assert_eq!(src.len(), self.src.len());
		debug_assert_eq!(dst.len(), self.dst.len());
		let k = self.src.len();
		let mut y = vec![0u64; k];
		for c in 0..n {
			let mut vf = 0.5f64;
			for i in 0..k {
				y[i] = self.src[i].mul(src[i][c], self.ahat_inv[i]);
				vf += y[i] as f64 * self.src_rcp[i];
			}
			let v = vf as u64;
			for (j, m) in self.dst.iter().enumerate() {
				let mut acc = 0u128;
				for i in 0..k {
					acc += y[i] as u128 * self.ahat_mod_b[i][j] as u128;
				}
				let r = (acc % m.modulus() as u128) as u64;
				dst[j][c] = m.sub(r, m.mul(v, self.a_mod_b[j]));
			}
		}
	}
}

/// Fast RNS basis extension between a ciphertext chain Q and an auxiliary
/// chain P, covering the four conversions the evaluators need: extension
/// before a tensor product, the two halves of the division by Q after it,
/// and the division by P that closes a key switch.
#[derive(Debug, Clone)]
pub struct BasisExtender {
	ring_q: Arc<Ring>,
	ring_p: Arc<Ring>,
	/// Q_l -> P conversions, indexed by level. Shared across clones.
	up: Arc<Vec<ConvTable>>,
	/// P -> Q conversion at the full P chain.
	down: Arc<ConvTable>,
	/// Q_l^-1 mod p_j, indexed by level.
	q_inv_mod_p: Arc<Vec<Vec<u64>>>,
	/// P^-1 mod q_i, in Montgomery form.
	p_inv_mod_q: Arc<Vec<u64>>,
	/// floor(P/2) mod p_j and mod q_i.
	p_half_mod_p: Arc<Vec<u64>>,
	p_half_mod_q: Arc<Vec<u64>>,
	scratch_p: Poly,
	scratch_q: Poly,
}

impl BasisExtender {
	pub fn new(ring_q: &Arc<Ring>, ring_p: &Arc<Ring>) -> Self {
		let n = ring_q.degree();
		let q_moduli = ring_q.moduli();
		let p_moduli = ring_p.moduli();

		let mut up = Vec::with_capacity(q_moduli.len());
		let mut q_inv_mod_p = Vec::with_capacity(q_moduli.len());
		let mut q_big = BigUint::one();
		for level in 0..q_moduli.len() {
			q_big *= q_moduli[level].modulus();
			up.push(ConvTable::new(&q_moduli[..=level], p_moduli));
			q_inv_mod_p.push(
				p_moduli
					.iter()
					.map(|m| m.inv(bigint_mod_u64(&q_big, m.modulus())))
					.collect(),
			);
		}

		let p_big = ring_p.modulus_big().clone();
		let p_half = &p_big >> 1;

		BasisExtender {
			down: Arc::new(ConvTable::new(p_moduli, q_moduli)),
			up: Arc::new(up),
			q_inv_mod_p: Arc::new(q_inv_mod_p),
			p_inv_mod_q: Arc::new(
				q_moduli
					.iter()
					.map(|m| m.mform(m.inv(bigint_mod_u64(&p_big, m.modulus()))))
					.collect(),
			),
			p_half_mod_p: Arc::new(
				p_moduli.iter().map(|m| bigint_mod_u64(&p_half, m.modulus())).collect(),
			),
			p_half_mod_q: Arc::new(
				q_moduli.iter().map(|m| bigint_mod_u64(&p_half, m.modulus())).collect(),
			),
			scratch_p: Poly::new(p_moduli.len(), n),
			scratch_q: Poly::new(q_moduli.len(), n),
			ring_q: ring_q.clone(),
			ring_p: ring_p.clone(),
		}
	}

	/// Extends `src` from basis Q_level to basis P, writing only the new
	/// P-side residues.
	pub fn mod_up_split_qp(&mut self, level: usize, src: &Poly, dst_p: &mut Poly) {
		let n = self.ring_q.degree();
		self.up[level].convert(n, &src.coeffs[..=level], &mut dst_p.coeffs);
	}

	/// Extends `src` from basis P to basis Q_level.
	pub fn mod_up_split_pq(&mut self, level: usize, src_p: &Poly, dst_q: &mut Poly) {
		let n = self.ring_q.degree();
		self.down.convert(n, &src_p.coeffs, &mut dst_q.coeffs[..=level]);
	}

	/// Given the two halves of a value in basis Q_level * P, divides by
	/// Q_level (floor) and leaves the quotient on the P side, in place.
	pub fn mod_down_split_qp(&mut self, level: usize, src_q: &Poly, src_dst_p: &mut Poly) {
		let n = self.ring_q.degree();
		self.up[level].convert(n, &src_q.coeffs[..=level], &mut self.scratch_p.coeffs);
		let p_moduli = self.ring_p.moduli();
		for (j, m) in p_moduli.iter().enumerate() {
			let q_inv = m.mform(self.q_inv_mod_p[level][j]);
			let (dst, tmp) = (&mut src_dst_p.coeffs[j], &self.scratch_p.coeffs[j]);
			for c in 0..n {
				dst[c] = m.mred(m.sub(dst[c], tmp[c]), q_inv);
			}
		}
	}

	/// Divides a coefficient-form value in basis Q_level * P by P with
	/// centered rounding. The P rows of `p` start at row `q_limbs`; the
	/// rounded quotient replaces the Q rows in place.
	pub fn mod_down_pq(&mut self, level: usize, p: &mut Poly) {
		let n = self.ring_q.degree();
		let q_limbs = self.ring_q.moduli().len();
		let p_moduli = self.ring_p.moduli();

		// u = x_P + floor(P/2), the centering half.
		for (j, m) in p_moduli.iter().enumerate() {
			let h = self.p_half_mod_p[j];
			let (dst, src) = (&mut self.scratch_p.coeffs[j], &p.coeffs[q_limbs + j]);
			for c in 0..n {
				dst[c] = m.add(src[c], h);
			}
		}
		self.down.convert(n, &self.scratch_p.coeffs, &mut self.scratch_q.coeffs[..=level]);

		let q_moduli = self.ring_q.moduli();
		for i in 0..=level {
			let m = &q_moduli[i];
			let h = self.p_half_mod_q[i];
			let p_inv = self.p_inv_mod_q[i];
			let (row, conv) = (&mut p.coeffs[i], &self.scratch_q.coeffs[i]);
			for c in 0..n {
				row[c] = m.mred(m.sub(m.add(row[c], h), conv[c]), p_inv);
			}
		}
	}

	/// [`BasisExtender::mod_down_pq`] for NTT-resident operands: the P rows
	/// are brought to coefficient form, converted, and the quotient is
	/// returned to the NTT domain before the combining step.
	pub fn mod_down_ntt_pq(&mut self, level: usize, p: &mut Poly) {
		let n = self.ring_q.degree();
		let q_limbs = self.ring_q.moduli().len();
		let p_moduli = self.ring_p.moduli();

		for (j, m) in p_moduli.iter().enumerate() {
			let h = self.p_half_mod_p[j];
			self.scratch_p.coeffs[j].copy_from_slice(&p.coeffs[q_limbs + j]);
			self.ring_p.inv_ntt_row(j, &mut self.scratch_p.coeffs[j]);
			for c in self.scratch_p.coeffs[j].iter_mut() {
				*c = m.add(*c, h);
			}
		}
		self.down.convert(n, &self.scratch_p.coeffs, &mut self.scratch_q.coeffs[..=level]);

		let q_moduli = self.ring_q.moduli();
		for i in 0..=level {
			let m = &q_moduli[i];
			let h = self.p_half_mod_q[i];
			let p_inv = self.p_inv_mod_q[i];
			self.ring_q.ntt_row(i, &mut self.scratch_q.coeffs[i]);
			let (row, conv) = (&mut p.coeffs[i], &self.scratch_q.coeffs[i]);
			for c in 0..n {
				row[c] = m.mred(m.sub(m.add(row[c], h), conv[c]), p_inv);
			}
		}
	}
}

/// Gadget decomposition of R_Q elements into blocks of `alpha = |P|`
/// consecutive primes. Block digits are centered and spread across the whole
/// Q*P chain; on in-block primes the digit coincides with the source.
#[derive(Debug, Clone)]
pub struct Decomposer {
	alpha: usize,
	/// Digit-reconstruction tables indexed [level][block]. Shared across
	/// clones.
	tables: Arc<Vec<Vec<ConvTable>>>,
	/// Prime count of each block at the full level.
	xalpha: Vec<usize>,
	n: usize,
}

impl Decomposer {
	pub fn new(ring_q: &Arc<Ring>, ring_p: &Arc<Ring>) -> Self {
		let q_moduli = ring_q.moduli();
		let p_moduli = ring_p.moduli();
		let alpha = p_moduli.len();
		let beta_max = q_moduli.len().div_ceil(alpha);

		let mut tables = Vec::with_capacity(q_moduli.len());
		for level in 0..q_moduli.len() {
			let beta = (level + 1).div_ceil(alpha);
			let mut per_block = Vec::with_capacity(beta);
			for block in 0..beta {
				let start = block * alpha;
				let end = (start + alpha).min(level + 1);
				let mut dst: Vec<Modulus> = q_moduli[..=level].to_vec();
				dst.extend_from_slice(p_moduli);
				per_block.push(ConvTable::new(&q_moduli[start..end], &dst));
			}
			tables.push(per_block);
		}

		let mut xalpha = vec![alpha; beta_max];
		if q_moduli.len() % alpha != 0 {
			xalpha[beta_max - 1] = q_moduli.len() % alpha;
		}

		Decomposer {
			alpha,
			tables: Arc::new(tables),
			xalpha,
			n: ring_q.degree(),
		}
	}

	/// Number of primes per gadget block at the full level.
	pub fn xalpha(&self) -> &[usize] {
		&self.xalpha
	}

	/// Number of gadget blocks active at `level`.
	pub fn beta(&self, level: usize) -> usize {
		(level + 1).div_ceil(self.alpha)
	}

	pub fn alpha(&self) -> usize {
		self.alpha
	}

	/// Writes the centered digit of `src` for the given block over the full
	/// Q*P chain: Q rows 0..=level, then the P rows starting at `q_limbs`.
	pub fn decompose(&self, level: usize, block: usize, src: &Poly, dst_qp: &mut Poly) {
		let table = &self.tables[level][block];
		let start = block * self.alpha;
		let end = (start + self.alpha).min(level + 1);
		let q_limbs = src.coeffs.len();

		// Destination rows: the active Q prefix followed by the P rows, in
		// the order the table was built with.
		let mut rows: Vec<&mut Vec<u64>> = Vec::with_capacity(level + 1 + dst_qp.coeffs.len() - q_limbs);
		let (q_rows, p_rows) = dst_qp.coeffs.split_at_mut(q_limbs);
		rows.extend(q_rows[..=level].iter_mut());
		rows.extend(p_rows.iter_mut());

		let k = end - start;
		let mut y = vec![0u64; k];
		for c in 0..self.n {
			let mut vf = 0.5f64;
			for i in 0..k {
				y[i] = table.src[i].mul(src.coeffs[start + i][c], table.ahat_inv[i]);
				vf += y[i] as f64 * table.src_rcp[i];
			}
			let v = vf as u64;
			for (j, m) in table.dst.iter().enumerate() {
				let mut acc = 0u128;
				for i in 0..k {
					acc += y[i] as u128 * table.ahat_mod_b[i][j] as u128;
				}
				let r = (acc % m.modulus() as u128) as u64;
				rows[j][c] = m.sub(r, m.mul(v, table.a_mod_b[j]));
			}
		}
	}
}
