use std::collections::HashMap;
use std::sync::Arc;

use fhelix_ring::Poly;
use num_complex::Complex64;

use crate::{Error, Result};

use super::ciphertext::Plaintext;
use super::parameters::CkksParameters;

/// Encodes complex vectors into the canonical-embedding slots of R_Q.
///
/// Slots follow the powers of the Galois generator, so evaluator rotations
/// shift them cyclically and conjugation conjugates them. Vectors shorter
/// than n/2 slots are packed with a coefficient gap and replicate over the
/// ring.
pub struct Encoder {
	params: Arc<CkksParameters>,
	/// exp(2 pi i k / 2n) for k in 0..2n.
	roots: Vec<Complex64>,
	/// 5^i mod 2n.
	rot_group: Vec<usize>,
}

impl Encoder {
	pub fn new(params: &Arc<CkksParameters>) -> Self {
		let m = 2 * params.n;
		let mut roots = Vec::with_capacity(m);
		for k in 0..m {
			let angle = 2.0 * std::f64::consts::PI * k as f64 / m as f64;
			roots.push(Complex64::new(angle.cos(), angle.sin()));
		}
		let mut rot_group = Vec::with_capacity(params.n / 2);
		let mut pos = 1usize;
		for _ in 0..params.n / 2 {
			rot_group.push(pos);
			pos = pos * fhelix_ring::GALOIS_GEN as usize % m;
		}
		Encoder {
			params: params.clone(),
			roots,
			rot_group,
		}
	}

	/// The canonical embedding, slots to coefficients.
	fn special_inv_fft(&self, values: &mut [Complex64]) {
		let n = values.len();
		let m = 2 * self.params.n;
		let mut len = n;
		while len >= 1 {
			let lenh = len >> 1;
			let lenq = len << 2;
			let gap = m / lenq;
			let mut i = 0;
			while i < n {
				for j in 0..lenh {
					let idx = (lenq - (self.rot_group[j] % lenq)) * gap;
					let u = values[i + j] + values[i + j + lenh];
					let v = (values[i + j] - values[i + j + lenh]) * self.roots[idx];
					values[i + j] = u;
					values[i + j + lenh] = v;
				}
				i += len;
			}
			len >>= 1;
		}
		bit_reverse_in_place(values);
		let inv = 1.0 / n as f64;
		for v in values.iter_mut() {
			*v *= inv;
		}
	}

	/// Coefficients to slots.
	fn special_fft(&self, values: &mut [Complex64]) {
		let n = values.len();
		let m = 2 * self.params.n;
		bit_reverse_in_place(values);
		let mut len = 2;
		while len <= n {
			let lenh = len >> 1;
			let lenq = len << 2;
			let gap = m / lenq;
			let mut i = 0;
			while i < n {
				for j in 0..lenh {
					let idx = (self.rot_group[j] % lenq) * gap;
					let u = values[i + j];
					let v = values[i + j + lenh] * self.roots[idx];
					values[i + j] = u + v;
					values[i + j + lenh] = u - v;
				}
				i += len;
			}
			len <<= 1;
		}
	}

	/// Encodes `values` (a power-of-two count of slots, at most n/2) at the
	/// given level and scale.
	pub fn encode(&self, values: &[Complex64], level: usize, scale: f64) -> Result<Plaintext> {
		let slots = values.len();
		let n = self.params.n;
		if slots == 0 || !slots.is_power_of_two() || slots > n / 2 {
			return Err(Error::InvalidParameters(format!(
				"slot count {slots} must be a power of two at most {}",
				n / 2
			)));
		}

		let mut v = values.to_vec();
		self.special_inv_fft(&mut v);

		let gap = (n / 2) / slots;
		let mut poly = Poly::new(level + 1, n);
		let moduli = self.params.ring_q.moduli();
		for (i, z) in v.iter().enumerate() {
			let re = (z.re * scale).round() as i128;
			let im = (z.im * scale).round() as i128;
			for (j, md) in moduli.iter().enumerate().take(level + 1) {
				poly.coeffs[j][i * gap] = reduce_i128(re, md.modulus());
				poly.coeffs[j][i * gap + n / 2] = reduce_i128(im, md.modulus());
			}
		}
		self.params.ring_q.ntt_inplace_lvl(level, &mut poly);

		Ok(Plaintext {
			params: self.params.clone(),
			poly,
			scale,
			level,
		})
	}

	/// Encodes a real vector.
	pub fn encode_f64(&self, values: &[f64], level: usize, scale: f64) -> Result<Plaintext> {
		let v: Vec<Complex64> = values.iter().map(|&x| Complex64::new(x, 0.0)).collect();
		self.encode(&v, level, scale)
	}

	/// Decodes the configured slot count from a plaintext.
	pub fn decode(&self, pt: &Plaintext) -> Vec<Complex64> {
		self.decode_slots(pt, self.params.log_slots())
	}

	/// Decodes `2^log_slots` slots from a plaintext.
	pub fn decode_slots(&self, pt: &Plaintext, log_slots: usize) -> Vec<Complex64> {
		let n = self.params.n;
		let slots = 1 << log_slots;
		let gap = (n / 2) / slots;
		let ring_q = &self.params.ring_q;

		let mut coeff = Poly::new(pt.level + 1, n);
		ring_q.inv_ntt_lvl(pt.level, &pt.poly, &mut coeff);
		let lifted = ring_q.reconstruct(pt.level, &coeff);
		let q = ring_q.modulus_big_at(pt.level);
		let q_half = &q >> 1u32;

		let centered = |idx: usize| -> f64 {
			let v = &lifted[idx];
			if v > &q_half {
				-(biguint_to_f64(&(&q - v)))
			} else {
				biguint_to_f64(v)
			}
		};

		let mut values = Vec::with_capacity(slots);
		for i in 0..slots {
			values.push(Complex64::new(
				centered(i * gap) / pt.scale,
				centered(i * gap + n / 2) / pt.scale,
			));
		}
		self.special_fft(&mut values);
		values
	}

	/// Encodes the nonzero diagonals of a slot matrix for the baby-step /
	/// giant-step product: each diagonal is pre-rotated by its giant step
	/// and stored in NTT and Montgomery form at the target level.
	pub fn encode_diag_matrix(
		&self, level: usize, diags: &HashMap<usize, Vec<Complex64>>, scale: f64,
		max_n1n2_ratio: f64, log_dim: usize,
	) -> Result<PtDiagMatrix> {
		let dim = 1usize << log_dim;
		let n1 = find_best_split(diags, dim, max_n1n2_ratio);

		let mut vec = HashMap::with_capacity(diags.len());
		for (&i, diag) in diags {
			if diag.len() != dim {
				return Err(Error::InvalidParameters(format!(
					"diagonal {i} has {} entries, expected {dim}",
					diag.len()
				)));
			}
			let giant = i - (i % n1);
			// rot_{-giant}: entry x holds diag[x - giant].
			let mut rotated = vec![Complex64::default(); dim];
			for x in 0..dim {
				rotated[x] = diag[(x + dim - giant % dim) % dim];
			}
			let mut pt = self.encode(&rotated, level, scale)?;
			self.params
				.ring_q
				.mform_inplace_lvl(level, &mut pt.poly);
			vec.insert(i, pt.poly);
		}

		Ok(PtDiagMatrix {
			n1,
			level,
			scale,
			log_dim,
			vec,
		})
	}
}

/// The nonzero diagonals of a plaintext slot matrix, encoded for the
/// baby-step giant-step homomorphic product.
#[derive(Debug, Clone)]
pub struct PtDiagMatrix {
	pub(crate) n1: usize,
	pub(crate) level: usize,
	pub(crate) scale: f64,
	pub(crate) log_dim: usize,
	/// Diagonal index -> pre-rotated plaintext in NTT + Montgomery form.
	pub(crate) vec: HashMap<usize, Poly>,
}

impl PtDiagMatrix {
	pub fn level(&self) -> usize {
		self.level
	}

	/// The rotations the product needs: baby steps and giant steps.
	pub fn rotations(&self) -> Vec<usize> {
		let mut rots = vec![];
		for &i in self.vec.keys() {
			let baby = i % self.n1;
			let giant = i - baby;
			if baby != 0 && !rots.contains(&baby) {
				rots.push(baby);
			}
			if giant != 0 && !rots.contains(&giant) {
				rots.push(giant);
			}
		}
		rots.sort_unstable();
		rots
	}
}

/// Picks the baby-step count minimizing the rotation total, subject to the
/// n1/n2 ratio cap.
fn find_best_split(diags: &HashMap<usize, Vec<Complex64>>, dim: usize, max_ratio: f64) -> usize {
	let mut best_n1 = 1;
	let mut best_cost = usize::MAX;
	let mut n1 = 1usize;
	while n1 <= dim {
		let n2 = dim / n1;
		if n1 as f64 / n2 as f64 <= max_ratio {
			let mut babies = vec![];
			let mut giants = vec![];
			for &i in diags.keys() {
				let b = i % n1;
				let g = i - b;
				if b != 0 && !babies.contains(&b) {
					babies.push(b);
				}
				if g != 0 && !giants.contains(&g) {
					giants.push(g);
				}
			}
			let cost = babies.len() + giants.len();
			if cost < best_cost {
				best_cost = cost;
				best_n1 = n1;
			}
		}
		n1 <<= 1;
	}
	best_n1
}

fn bit_reverse_in_place(values: &mut [Complex64]) {
	let n = values.len();
	if n <= 2 {
		return;
	}
	let shift = usize::BITS - n.trailing_zeros();
	for i in 0..n {
		let j = i.reverse_bits() >> shift;
		if i < j {
			values.swap(i, j);
		}
	}
}

fn reduce_i128(x: i128, q: u64) -> u64 {
	let q = q as i128;
	let r = x % q;
	if r < 0 {
		(r + q) as u64
	} else {
		r as u64
	}
}

fn biguint_to_f64(v: &num_bigint::BigUint) -> f64 {
	use num_traits::ToPrimitive;
	v.to_f64().unwrap_or(f64::MAX)
}
