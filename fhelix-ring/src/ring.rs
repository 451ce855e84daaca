use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::Normal;

use crate::modulus::Modulus;
use crate::ntt::NttTables;
use crate::poly::Poly;
use crate::{Error, Result};

/// Generator of the Galois group used for slot rotations.
pub const GALOIS_GEN: u64 = 5;

/// A residue ring Z_Q[X]/(X^n + 1) for a chain of NTT-friendly primes Q.
///
/// All operations are prime-wise, in place, with explicit destinations, and
/// take an explicit `level` bounding the active prefix of the chain. The
/// `level`-less variants act on the full chain.
#[derive(Debug, Clone)]
pub struct Ring {
	n: usize,
	moduli: Vec<Modulus>,
	ntt: Vec<NttTables>,
	modulus_big: BigUint,
}

impl Ring {
	pub fn new(n: usize, primes: &[u64]) -> Result<Self> {
		if n < 16 || !n.is_power_of_two() {
			return Err(Error::InvalidRingDegree(n));
		}
		let mut moduli = Vec::with_capacity(primes.len());
		let mut ntt = Vec::with_capacity(primes.len());
		let mut modulus_big = BigUint::one();
		for &q in primes {
			let m = Modulus::new(q)?;
			ntt.push(NttTables::new(&m, n)?);
			moduli.push(m);
			modulus_big *= q;
		}
		Ok(Ring {
			n,
			moduli,
			ntt,
			modulus_big,
		})
	}

	pub fn degree(&self) -> usize {
		self.n
	}

	pub fn moduli(&self) -> &[Modulus] {
		&self.moduli
	}

	/// The product of the whole prime chain.
	pub fn modulus_big(&self) -> &BigUint {
		&self.modulus_big
	}

	/// The product of the chain prefix active at `level`.
	pub fn modulus_big_at(&self, level: usize) -> BigUint {
		let mut m = BigUint::one();
		for q in &self.moduli[..=level] {
			m *= q.modulus();
		}
		m
	}

	pub fn max_level(&self) -> usize {
		self.moduli.len() - 1
	}

	pub fn new_poly(&self) -> Poly {
		Poly::new(self.moduli.len(), self.n)
	}

	fn zip2<F: FnMut(&Modulus, &[u64], &mut [u64])>(&self, level: usize, a: &Poly, c: &mut Poly, mut f: F) {
		for i in 0..=level {
			f(&self.moduli[i], &a.coeffs[i], &mut c.coeffs[i]);
		}
	}

	fn zip3<F: FnMut(&Modulus, &[u64], &[u64], &mut [u64])>(
		&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly, mut f: F,
	) {
		for i in 0..=level {
			f(&self.moduli[i], &a.coeffs[i], &b.coeffs[i], &mut c.coeffs[i]);
		}
	}

	pub fn add(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.add_lvl(self.max_level(), a, b, c)
	}

	pub fn add_lvl(&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly) {
		self.zip3(level, a, b, c, |m, a, b, c| {
			for j in 0..a.len() {
				c[j] = m.add(a[j], b[j]);
			}
		})
	}

	/// Addition without modular reduction; callers are responsible for the
	/// headroom.
	pub fn add_no_mod(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.add_no_mod_lvl(self.max_level(), a, b, c)
	}

	pub fn add_no_mod_lvl(&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly) {
		self.zip3(level, a, b, c, |_, a, b, c| {
			for j in 0..a.len() {
				c[j] = a[j].wrapping_add(b[j]);
			}
		})
	}

	pub fn sub(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.sub_lvl(self.max_level(), a, b, c)
	}

	pub fn sub_lvl(&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly) {
		self.zip3(level, a, b, c, |m, a, b, c| {
			for j in 0..a.len() {
				c[j] = m.sub(a[j], b[j]);
			}
		})
	}

	/// Subtraction with a single modulus lift instead of a reduction:
	/// c = a + (q - b).
	pub fn sub_no_mod(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.sub_no_mod_lvl(self.max_level(), a, b, c)
	}

	pub fn sub_no_mod_lvl(&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly) {
		self.zip3(level, a, b, c, |m, a, b, c| {
			let q = m.modulus();
			for j in 0..a.len() {
				c[j] = a[j].wrapping_add(q - b[j]);
			}
		})
	}

	pub fn neg(&self, a: &Poly, c: &mut Poly) {
		self.neg_lvl(self.max_level(), a, c)
	}

	pub fn neg_lvl(&self, level: usize, a: &Poly, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			for j in 0..a.len() {
				c[j] = m.neg(a[j]);
			}
		})
	}

	pub fn reduce(&self, a: &Poly, c: &mut Poly) {
		self.reduce_lvl(self.max_level(), a, c)
	}

	pub fn reduce_lvl(&self, level: usize, a: &Poly, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			for j in 0..a.len() {
				c[j] = m.reduce(a[j]);
			}
		})
	}

	pub fn mform(&self, a: &Poly, c: &mut Poly) {
		self.mform_lvl(self.max_level(), a, c)
	}

	pub fn mform_lvl(&self, level: usize, a: &Poly, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			for j in 0..a.len() {
				c[j] = m.mform(a[j]);
			}
		})
	}

	pub fn inv_mform(&self, a: &Poly, c: &mut Poly) {
		self.inv_mform_lvl(self.max_level(), a, c)
	}

	pub fn inv_mform_lvl(&self, level: usize, a: &Poly, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			for j in 0..a.len() {
				c[j] = m.inv_mform(a[j]);
			}
		})
	}

	/// c = a * b, with `a` in Montgomery form.
	pub fn mul_coeffs_montgomery(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.mul_coeffs_montgomery_lvl(self.max_level(), a, b, c)
	}

	pub fn mul_coeffs_montgomery_lvl(&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly) {
		self.zip3(level, a, b, c, |m, a, b, c| {
			for j in 0..a.len() {
				c[j] = m.mred(a[j], b[j]);
			}
		})
	}

	/// c = c + a * b mod q, with `a` in Montgomery form.
	pub fn mul_coeffs_montgomery_and_add(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.mul_coeffs_montgomery_and_add_lvl(self.max_level(), a, b, c)
	}

	pub fn mul_coeffs_montgomery_and_add_lvl(&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly) {
		self.zip3(level, a, b, c, |m, a, b, c| {
			for j in 0..a.len() {
				c[j] = m.add(c[j], m.mred(a[j], b[j]));
			}
		})
	}

	/// c = c + a * b without the final reduction. Each product is below q,
	/// so up to eight accumulations fit before a reduce is required.
	pub fn mul_coeffs_montgomery_and_add_no_mod(&self, a: &Poly, b: &Poly, c: &mut Poly) {
		self.mul_coeffs_montgomery_and_add_no_mod_lvl(self.max_level(), a, b, c)
	}

	pub fn mul_coeffs_montgomery_and_add_no_mod_lvl(
		&self, level: usize, a: &Poly, b: &Poly, c: &mut Poly,
	) {
		self.zip3(level, a, b, c, |m, a, b, c| {
			for j in 0..a.len() {
				c[j] = c[j].wrapping_add(m.mred(a[j], b[j]));
			}
		})
	}

	pub fn mul_scalar(&self, a: &Poly, scalar: u64, c: &mut Poly) {
		self.mul_scalar_lvl(self.max_level(), a, scalar, c)
	}

	pub fn mul_scalar_lvl(&self, level: usize, a: &Poly, scalar: u64, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			let s = m.mform(m.reduce(scalar));
			for j in 0..a.len() {
				c[j] = m.mred(a[j], s);
			}
		})
	}

	pub fn mul_scalar_bigint(&self, a: &Poly, scalar: &BigUint, c: &mut Poly) {
		self.mul_scalar_bigint_lvl(self.max_level(), a, scalar, c)
	}

	pub fn mul_scalar_bigint_lvl(&self, level: usize, a: &Poly, scalar: &BigUint, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			let r = bigint_mod_u64(scalar, m.modulus());
			let s = m.mform(r);
			for j in 0..a.len() {
				c[j] = m.mred(a[j], s);
			}
		})
	}

	pub fn add_scalar_bigint(&self, a: &Poly, scalar: &BigUint, c: &mut Poly) {
		self.add_scalar_bigint_lvl(self.max_level(), a, scalar, c)
	}

	pub fn add_scalar_bigint_lvl(&self, level: usize, a: &Poly, scalar: &BigUint, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			let s = bigint_mod_u64(scalar, m.modulus());
			for j in 0..a.len() {
				c[j] = m.add(a[j], s);
			}
		})
	}

	pub fn sub_scalar_bigint(&self, a: &Poly, scalar: &BigUint, c: &mut Poly) {
		self.sub_scalar_bigint_lvl(self.max_level(), a, scalar, c)
	}

	pub fn sub_scalar_bigint_lvl(&self, level: usize, a: &Poly, scalar: &BigUint, c: &mut Poly) {
		self.zip2(level, a, c, |m, a, c| {
			let s = bigint_mod_u64(scalar, m.modulus());
			for j in 0..a.len() {
				c[j] = m.sub(a[j], s);
			}
		})
	}

	pub fn ntt(&self, a: &Poly, c: &mut Poly) {
		self.ntt_lvl(self.max_level(), a, c)
	}

	pub fn ntt_lvl(&self, level: usize, a: &Poly, c: &mut Poly) {
		for i in 0..=level {
			c.coeffs[i].copy_from_slice(&a.coeffs[i]);
			self.ntt[i].forward(&self.moduli[i], &mut c.coeffs[i]);
		}
	}

	pub fn inv_ntt(&self, a: &Poly, c: &mut Poly) {
		self.inv_ntt_lvl(self.max_level(), a, c)
	}

	pub fn inv_ntt_lvl(&self, level: usize, a: &Poly, c: &mut Poly) {
		for i in 0..=level {
			c.coeffs[i].copy_from_slice(&a.coeffs[i]);
			self.ntt[i].inverse(&self.moduli[i], &mut c.coeffs[i]);
		}
	}

	/// Forward transform of a single row, in place, with the tables of
	/// prime `i`.
	pub fn ntt_row(&self, i: usize, row: &mut [u64]) {
		self.ntt[i].forward(&self.moduli[i], row);
	}

	pub fn inv_ntt_row(&self, i: usize, row: &mut [u64]) {
		self.ntt[i].inverse(&self.moduli[i], row);
	}

	/// Applies X -> X^gal to a coefficient-form polynomial. Exponents that
	/// land beyond n wrap with a sign flip.
	pub fn permute(&self, a: &Poly, gal: u64, c: &mut Poly) {
		self.permute_lvl(self.max_level(), a, gal, c)
	}

	pub fn permute_lvl(&self, level: usize, a: &Poly, gal: u64, c: &mut Poly) {
		let n = self.n as u64;
		let mask = 2 * n - 1;
		for i in 0..=level {
			let q = self.moduli[i].modulus();
			let (src, dst) = (&a.coeffs[i], &mut c.coeffs[i]);
			for j in 0..self.n {
				let e = (j as u64 * gal) & mask;
				let v = src[j];
				if e < n {
					dst[e as usize] = v;
				} else {
					dst[(e - n) as usize] = if v == 0 { 0 } else { q - v };
				}
			}
		}
	}

	/// Index table for applying X -> X^gal to NTT-form polynomials.
	pub fn permute_ntt_index(&self, gal: u64) -> Vec<usize> {
		let n = self.n as u64;
		let mask = 2 * n - 1;
		let log_n = self.n.trailing_zeros();
		(0..self.n)
			.map(|j| {
				let rev = ((j as u64).reverse_bits() >> (64 - log_n)) as u64;
				let e = (gal * (2 * rev + 1)) & mask;
				(((e - 1) >> 1).reverse_bits() >> (64 - log_n)) as usize
			})
			.collect()
	}

	pub fn permute_ntt(&self, a: &Poly, index: &[usize], c: &mut Poly) {
		self.permute_ntt_lvl(self.max_level(), a, index, c)
	}

	pub fn permute_ntt_lvl(&self, level: usize, a: &Poly, index: &[usize], c: &mut Poly) {
		for i in 0..=level {
			let (src, dst) = (&a.coeffs[i], &mut c.coeffs[i]);
			for j in 0..self.n {
				dst[j] = src[index[j]];
			}
		}
	}

	pub fn copy(&self, a: &Poly, c: &mut Poly) {
		c.copy_from(a)
	}

	// In-place companions for destinations that alias an operand, which Rust
	// borrows cannot express through the three-argument forms.

	pub fn add_assign(&self, b: &Poly, c: &mut Poly) {
		self.add_assign_lvl(self.max_level(), b, c)
	}

	pub fn add_assign_lvl(&self, level: usize, b: &Poly, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			for (cj, bj) in c.coeffs[i].iter_mut().zip(&b.coeffs[i]) {
				*cj = m.add(*cj, *bj);
			}
		}
	}

	pub fn sub_assign(&self, b: &Poly, c: &mut Poly) {
		self.sub_assign_lvl(self.max_level(), b, c)
	}

	pub fn sub_assign_lvl(&self, level: usize, b: &Poly, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			for (cj, bj) in c.coeffs[i].iter_mut().zip(&b.coeffs[i]) {
				*cj = m.sub(*cj, *bj);
			}
		}
	}

	pub fn neg_inplace_lvl(&self, level: usize, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			for cj in c.coeffs[i].iter_mut() {
				*cj = m.neg(*cj);
			}
		}
	}

	pub fn reduce_inplace_lvl(&self, level: usize, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			for cj in c.coeffs[i].iter_mut() {
				*cj = m.reduce(*cj);
			}
		}
	}

	pub fn mform_inplace_lvl(&self, level: usize, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			for cj in c.coeffs[i].iter_mut() {
				*cj = m.mform(*cj);
			}
		}
	}

	pub fn add_scalar_bigint_assign_lvl(&self, level: usize, scalar: &BigUint, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			let s = bigint_mod_u64(scalar, m.modulus());
			for cj in c.coeffs[i].iter_mut() {
				*cj = m.add(*cj, s);
			}
		}
	}

	pub fn sub_scalar_bigint_assign_lvl(&self, level: usize, scalar: &BigUint, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			let s = bigint_mod_u64(scalar, m.modulus());
			for cj in c.coeffs[i].iter_mut() {
				*cj = m.sub(*cj, s);
			}
		}
	}

	pub fn mul_scalar_assign_lvl(&self, level: usize, scalar: u64, c: &mut Poly) {
		for i in 0..=level {
			let m = &self.moduli[i];
			let s = m.mform(m.reduce(scalar));
			for cj in c.coeffs[i].iter_mut() {
				*cj = m.mred(*cj, s);
			}
		}
	}

	pub fn ntt_inplace(&self, c: &mut Poly) {
		self.ntt_inplace_lvl(self.max_level(), c)
	}

	pub fn ntt_inplace_lvl(&self, level: usize, c: &mut Poly) {
		for i in 0..=level {
			self.ntt[i].forward(&self.moduli[i], &mut c.coeffs[i]);
		}
	}

	pub fn inv_ntt_inplace(&self, c: &mut Poly) {
		self.inv_ntt_inplace_lvl(self.max_level(), c)
	}

	pub fn inv_ntt_inplace_lvl(&self, level: usize, c: &mut Poly) {
		for i in 0..=level {
			self.ntt[i].inverse(&self.moduli[i], &mut c.coeffs[i]);
		}
	}

	/// Uniform element of R_Q: independent uniform residues per prime.
	pub fn sample_uniform<R: Rng>(&self, rng: &mut R, out: &mut Poly) {
		for (m, row) in self.moduli.iter().zip(out.coeffs.iter_mut()) {
			let dist = Uniform::new(0, m.modulus());
			for c in row.iter_mut() {
				*c = dist.sample(rng);
			}
		}
	}

	/// Small discrete Gaussian element, identical across the chain.
	pub fn sample_gaussian<R: Rng>(&self, sigma: f64, rng: &mut R, out: &mut Poly) {
		let normal = Normal::new(0.0, sigma).expect("sigma must be positive");
		let bound = (6.0 * sigma).ceil() as i64;
		for j in 0..self.n {
			let mut e = normal.sample(rng).round() as i64;
			e = e.clamp(-bound, bound);
			for (m, row) in self.moduli.iter().zip(out.coeffs.iter_mut()) {
				row[j] = if e < 0 {
					m.modulus() - (-e) as u64
				} else {
					e as u64
				};
			}
		}
	}

	/// Ternary element with coefficients in {-1, 0, 1}. With
	/// `hamming_weight` set, exactly that many coefficients are nonzero.
	pub fn sample_ternary<R: Rng>(&self, hamming_weight: Option<usize>, rng: &mut R, out: &mut Poly) {
		let mut signs = vec![0i8; self.n];
		match hamming_weight {
			Some(h) => {
				let h = h.min(self.n);
				let mut placed = 0;
				while placed < h {
					let j = rng.gen_range(0..self.n);
					if signs[j] == 0 {
						signs[j] = if rng.gen::<bool>() { 1 } else { -1 };
						placed += 1;
					}
				}
			}
			None => {
				for s in signs.iter_mut() {
					*s = rng.gen_range(-1i8..=1);
				}
			}
		}
		for (m, row) in self.moduli.iter().zip(out.coeffs.iter_mut()) {
			for (c, s) in row.iter_mut().zip(&signs) {
				*c = match s {
					1 => 1,
					-1 => m.modulus() - 1,
					_ => 0,
				};
			}
		}
	}

	/// CRT-reconstructs every coefficient of the active prefix into the
	/// integer range [0, Q).
	pub fn reconstruct(&self, level: usize, a: &Poly) -> Vec<BigUint> {
		let q = self.modulus_big_at(level);
		let mut lagrange = Vec::with_capacity(level + 1);
		for i in 0..=level {
			let qi = self.moduli[i].modulus();
			let q_over_qi = &q / qi;
			let inv = self.moduli[i].inv(bigint_mod_u64(&q_over_qi, qi));
			lagrange.push(q_over_qi * inv);
		}
		(0..self.n)
			.map(|j| {
				let mut acc = BigUint::zero();
				for i in 0..=level {
					acc += &lagrange[i] * a.coeffs[i][j];
				}
				acc % &q
			})
			.collect()
	}
}

pub(crate) fn bigint_mod_u64(a: &BigUint, q: u64) -> u64 {
	use num_traits::ToPrimitive;
	(a % q).to_u64().unwrap()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::modulus::generate_primes;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn test_ring() -> Ring {
		let primes = generate_primes(45, 32, 3, &[]).unwrap();
		Ring::new(32, &primes).unwrap()
	}

	#[test]
	fn add_sub_neg_are_consistent() {
		let ring = test_ring();
		let mut rng = StdRng::seed_from_u64(7);
		let mut a = ring.new_poly();
		let mut b = ring.new_poly();
		ring.sample_uniform(&mut rng, &mut a);
		ring.sample_uniform(&mut rng, &mut b);

		let mut sum = ring.new_poly();
		let mut back = ring.new_poly();
		ring.add(&a, &b, &mut sum);
		ring.sub(&sum, &b, &mut back);
		assert_eq!(back, a);

		let mut neg = ring.new_poly();
		let mut zero = ring.new_poly();
		ring.neg(&a, &mut neg);
		ring.add(&a, &neg, &mut zero);
		assert_eq!(zero, ring.new_poly());
	}

	#[test]
	fn montgomery_product_matches_plain() {
		let ring = test_ring();
		let mut rng = StdRng::seed_from_u64(8);
		let mut a = ring.new_poly();
		let mut b = ring.new_poly();
		ring.sample_uniform(&mut rng, &mut a);
		ring.sample_uniform(&mut rng, &mut b);

		let mut am = ring.new_poly();
		ring.mform(&a, &mut am);
		let mut c = ring.new_poly();
		ring.mul_coeffs_montgomery(&am, &b, &mut c);

		for i in 0..ring.moduli().len() {
			for j in 0..ring.degree() {
				assert_eq!(c.coeffs[i][j], ring.moduli()[i].mul(a.coeffs[i][j], b.coeffs[i][j]));
			}
		}
	}

	#[test]
	fn permute_then_inverse_is_identity() {
		let ring = test_ring();
		let mut rng = StdRng::seed_from_u64(9);
		let mut a = ring.new_poly();
		ring.sample_uniform(&mut rng, &mut a);

		let two_n = 2 * ring.degree() as u64;
		let gal = GALOIS_GEN;
		// 5 is a unit mod 2n; its order divides n/2.
		let mut inv = 1u64;
		let mut acc = gal;
		let mut e = 1;
		while acc != 1 {
			acc = acc * gal % two_n;
			e += 1;
		}
		for _ in 0..e - 1 {
			inv = inv * gal % two_n;
		}

		let mut p = ring.new_poly();
		let mut back = ring.new_poly();
		ring.permute(&a, gal, &mut p);
		ring.permute(&p, inv, &mut back);
		assert_eq!(back, a);
	}

	#[test]
	fn permute_ntt_matches_coefficient_permute() {
		let ring = test_ring();
		let mut rng = StdRng::seed_from_u64(10);
		let mut a = ring.new_poly();
		ring.sample_uniform(&mut rng, &mut a);
		let gal = 9; // 5^2 mod 64

		let mut expected = ring.new_poly();
		ring.permute(&a, gal, &mut expected);
		let mut expected_ntt = ring.new_poly();
		ring.ntt(&expected, &mut expected_ntt);

		let mut a_ntt = ring.new_poly();
		ring.ntt(&a, &mut a_ntt);
		let index = ring.permute_ntt_index(gal);
		let mut out = ring.new_poly();
		ring.permute_ntt(&a_ntt, &index, &mut out);

		assert_eq!(out, expected_ntt);
	}

	#[test]
	fn reconstruct_round_trips_small_values() {
		let ring = test_ring();
		let mut a = ring.new_poly();
		for (i, m) in ring.moduli().iter().enumerate() {
			for j in 0..ring.degree() {
				let v = 1000 * j as u64 + 17;
				a.coeffs[i][j] = m.reduce(v);
			}
		}
		let big = ring.reconstruct(ring.max_level(), &a);
		for (j, v) in big.iter().enumerate() {
			assert_eq!(*v, BigUint::from(1000 * j as u64 + 17));
		}
	}
}
