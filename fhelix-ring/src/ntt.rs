use crate::modulus::Modulus;
use crate::{Error, Result};

/// Precomputed tables for the negacyclic NTT of degree n modulo one prime.
///
/// Powers of the primitive 2n-th root psi are stored in bit-reversed order
/// and in Montgomery form, so each butterfly costs one Montgomery product.
#[derive(Debug, Clone)]
pub struct NttTables {
	/// psi^brv(i) * 2^64 mod q.
	psi: Vec<u64>,
	/// psi^-brv(i) * 2^64 mod q.
	psi_inv: Vec<u64>,
	/// n^-1 * 2^64 mod q, folded into the last inverse stage.
	n_inv: u64,
}

impl NttTables {
	/// Builds tables for degree `n` (a power of two) modulo `m`, which must
	/// satisfy q = 1 mod 2n.
	pub fn new(m: &Modulus, n: usize) -> Result<Self> {
		let q = m.modulus();
		if (q - 1) % (2 * n as u64) != 0 {
			return Err(Error::NttUnsupported(q, n));
		}

		let psi = find_primitive_root(m, n)?;
		let psi_inv = m.inv(psi);
		let log_n = n.trailing_zeros();

		let mut fwd = vec![0u64; n];
		let mut inv = vec![0u64; n];
		let mut pow_f = 1u64;
		let mut pow_i = 1u64;
		for i in 0..n {
			let j = (i as u64).reverse_bits() >> (64 - log_n);
			fwd[j as usize] = m.mform(pow_f);
			inv[j as usize] = m.mform(pow_i);
			pow_f = m.mul(pow_f, psi);
			pow_i = m.mul(pow_i, psi_inv);
		}

		Ok(NttTables {
			psi: fwd,
			psi_inv: inv,
			n_inv: m.mform(m.inv(n as u64)),
		})
	}

	/// In-place forward negacyclic NTT (Cooley-Tukey butterflies, standard
	/// ordering in, bit-reversed ordering out).
	pub fn forward(&self, m: &Modulus, a: &mut [u64]) {
		let n = a.len();
		let mut t = n;
		let mut groups = 1;
		while groups < n {
			t >>= 1;
			for i in 0..groups {
				let s = self.psi[groups + i];
				let j1 = 2 * i * t;
				for j in j1..j1 + t {
					let u = a[j];
					let v = m.mred(a[j + t], s);
					a[j] = m.add(u, v);
					a[j + t] = m.sub(u, v);
				}
			}
			groups <<= 1;
		}
	}

	/// In-place inverse negacyclic NTT (Gentleman-Sande butterflies), with
	/// the n^-1 normalization folded in.
	pub fn inverse(&self, m: &Modulus, a: &mut [u64]) {
		let n = a.len();
		let mut t = 1;
		let mut groups = n >> 1;
		while groups >= 1 {
			let mut j1 = 0;
			for i in 0..groups {
				let s = self.psi_inv[groups + i];
				for j in j1..j1 + t {
					let u = a[j];
					let v = a[j + t];
					a[j] = m.add(u, v);
					a[j + t] = m.mred(m.sub(u, v), s);
				}
				j1 += 2 * t;
			}
			t <<= 1;
			groups >>= 1;
		}
		for x in a.iter_mut() {
			*x = m.mred(*x, self.n_inv);
		}
	}
}

/// Finds a primitive 2n-th root of unity: psi with psi^n = -1.
fn find_primitive_root(m: &Modulus, n: usize) -> Result<u64> {
	let q = m.modulus();
	let exp = (q - 1) / (2 * n as u64);
	for candidate in 2..q {
		let psi = m.pow(candidate, exp);
		if m.pow(psi, n as u64) == q - 1 {
			return Ok(psi);
		}
	}
	Err(Error::NttUnsupported(q, n))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::modulus::generate_primes;

	fn setup(n: usize) -> (Modulus, NttTables) {
		let q = generate_primes(50, n, 1, &[]).unwrap()[0];
		let m = Modulus::new(q).unwrap();
		let t = NttTables::new(&m, n).unwrap();
		(m, t)
	}

	#[test]
	fn round_trip() {
		let n = 64;
		let (m, tables) = setup(n);
		let original: Vec<u64> = (0..n as u64).map(|i| i * i + 7).collect();
		let mut a = original.clone();
		tables.forward(&m, &mut a);
		assert_ne!(a, original);
		tables.inverse(&m, &mut a);
		assert_eq!(a, original);
	}

	#[test]
	fn multiplication_is_negacyclic() {
		// X^(n-1) * X = X^n = -1 in the negacyclic ring.
		let n = 32;
		let (m, tables) = setup(n);
		let mut a = vec![0u64; n];
		let mut b = vec![0u64; n];
		a[n - 1] = 1;
		b[1] = 1;
		tables.forward(&m, &mut a);
		tables.forward(&m, &mut b);
		let mut c: Vec<u64> = a.iter().zip(&b).map(|(x, y)| m.mul(*x, *y)).collect();
		tables.inverse(&m, &mut c);
		let mut expected = vec![0u64; n];
		expected[0] = m.modulus() - 1;
		assert_eq!(c, expected);
	}

	#[test]
	fn matches_schoolbook_product() {
		let n = 16;
		let (m, tables) = setup(n);
		let a: Vec<u64> = (0..n as u64).map(|i| i + 1).collect();
		let b: Vec<u64> = (0..n as u64).map(|i| 3 * i + 2).collect();

		let mut expected = vec![0u64; n];
		for i in 0..n {
			for j in 0..n {
				let p = m.mul(a[i], b[j]);
				if i + j < n {
					expected[i + j] = m.add(expected[i + j], p);
				} else {
					expected[i + j - n] = m.sub(expected[i + j - n], p);
				}
			}
		}

		let mut fa = a.clone();
		let mut fb = b.clone();
		tables.forward(&m, &mut fa);
		tables.forward(&m, &mut fb);
		let mut c: Vec<u64> = fa.iter().zip(&fb).map(|(x, y)| m.mul(*x, *y)).collect();
		tables.inverse(&m, &mut c);
		assert_eq!(c, expected);
	}
}
