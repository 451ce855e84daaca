use std::sync::Arc;

use fhelix_ring::{Poly, Ring};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::bfv::pow_mod_u64;
use crate::keys::{gen_switching_key, RelinearizationKey, RotationKeySet, SwitchingKey};
use crate::Result;

use super::ciphertext::{Ciphertext, Plaintext};
use super::parameters::CkksParameters;

/// A ternary CKKS secret key; sparse keys carry a fixed Hamming weight.
pub struct SecretKey {
	pub(crate) params: Arc<CkksParameters>,
	pub(crate) signs: Vec<i8>,
}

impl SecretKey {
	pub(crate) fn poly_coeff(&self, ring: &Ring) -> Poly {
		let mut p = ring.new_poly();
		for (j, m) in ring.moduli().iter().enumerate() {
			for (k, s) in self.signs.iter().enumerate() {
				p.coeffs[j][k] = match s {
					1 => 1,
					-1 => m.modulus() - 1,
					_ => 0,
				};
			}
		}
		p
	}

	pub(crate) fn poly_ntt(&self, ring: &Ring) -> Poly {
		let mut p = self.poly_coeff(ring);
		ring.ntt_inplace(&mut p);
		p
	}

	pub(crate) fn poly_ntt_mform(&self, ring: &Ring) -> Poly {
		let mut p = self.poly_ntt(ring);
		ring.mform_inplace_lvl(ring.max_level(), &mut p);
		p
	}
}

/// Generates CKKS key material.
pub struct KeyGenerator {
	params: Arc<CkksParameters>,
	rng: StdRng,
}

impl KeyGenerator {
	pub fn new(params: &Arc<CkksParameters>) -> Self {
		KeyGenerator {
			params: params.clone(),
			rng: StdRng::from_entropy(),
		}
	}

	pub fn from_seed(params: &Arc<CkksParameters>, seed: u64) -> Self {
		KeyGenerator {
			params: params.clone(),
			rng: StdRng::seed_from_u64(seed),
		}
	}

	pub fn gen_secret_key(&mut self) -> SecretKey {
		self.gen_secret_key_with_weight(None)
	}

	/// A sparse ternary secret with exactly `weight` nonzero coefficients.
	pub fn gen_secret_key_sparse(&mut self, weight: usize) -> SecretKey {
		self.gen_secret_key_with_weight(Some(weight))
	}

	fn gen_secret_key_with_weight(&mut self, weight: Option<usize>) -> SecretKey {
		let ring_q = &self.params.ring_q;
		let mut tmp = ring_q.new_poly();
		ring_q.sample_ternary(weight, &mut self.rng, &mut tmp);
		let q0 = ring_q.moduli()[0].modulus();
		let signs = tmp.coeffs[0]
			.iter()
			.map(|&c| {
				if c == 0 {
					0
				} else if c == 1 {
					1
				} else {
					debug_assert_eq!(c, q0 - 1);
					-1
				}
			})
			.collect();
		SecretKey {
			params: self.params.clone(),
			signs,
		}
	}

	fn swk_from_source(&mut self, s_src_ntt: &Poly, sk_dst: &SecretKey) -> SwitchingKey {
		let params = &self.params;
		let s_dst = sk_dst.poly_ntt_mform(&params.ring_qp);
		gen_switching_key(
			&params.ring_qp,
			params.moduli_q.len(),
			params.alpha(),
			params.sigma,
			s_src_ntt,
			&s_dst,
			&params.p_mod_q,
			&mut self.rng,
		)
	}

	pub fn gen_switching_key(&mut self, from: &SecretKey, to: &SecretKey) -> SwitchingKey {
		let s_src = from.poly_ntt(&self.params.ring_qp);
		self.swk_from_source(&s_src, to)
	}

	pub fn gen_relinearization_key(&mut self, sk: &SecretKey) -> RelinearizationKey {
		let ring_qp = &self.params.ring_qp;
		let s_mform = sk.poly_ntt_mform(ring_qp);
		let s_ntt = sk.poly_ntt(ring_qp);
		let mut square = ring_qp.new_poly();
		ring_qp.mul_coeffs_montgomery(&s_mform, &s_ntt, &mut square);
		RelinearizationKey {
			keys: vec![self.swk_from_source(&square, sk)],
		}
	}

	/// Rotation keys for the given left shifts, plus the conjugation key
	/// when `include_conjugate` is set.
	pub fn gen_rotation_keys(
		&mut self, sk: &SecretKey, shifts: &[usize], include_conjugate: bool,
	) -> RotationKeySet {
		let mut set = RotationKeySet::new();
		for &k in shifts {
			if k == 0 {
				continue;
			}
			let gal = self.params.galois_element_for_column_rotation(k);
			set.left.insert(k, self.gen_permuted_key(sk, gal));
		}
		if include_conjugate {
			set.row = Some(self.gen_permuted_key(sk, self.params.galois_element_conjugate()));
		}
		set
	}

	/// Adds further left shifts to an existing key set.
	pub fn extend_rotation_keys(&mut self, sk: &SecretKey, shifts: &[usize], set: &mut RotationKeySet) {
		for &k in shifts {
			if k == 0 || set.left.contains_key(&k) {
				continue;
			}
			let gal = self.params.galois_element_for_column_rotation(k);
			set.left.insert(k, self.gen_permuted_key(sk, gal));
		}
	}

	pub fn gen_rotation_keys_pow2(&mut self, sk: &SecretKey) -> RotationKeySet {
		let mut set = RotationKeySet::new();
		let slots = self.params.slots();
		let gen_inv = self.params.galois_generator_inverse();
		let mut i = 1;
		while i < slots {
			let gal_l = self.params.galois_element_for_column_rotation(i);
			let gal_r = pow_mod_u64(gen_inv, i as u64, self.params.two_n());
			set.left.insert(i, self.gen_permuted_key(sk, gal_l));
			set.right.insert(i, self.gen_permuted_key(sk, gal_r));
			i <<= 1;
		}
		set.row = Some(self.gen_permuted_key(sk, self.params.galois_element_conjugate()));
		set
	}

	fn gen_permuted_key(&mut self, sk: &SecretKey, gal: u64) -> SwitchingKey {
		let ring_qp = &self.params.ring_qp;
		let s = sk.poly_coeff(ring_qp);
		let mut permuted = ring_qp.new_poly();
		ring_qp.permute(&s, gal, &mut permuted);
		ring_qp.ntt_inplace(&mut permuted);
		self.swk_from_source(&permuted, sk)
	}
}

/// Symmetric CKKS encryption.
pub struct Encryptor {
	params: Arc<CkksParameters>,
	s_ntt_mform: Poly,
}

impl Encryptor {
	pub fn new(params: &Arc<CkksParameters>, sk: &SecretKey) -> Self {
		Encryptor {
			params: params.clone(),
			s_ntt_mform: sk.poly_ntt_mform(&params.ring_q),
		}
	}

	pub fn encrypt(&self, pt: &Plaintext) -> Result<Ciphertext> {
		let ring_q = &self.params.ring_q;
		let level = pt.level;
		let n = self.params.n;
		let mut rng = rand::thread_rng();

		let mut a = Poly::new(level + 1, n);
		let mut full = ring_q.new_poly();
		ring_q.sample_uniform(&mut rng, &mut full);
		a.copy_from(&full);

		// c0 = -a * s + e + m, everything NTT-resident.
		let mut c0 = Poly::new(level + 1, n);
		ring_q.mul_coeffs_montgomery_lvl(level, &self.s_ntt_mform, &a, &mut c0);
		ring_q.neg_inplace_lvl(level, &mut c0);

		ring_q.sample_gaussian(self.params.sigma, &mut rng, &mut full);
		let mut e = Poly::new(level + 1, n);
		e.copy_from(&full);
		ring_q.ntt_inplace_lvl(level, &mut e);
		ring_q.add_assign_lvl(level, &e, &mut c0);
		ring_q.add_assign_lvl(level, &pt.poly, &mut c0);

		Ok(Ciphertext {
			params: self.params.clone(),
			value: vec![c0, a],
			scale: pt.scale,
			level,
		})
	}
}

/// Symmetric CKKS decryption.
pub struct Decryptor {
	params: Arc<CkksParameters>,
	s_ntt_mform: Poly,
}

impl Decryptor {
	pub fn new(params: &Arc<CkksParameters>, sk: &SecretKey) -> Self {
		Decryptor {
			params: params.clone(),
			s_ntt_mform: sk.poly_ntt_mform(&params.ring_q),
		}
	}

	pub fn decrypt(&self, ct: &Ciphertext) -> Plaintext {
		let ring_q = &self.params.ring_q;
		let level = ct.level;
		let d = ct.degree();
		let n = self.params.n;

		let mut acc = Poly::new(level + 1, n);
		acc.copy_from(&ct.value[d]);
		let mut prod = Poly::new(level + 1, n);
		for k in (0..d).rev() {
			ring_q.mul_coeffs_montgomery_lvl(level, &self.s_ntt_mform, &acc, &mut prod);
			ring_q.add_lvl(level, &prod, &ct.value[k], &mut acc);
		}

		Plaintext {
			params: self.params.clone(),
			poly: acc,
			scale: ct.scale,
			level,
		}
	}
}
