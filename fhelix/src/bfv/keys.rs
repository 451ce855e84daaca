use std::sync::Arc;

use fhelix_ring::{Poly, Ring};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::keys::{gen_switching_key, RelinearizationKey, RotationKeySet, SwitchingKey};
use crate::Result;

use super::element::{Ciphertext, Plaintext};
use super::parameters::BfvParameters;

/// A ternary BFV secret key.
pub struct SecretKey {
	pub(crate) params: Arc<BfvParameters>,
	pub(crate) signs: Vec<i8>,
}

impl SecretKey {
	/// Projects the key into a ring, in coefficient form.
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

/// Generates secret keys and the public evaluation material: switching keys,
/// relinearization keys and rotation key sets, all conforming to the gadget
/// layout the evaluator's key-switch kernel expects.
pub struct KeyGenerator {
	params: Arc<BfvParameters>,
	rng: StdRng,
}

impl KeyGenerator {
	pub fn new(params: &Arc<BfvParameters>) -> Self {
		KeyGenerator {
			params: params.clone(),
			rng: StdRng::from_entropy(),
		}
	}

	/// A generator with a fixed seed, for reproducible tests.
	pub fn from_seed(params: &Arc<BfvParameters>, seed: u64) -> Self {
		KeyGenerator {
			params: params.clone(),
			rng: StdRng::seed_from_u64(seed),
		}
	}

	pub fn gen_secret_key(&mut self) -> SecretKey {
		let mut tmp = self.params.ring_q.new_poly();
		self.params.ring_q.sample_ternary(None, &mut self.rng, &mut tmp);
		let signs = Self::signs_from_row(&tmp, self.params.ring_q.moduli()[0].modulus());
		SecretKey {
			params: self.params.clone(),
			signs,
		}
	}

	fn signs_from_row(p: &Poly, q0: u64) -> Vec<i8> {
		p.coeffs[0]
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
			.collect()
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

	/// A switching key re-encrypting ciphertexts under `from` to `to`.
	pub fn gen_switching_key(&mut self, from: &SecretKey, to: &SecretKey) -> SwitchingKey {
		let s_src = from.poly_ntt(&self.params.ring_qp);
		self.swk_from_source(&s_src, to)
	}

	/// Switching keys for every surplus degree up to `max_degree`.
	pub fn gen_relinearization_key(&mut self, sk: &SecretKey, max_degree: usize) -> RelinearizationKey {
		let ring_qp = self.params.ring_qp.clone();
		let s_ntt = sk.poly_ntt(&ring_qp);
		let s_mform = sk.poly_ntt_mform(&ring_qp);

		let mut keys = Vec::with_capacity(max_degree.saturating_sub(1));
		let mut power = s_ntt;
		for _ in 2..=max_degree {
			// power <- power * s, the next secret power in NTT form.
			let mut next = ring_qp.new_poly();
			ring_qp.mul_coeffs_montgomery(&s_mform, &power, &mut next);
			power = next;
			keys.push(self.swk_from_source(&power, sk));
		}
		RelinearizationKey { keys }
	}

	/// Column rotation keys for the requested left shifts, their mirrored
	/// right shifts, and optionally the row-swap key.
	pub fn gen_rotation_keys(
		&mut self, sk: &SecretKey, shifts: &[usize], include_row: bool,
	) -> RotationKeySet {
		let mut set = RotationKeySet::new();
		for &k in shifts {
			let gal = self.params.galois_element_for_column_rotation(k);
			set.left.insert(k, self.gen_permuted_key(sk, gal));
		}
		if include_row {
			set.row = Some(self.gen_permuted_key(sk, self.params.galois_element_row_swap()));
		}
		set
	}

	/// The full power-of-two rotation key set, both directions, plus the
	/// row swap: everything the pow2 decomposition of arbitrary shifts
	/// needs.
	pub fn gen_rotation_keys_pow2(&mut self, sk: &SecretKey) -> RotationKeySet {
		let mut set = RotationKeySet::new();
		let slots = self.params.n >> 1;
		let gen_inv = self.params.galois_generator_inverse();
		let mut i = 1;
		while i < slots {
			let gal_l = self.params.galois_element_for_column_rotation(i);
			let gal_r = super::parameters::pow_mod_u64(gen_inv, i as u64, self.params.two_n());
			set.left.insert(i, self.gen_permuted_key(sk, gal_l));
			set.right.insert(i, self.gen_permuted_key(sk, gal_r));
			i <<= 1;
		}
		set.row = Some(self.gen_permuted_key(sk, self.params.galois_element_row_swap()));
		set
	}

	/// Key switching phi_gal(s) back to s.
	fn gen_permuted_key(&mut self, sk: &SecretKey, gal: u64) -> SwitchingKey {
		let ring_qp = &self.params.ring_qp;
		let s = sk.poly_coeff(ring_qp);
		let mut permuted = ring_qp.new_poly();
		ring_qp.permute(&s, gal, &mut permuted);
		ring_qp.ntt_inplace(&mut permuted);
		self.swk_from_source(&permuted, sk)
	}
}

/// Symmetric BFV encryption.
pub struct Encryptor {
	params: Arc<BfvParameters>,
	s_ntt_mform: Poly,
}

impl Encryptor {
	pub fn new(params: &Arc<BfvParameters>, sk: &SecretKey) -> Self {
		Encryptor {
			params: params.clone(),
			s_ntt_mform: sk.poly_ntt_mform(&params.ring_q),
		}
	}

	pub fn encrypt(&self, pt: &Plaintext) -> Result<Ciphertext> {
		let ring_q = &self.params.ring_q;
		let mut rng = rand::thread_rng();

		// c1 uniform; c0 = -c1 * s + e + m, all at rest in coefficient form.
		let mut a_ntt = ring_q.new_poly();
		ring_q.sample_uniform(&mut rng, &mut a_ntt);

		let mut c0 = ring_q.new_poly();
		ring_q.mul_coeffs_montgomery(&self.s_ntt_mform, &a_ntt, &mut c0);
		ring_q.inv_ntt_inplace(&mut c0);
		ring_q.neg_inplace_lvl(ring_q.max_level(), &mut c0);

		let mut e = ring_q.new_poly();
		ring_q.sample_gaussian(self.params.sigma, &mut rng, &mut e);
		ring_q.add_assign(&e, &mut c0);
		ring_q.add_assign(pt.poly(), &mut c0);

		let mut c1 = ring_q.new_poly();
		ring_q.inv_ntt(&a_ntt, &mut c1);

		Ok(Ciphertext {
			params: self.params.clone(),
			value: vec![c0, c1],
		})
	}
}

/// Symmetric BFV decryption, for ciphertexts of any degree.
pub struct Decryptor {
	params: Arc<BfvParameters>,
	s_ntt_mform: Poly,
}

impl Decryptor {
	pub fn new(params: &Arc<BfvParameters>, sk: &SecretKey) -> Self {
		Decryptor {
			params: params.clone(),
			s_ntt_mform: sk.poly_ntt_mform(&params.ring_q),
		}
	}

	/// Evaluates c_0 + c_1 s + ... + c_d s^d by Horner's rule in the NTT
	/// domain and returns the noisy scaled plaintext.
	pub fn decrypt(&self, ct: &Ciphertext) -> Plaintext {
		let ring_q = &self.params.ring_q;
		let d = ct.degree();

		let mut acc = ring_q.new_poly();
		ring_q.ntt(&ct.value[d], &mut acc);
		let mut prod = ring_q.new_poly();
		let mut term = ring_q.new_poly();
		for k in (0..d).rev() {
			ring_q.mul_coeffs_montgomery(&self.s_ntt_mform, &acc, &mut prod);
			ring_q.ntt(&ct.value[k], &mut term);
			ring_q.add(&prod, &term, &mut acc);
		}
		ring_q.inv_ntt_inplace(&mut acc);
		Plaintext::from_poly(&self.params, acc)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bfv::encoder::BatchEncoder;
	use crate::bfv::parameters::BfvParametersBuilder;

	#[test]
	fn encrypt_decrypt_round_trip() {
		let params = BfvParametersBuilder::new()
			.log_n(6)
			.plaintext_modulus(65537)
			.moduli_sizes(&[50, 50])
			.build()
			.unwrap();
		let mut keygen = KeyGenerator::from_seed(&params, 1);
		let sk = keygen.gen_secret_key();
		let encoder = BatchEncoder::new(&params).unwrap();
		let encryptor = Encryptor::new(&params, &sk);
		let decryptor = Decryptor::new(&params, &sk);

		let values: Vec<u64> = (0..64u64).map(|i| 97 * i % 65537).collect();
		let pt = encoder.encode(&values).unwrap();
		let ct = encryptor.encrypt(&pt).unwrap();
		assert_eq!(encoder.decode(&decryptor.decrypt(&ct)).unwrap(), values);
	}
}
