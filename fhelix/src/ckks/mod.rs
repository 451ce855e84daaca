//! The CKKS scheme: approximate fixed-point arithmetic over packed complex
//! slots, with rescaling, rotations and bootstrapping.

pub mod bootstrap;
mod chebyshev;
mod ciphertext;
mod encoder;
mod evaluator;
mod keys;
mod parameters;

pub use chebyshev::{approximate, ChebyshevInterpolation};
pub use ciphertext::{Ciphertext, Plaintext};
pub use encoder::{Encoder, PtDiagMatrix};
pub use evaluator::Evaluator;
pub use keys::{Decryptor, Encryptor, KeyGenerator, SecretKey};
pub use parameters::{CkksParameters, CkksParametersBuilder};

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use num_complex::Complex64;

	use super::*;

	struct Setup {
		params: Arc<CkksParameters>,
		sk: SecretKey,
		keygen: KeyGenerator,
		encoder: Encoder,
		encryptor: Encryptor,
		decryptor: Decryptor,
		evaluator: Evaluator,
	}

	fn setup(log_n: usize, log_slots: usize, sizes: &[usize], scale: f64) -> Setup {
		let params = CkksParametersBuilder::new()
			.log_n(log_n)
			.log_slots(log_slots)
			.moduli_sizes(sizes)
			.default_scale(scale)
			.build()
			.unwrap();
		let mut keygen = KeyGenerator::from_seed(&params, 0xcafe);
		let sk = keygen.gen_secret_key();
		Setup {
			encoder: Encoder::new(&params),
			encryptor: Encryptor::new(&params, &sk),
			decryptor: Decryptor::new(&params, &sk),
			evaluator: Evaluator::new(&params).unwrap(),
			keygen,
			sk,
			params,
		}
	}

	fn encrypt_f64(s: &Setup, values: &[f64]) -> Ciphertext {
		let pt = s
			.encoder
			.encode_f64(values, s.params.max_level(), s.params.default_scale())
			.unwrap();
		s.encryptor.encrypt(&pt).unwrap()
	}

	fn decode(s: &Setup, ct: &Ciphertext) -> Vec<Complex64> {
		s.encoder.decode(&s.decryptor.decrypt(ct))
	}

	#[test]
	fn add_sub_neg_homomorphism() {
		let s = setup(6, 5, &[50, 40], (1u64 << 35) as f64);
		let a: Vec<f64> = (0..32).map(|i| i as f64 / 10.0).collect();
		let b: Vec<f64> = (0..32).map(|i| (32 - i) as f64 / 5.0).collect();
		let ct_a = encrypt_f64(&s, &a);
		let ct_b = encrypt_f64(&s, &b);

		let sum = s.evaluator.add(&ct_a, &ct_b).unwrap();
		let diff = s.evaluator.sub(&ct_a, &ct_b).unwrap();
		let neg = s.evaluator.neg(&ct_a).unwrap();
		let ds = decode(&s, &sum);
		let dd = decode(&s, &diff);
		let dn = decode(&s, &neg);
		for i in 0..32 {
			assert!((ds[i].re - (a[i] + b[i])).abs() < 1e-5);
			assert!((dd[i].re - (a[i] - b[i])).abs() < 1e-5);
			assert!((dn[i].re + a[i]).abs() < 1e-5);
		}
	}

	#[test]
	fn mul_relin_rescale_homomorphism() {
		let mut s = setup(6, 5, &[50, 40, 40], (1u64 << 35) as f64);
		let rlk = s.keygen.gen_relinearization_key(&s.sk);
		let a: Vec<f64> = (0..32).map(|i| (i as f64 - 16.0) / 8.0).collect();
		let b: Vec<f64> = (0..32).map(|i| (i as f64) / 16.0).collect();
		let ct_a = encrypt_f64(&s, &a);
		let ct_b = encrypt_f64(&s, &b);

		let mut prod = s.evaluator.mul_relin(&ct_a, &ct_b, &rlk).unwrap();
		s.evaluator.rescale_inplace(&mut prod).unwrap();
		assert_eq!(prod.level(), s.params.max_level() - 1);

		let d = decode(&s, &prod);
		for i in 0..32 {
			assert!((d[i].re - a[i] * b[i]).abs() < 1e-3, "{} vs {}", d[i].re, a[i] * b[i]);
		}
	}

	#[test]
	fn mul_plain_and_const() {
		let mut s = setup(6, 5, &[50, 40, 40], (1u64 << 35) as f64);
		let a: Vec<f64> = (0..32).map(|i| 1.0 + i as f64 / 32.0).collect();
		let ct = encrypt_f64(&s, &a);

		let pt = s
			.encoder
			.encode_f64(&vec![0.5; 32], ct.level(), s.params.default_scale())
			.unwrap();
		let mut prod = s.evaluator.mul_plain(&ct, &pt).unwrap();
		s.evaluator.rescale_inplace(&mut prod).unwrap();
		let d = decode(&s, &prod);
		for i in 0..32 {
			assert!((d[i].re - a[i] / 2.0).abs() < 1e-4);
		}

		let mut scaled = s.evaluator.mult_by_const(&ct, Complex64::new(3.0, 0.0)).unwrap();
		s.evaluator.rescale_inplace(&mut scaled).unwrap();
		let d = decode(&s, &scaled);
		for i in 0..32 {
			assert!((d[i].re - 3.0 * a[i]).abs() < 1e-4);
		}

		let shifted = s.evaluator.add_const(&ct, Complex64::new(0.0, 2.0)).unwrap();
		let d = decode(&s, &shifted);
		for i in 0..32 {
			assert!((d[i].re - a[i]).abs() < 1e-4);
			assert!((d[i].im - 2.0).abs() < 1e-4);
		}

		let scaled = s.evaluator.mul_scalar(&ct, 7).unwrap();
		let d = decode(&s, &scaled);
		for i in 0..32 {
			assert!((d[i].re - 7.0 * a[i]).abs() < 1e-3);
		}

		let doubled = s.evaluator.add_no_mod(&ct, &ct).unwrap();
		let reduced = s.evaluator.reduce(&doubled).unwrap();
		let d = decode(&s, &reduced);
		for i in 0..32 {
			assert!((d[i].re - 2.0 * a[i]).abs() < 1e-4);
		}
	}

	#[test]
	fn mult_by_i_rotates_phase() {
		let s = setup(6, 5, &[50, 40], (1u64 << 35) as f64);
		let a: Vec<f64> = (0..32).map(|i| i as f64 / 7.0).collect();
		let ct = encrypt_f64(&s, &a);
		let rotated = s.evaluator.mult_by_i(&ct).unwrap();
		let d = decode(&s, &rotated);
		for i in 0..32 {
			assert!(d[i].re.abs() < 1e-4);
			assert!((d[i].im - a[i]).abs() < 1e-4);
		}
	}

	#[test]
	fn rotation_and_conjugation() {
		let mut s = setup(6, 5, &[50, 40], (1u64 << 35) as f64);
		let keys = s.keygen.gen_rotation_keys(&s.sk, &[3], true);
		let a: Vec<f64> = (0..32).map(|i| i as f64).collect();
		let ct = encrypt_f64(&s, &a);

		let rot = s.evaluator.rotate(&ct, 3, &keys).unwrap();
		let d = decode(&s, &rot);
		for i in 0..32 {
			assert!((d[i].re - a[(i + 3) % 32]).abs() < 1e-4);
		}

		let conj = s.evaluator.conjugate(&ct, &keys).unwrap();
		let d = decode(&s, &conj);
		for i in 0..32 {
			assert!((d[i].re - a[i]).abs() < 1e-4);
			assert!(d[i].im.abs() < 1e-4);
		}
	}

	#[test]
	fn rotation_composition_over_pow2_keys() {
		let mut s = setup(6, 5, &[50, 40], (1u64 << 35) as f64);
		let keys = s.keygen.gen_rotation_keys_pow2(&s.sk);
		let a: Vec<f64> = (0..32).map(|i| (i * i) as f64 / 100.0).collect();
		let ct = encrypt_f64(&s, &a);

		let r5 = s.evaluator.rotate(&ct, 5, &keys).unwrap();
		let d = decode(&s, &r5);
		for i in 0..32 {
			assert!((d[i].re - a[(i + 5) % 32]).abs() < 1e-4);
		}
	}

	#[test]
	fn inner_sum_replicates_total() {
		// slots = 8, m = [1..8], inner sum replicates 36 everywhere.
		let mut s = setup(6, 3, &[50, 40], (1u64 << 35) as f64);
		let keys = s.keygen.gen_rotation_keys(&s.sk, &[1, 2, 4], false);
		let a: Vec<f64> = (1..=8).map(|i| i as f64).collect();
		let ct = encrypt_f64(&s, &a);
		let summed = s.evaluator.inner_sum(&ct, &keys).unwrap();
		let d = decode(&s, &summed);
		for i in 0..8 {
			assert!((d[i].re - 36.0).abs() < 1e-3, "slot {i}: {}", d[i].re);
		}
	}

	#[test]
	fn diag_matrix_product_applies_matrix() {
		// A cyclic two-diagonal matrix: out_i = v_i + 2 * v_{i+1}.
		use std::collections::HashMap;
		let mut s = setup(6, 4, &[50, 40, 40], (1u64 << 35) as f64);
		let slots = 16usize;
		let mut diags = HashMap::new();
		diags.insert(0usize, vec![Complex64::new(1.0, 0.0); slots]);
		diags.insert(1usize, vec![Complex64::new(2.0, 0.0); slots]);
		let mat = s
			.encoder
			.encode_diag_matrix(s.params.max_level(), &diags, (1u64 << 40) as f64, 4.0, 4)
			.unwrap();

		let mut shifts = mat.rotations();
		shifts.push(0);
		let keys = s.keygen.gen_rotation_keys(&s.sk, &shifts, false);

		let a: Vec<f64> = (0..slots).map(|i| i as f64 / 4.0).collect();
		let ct = encrypt_f64(&s, &a);
		let mut out = s.evaluator.multiply_by_diag_matrix(&ct, &mat, &keys).unwrap();
		s.evaluator.rescale_inplace(&mut out).unwrap();

		let d = decode(&s, &out);
		for i in 0..slots {
			let expected = a[i] + 2.0 * a[(i + 1) % slots];
			assert!((d[i].re - expected).abs() < 1e-3, "slot {i}: {} vs {expected}", d[i].re);
		}
	}

	#[test]
	fn chebyshev_sigmoid_evaluation() {
		// Degree-32 Chebyshev interpolant of the sigmoid over [-8, 8] on a
		// fresh ciphertext, at a unit-test ring size.
		let mut s = setup(8, 7, &[55, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45], (1u64 << 45) as f64);
		let rlk = s.keygen.gen_relinearization_key(&s.sk);
		let cheby = approximate(|x| 1.0 / (1.0 + (-x).exp()), -8.0, 8.0, 32);

		let a: Vec<f64> = (0..128).map(|i| -8.0 + 16.0 * i as f64 / 127.0).collect();
		let ct = encrypt_f64(&s, &a);
		let evaluated = s.evaluator.evaluate_chebyshev(&ct, &cheby, &rlk).unwrap();

		let d = decode(&s, &evaluated);
		for i in 0..128 {
			// Compare against the interpolant itself: the evaluator must
			// reproduce it to the stated precision, while the interpolant
			// tracks the true sigmoid only as far as its degree allows.
			let expected = cheby.eval(a[i]);
			let err = (d[i].re - expected).abs();
			assert!(err < 1.0 / (1u64 << 20) as f64, "slot {i}: err {err}");
			assert!((d[i].re - 1.0 / (1.0 + (-a[i]).exp())).abs() < 1e-4);
		}
	}

	#[test]
	fn shallow_copies_agree() {
		let mut s = setup(6, 5, &[50, 40, 40], (1u64 << 35) as f64);
		let rlk = s.keygen.gen_relinearization_key(&s.sk);
		let a: Vec<f64> = (0..32).map(|i| i as f64 / 31.0).collect();
		let ct = encrypt_f64(&s, &a);

		let mut copy = s.evaluator.shallow_copy();
		let r1 = s.evaluator.mul_relin(&ct, &ct, &rlk).unwrap();
		let r2 = copy.mul_relin(&ct, &ct, &rlk).unwrap();
		for (p, q) in r1.value.iter().zip(&r2.value) {
			assert_eq!(p, q);
		}
	}
}
