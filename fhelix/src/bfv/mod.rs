//! The BFV scheme: exact integer arithmetic modulo a plaintext modulus t,
//! packed into SIMD slots.

mod element;
mod encoder;
mod evaluator;
mod keys;
mod parameters;

pub use element::{Ciphertext, Operand, Plaintext};
pub use encoder::BatchEncoder;
pub use evaluator::Evaluator;
pub use keys::{Decryptor, Encryptor, KeyGenerator, SecretKey};
pub use parameters::{BfvParameters, BfvParametersBuilder, ScaleRoundPolicy};

pub(crate) use parameters::{generate_chain, pow_mod_u64};

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::serialization::{FromBytes, ToBytes};

	struct Setup {
		params: Arc<BfvParameters>,
		sk: SecretKey,
		keygen: KeyGenerator,
		encoder: BatchEncoder,
		encryptor: Encryptor,
		decryptor: Decryptor,
		evaluator: Evaluator,
	}

	fn setup(log_n: usize, moduli_sizes: &[usize]) -> Setup {
		let params = BfvParametersBuilder::new()
			.log_n(log_n)
			.plaintext_modulus(65537)
			.moduli_sizes(moduli_sizes)
			.build()
			.unwrap();
		let mut keygen = KeyGenerator::from_seed(&params, 0xfe11);
		let sk = keygen.gen_secret_key();
		Setup {
			encoder: BatchEncoder::new(&params).unwrap(),
			encryptor: Encryptor::new(&params, &sk),
			decryptor: Decryptor::new(&params, &sk),
			evaluator: Evaluator::new(&params).unwrap(),
			keygen,
			sk,
			params,
		}
	}

	fn decode(s: &Setup, ct: &Ciphertext) -> Vec<u64> {
		s.encoder.decode(&s.decryptor.decrypt(ct)).unwrap()
	}

	#[test]
	fn add_sub_neg_homomorphism() {
		let s = setup(6, &[50, 50]);
		let t = s.params.plaintext_modulus();
		let a: Vec<u64> = (0..64u64).map(|i| 3 * i + 1).collect();
		let b: Vec<u64> = (0..64u64).map(|i| 65_000 + i).collect();

		let ct_a = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let ct_b = s.encryptor.encrypt(&s.encoder.encode(&b).unwrap()).unwrap();

		let sum = s.evaluator.add(&ct_a, &ct_b).unwrap();
		let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + y) % t).collect();
		assert_eq!(decode(&s, &sum), expected);

		let diff = s.evaluator.sub(&ct_a, &ct_b).unwrap();
		let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + t - y) % t).collect();
		assert_eq!(decode(&s, &diff), expected);

		let neg = s.evaluator.neg(&ct_a).unwrap();
		let expected: Vec<u64> = a.iter().map(|x| (t - x) % t).collect();
		assert_eq!(decode(&s, &neg), expected);
	}

	#[test]
	fn add_accepts_plaintext_operand() {
		let s = setup(6, &[50, 50]);
		let a: Vec<u64> = (0..64u64).collect();
		let b: Vec<u64> = (0..64u64).map(|i| 10 * i).collect();

		let ct_a = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let pt_b = s.encoder.encode(&b).unwrap();

		let sum = s.evaluator.add(&ct_a, &pt_b).unwrap();
		let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + y) % 65537).collect();
		assert_eq!(decode(&s, &sum), expected);

		assert!(matches!(
			s.evaluator.add(&pt_b, &pt_b),
			Err(crate::Error::PlaintextOnlyOperands)
		));
	}

	#[test]
	fn mul_scalar_homomorphism() {
		let s = setup(6, &[50, 50]);
		let a: Vec<u64> = (0..64u64).map(|i| i + 5).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let scaled = s.evaluator.mul_scalar(&ct, 1234).unwrap();
		let expected: Vec<u64> = a.iter().map(|x| x * 1234 % 65537).collect();
		assert_eq!(decode(&s, &scaled), expected);
	}

	#[test]
	fn add_at_production_dimensions() {
		// t = 65537, n = 4096, [1,2,3,4,..] + [10,20,30,40,..].
		let s = setup(12, &[54, 54, 54]);
		let m1 = [1u64, 2, 3, 4];
		let m2 = [10u64, 20, 30, 40];
		let ct1 = s.encryptor.encrypt(&s.encoder.encode(&m1).unwrap()).unwrap();
		let ct2 = s.encryptor.encrypt(&s.encoder.encode(&m2).unwrap()).unwrap();
		let sum = s.evaluator.add(&ct1, &ct2).unwrap();
		let decoded = decode(&s, &sum);
		assert_eq!(&decoded[..4], &[11, 22, 33, 44]);
		assert!(decoded[4..].iter().all(|&v| v == 0));
	}

	#[test]
	fn mul_relinearize_at_production_dimensions() {
		let mut s = setup(12, &[54, 54, 54]);
		let rlk = s.keygen.gen_relinearization_key(&s.sk, 2);
		let m1 = [2u64, 3, 5, 7];
		let m2 = [4u64, 6, 8, 10];
		let ct1 = s.encryptor.encrypt(&s.encoder.encode(&m1).unwrap()).unwrap();
		let ct2 = s.encryptor.encrypt(&s.encoder.encode(&m2).unwrap()).unwrap();

		let prod = s.evaluator.mul(&ct1, &ct2).unwrap();
		assert_eq!(prod.degree(), 2);
		let relin = s.evaluator.relinearize(&prod, &rlk).unwrap();
		assert_eq!(relin.degree(), 1);

		let decoded = decode(&s, &relin);
		assert_eq!(&decoded[..4], &[8, 18, 40, 70]);
		assert!(decoded[4..].iter().all(|&v| v == 0));
	}

	#[test]
	fn mul_by_encoded_one_is_identity() {
		let mut s = setup(6, &[50, 50]);
		let rlk = s.keygen.gen_relinearization_key(&s.sk, 2);
		let a: Vec<u64> = (0..64u64).map(|i| 101 * i % 65537).collect();
		let ones = vec![1u64; 64];

		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let ct_one = s.encryptor.encrypt(&s.encoder.encode(&ones).unwrap()).unwrap();
		let prod = s.evaluator.mul(&ct, &ct_one).unwrap();
		let relin = s.evaluator.relinearize(&prod, &rlk).unwrap();
		assert_eq!(decode(&s, &relin), a);
	}

	#[test]
	fn square_matches_mul() {
		let mut s = setup(6, &[50, 50]);
		let rlk = s.keygen.gen_relinearization_key(&s.sk, 2);
		let a: Vec<u64> = (0..64u64).map(|i| i + 2).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();

		let sq = s.evaluator.square(&ct).unwrap();
		let relin = s.evaluator.relinearize(&sq, &rlk).unwrap();
		let expected: Vec<u64> = a.iter().map(|x| x * x % 65537).collect();
		assert_eq!(decode(&s, &relin), expected);
	}

	#[test]
	fn relinearize_degree_one_is_copy() {
		let mut s = setup(6, &[50, 50]);
		let rlk = s.keygen.gen_relinearization_key(&s.sk, 2);
		let a: Vec<u64> = (0..64u64).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let relin = s.evaluator.relinearize(&ct, &rlk).unwrap();
		assert_eq!(decode(&s, &relin), decode(&s, &ct));
	}

	#[test]
	fn switch_keys_changes_secret() {
		let mut s = setup(6, &[50, 50]);
		let sk2 = s.keygen.gen_secret_key();
		let swk = s.keygen.gen_switching_key(&s.sk, &sk2);

		let a: Vec<u64> = (0..64u64).map(|i| 7 * i % 65537).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let switched = s.evaluator.switch_keys(&ct, &swk).unwrap();

		let decryptor2 = Decryptor::new(&s.params, &sk2);
		let decoded = s.encoder.decode(&decryptor2.decrypt(&switched)).unwrap();
		assert_eq!(decoded, a);
	}

	fn rotate_left(v: &[u64], k: usize) -> Vec<u64> {
		let row = v.len() / 2;
		let mut out = vec![0u64; v.len()];
		for i in 0..row {
			out[i] = v[(i + k) % row];
			out[row + i] = v[row + (i + k) % row];
		}
		out
	}

	#[test]
	fn rotations_follow_slot_layout() {
		let mut s = setup(6, &[50, 50]);
		let keys = s.keygen.gen_rotation_keys(&s.sk, &[3], true);
		let a: Vec<u64> = (0..64u64).map(|i| i + 1).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();

		let rotated = s.evaluator.rotate_columns(&ct, 3, &keys).unwrap();
		assert_eq!(decode(&s, &rotated), rotate_left(&a, 3));

		let swapped = s.evaluator.rotate_rows(&ct, &keys).unwrap();
		let mut expected = a[32..].to_vec();
		expected.extend_from_slice(&a[..32]);
		assert_eq!(decode(&s, &swapped), expected);
	}

	#[test]
	fn rotate_by_zero_is_identity() {
		let mut s = setup(6, &[50, 50]);
		let keys = s.keygen.gen_rotation_keys(&s.sk, &[], false);
		let a: Vec<u64> = (0..64u64).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let rotated = s.evaluator.rotate_columns(&ct, 0, &keys).unwrap();
		assert_eq!(decode(&s, &rotated), a);
	}

	#[test]
	fn rotations_compose_additively() {
		// Rotating by 3 then 5 equals rotating by 8, through the pow2
		// decomposition path.
		let mut s = setup(6, &[50, 50]);
		let keys = s.keygen.gen_rotation_keys_pow2(&s.sk);
		let a: Vec<u64> = (0..64u64).map(|i| 1000 + i).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();

		let r3 = s.evaluator.rotate_columns(&ct, 3, &keys).unwrap();
		let r8a = s.evaluator.rotate_columns(&r3, 5, &keys).unwrap();
		let r8b = s.evaluator.rotate_columns(&ct, 8, &keys).unwrap();
		assert_eq!(decode(&s, &r8a), decode(&s, &r8b));
		assert_eq!(decode(&s, &r8b), rotate_left(&a, 8));
	}

	#[test]
	fn rotation_and_its_complement_cancel() {
		let mut s = setup(6, &[50, 50]);
		let keys = s.keygen.gen_rotation_keys_pow2(&s.sk);
		let a: Vec<u64> = (0..64u64).map(|i| 2 * i + 3).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();

		let fwd = s.evaluator.rotate_columns(&ct, 5, &keys).unwrap();
		let back = s.evaluator.rotate_columns(&fwd, 32 - 5, &keys).unwrap();
		assert_eq!(decode(&s, &back), a);
	}

	#[test]
	fn missing_rotation_key_is_reported() {
		let mut s = setup(6, &[50, 50]);
		let keys = s.keygen.gen_rotation_keys(&s.sk, &[2], false);
		let a: Vec<u64> = (0..64u64).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		assert!(matches!(
			s.evaluator.rotate_columns(&ct, 5, &keys),
			Err(crate::Error::MissingRotationKey(5))
		));
	}

	#[test]
	fn inner_sum_replicates_total() {
		let mut s = setup(6, &[50, 50]);
		let keys = s.keygen.gen_rotation_keys_pow2(&s.sk);
		let a: Vec<u64> = (1..=64u64).collect();
		let total: u64 = a.iter().sum::<u64>() % 65537;
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let summed = s.evaluator.inner_sum(&ct, &keys).unwrap();
		assert!(decode(&s, &summed).iter().all(|&v| v == total));
	}

	#[test]
	fn ciphertext_serialization_round_trip() {
		let s = setup(6, &[50, 50]);
		let a: Vec<u64> = (0..64u64).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let bytes = ct.as_bytes().unwrap();
		let back = Ciphertext::from_bytes(&s.params, &bytes).unwrap();
		for (p, q) in ct.value.iter().zip(&back.value) {
			assert_eq!(p, q);
		}
		assert_eq!(decode(&s, &back), a);
	}

	#[test]
	fn shallow_copies_agree() {
		let mut s = setup(6, &[50, 50]);
		let mut copy = s.evaluator.shallow_copy();
		let a: Vec<u64> = (0..64u64).collect();
		let ct = s.encryptor.encrypt(&s.encoder.encode(&a).unwrap()).unwrap();
		let r1 = s.evaluator.mul(&ct, &ct).unwrap();
		let r2 = copy.mul(&ct, &ct).unwrap();
		for (p, q) in r1.value.iter().zip(&r2.value) {
			assert_eq!(p, q);
		}
	}

	#[test]
	fn option_a_scale_round_policy_matches() {
		let params = BfvParametersBuilder::new()
			.log_n(6)
			.plaintext_modulus(65537)
			.moduli_sizes(&[50, 50])
			.scale_round_policy(ScaleRoundPolicy::MulThenDown)
			.build()
			.unwrap();
		let mut keygen = KeyGenerator::from_seed(&params, 3);
		let sk = keygen.gen_secret_key();
		let rlk = keygen.gen_relinearization_key(&sk, 2);
		let encoder = BatchEncoder::new(&params).unwrap();
		let encryptor = Encryptor::new(&params, &sk);
		let decryptor = Decryptor::new(&params, &sk);
		let mut evaluator = Evaluator::new(&params).unwrap();

		let a: Vec<u64> = (0..64u64).map(|i| i + 1).collect();
		let ct = encryptor.encrypt(&encoder.encode(&a).unwrap()).unwrap();
		let tensored = evaluator.mul(&ct, &ct).unwrap();
		let prod = evaluator.relinearize(&tensored, &rlk).unwrap();
		let expected: Vec<u64> = a.iter().map(|x| x * x % 65537).collect();
		assert_eq!(encoder.decode(&decryptor.decrypt(&prod)).unwrap(), expected);
	}
}
