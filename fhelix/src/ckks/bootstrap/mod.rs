//! CKKS bootstrapping: ModRaise, SubSum, CoeffsToSlots, the approximate
//! modular reduction, and SlotsToCoeffs.

mod bootstrapper;
mod parameters;
mod precomp;

pub use bootstrapper::{Bootstrapper, BootstrappingKey};
pub use parameters::{BootstrappingParameters, EncodingMatrixParameters, EvalModParameters, SineType};
pub use precomp::Precomputation;

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use num_complex::Complex64;

	use crate::ckks::{
		CkksParameters, CkksParametersBuilder, Decryptor, Encoder, Encryptor, KeyGenerator,
	};

	use super::*;

	fn btp_params_sin(max_level: usize) -> BootstrappingParameters {
		// Sin, no double angle: eval_mod depth 4 for degree 3.
		BootstrappingParameters {
			coeffs_to_slots: EncodingMatrixParameters {
				level_start: max_level,
				depth: 2,
				max_n1n2_ratio: 16.0,
			},
			eval_mod: EvalModParameters {
				level_start: max_level - 2,
				sine_type: SineType::Sin,
				k: 8,
				sine_degree: 3,
				double_angle: 0,
				arcsine_degree: 0,
				message_ratio: 256.0,
				scaling_factor: (1u64 << 45) as f64,
			},
			slots_to_coeffs: EncodingMatrixParameters {
				level_start: max_level - 6,
				depth: 2,
				max_n1n2_ratio: 16.0,
			},
			main_secret_density: 8,
			ephemeral_secret_density: 8,
		}
	}

	fn full_packing_params() -> Arc<CkksParameters> {
		CkksParametersBuilder::new()
			.log_n(5)
			.log_slots(4)
			.moduli_sizes(&[55, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45])
			.default_scale((1u64 << 40) as f64)
			.build()
			.unwrap()
	}

	#[test]
	fn check_keys_reports_missing_rotations() {
		let params = full_packing_params();
		let btp = btp_params_sin(params.max_level());
		let encoder = Encoder::new(&params);
		let precomp = Arc::new(Precomputation::new(&params, &btp, &encoder).unwrap());

		let mut keygen = KeyGenerator::from_seed(&params, 11);
		let sk = keygen.gen_secret_key_sparse(8);
		let relin = keygen.gen_relinearization_key(&sk);

		// Withhold one required rotation.
		let required = precomp.required_rotations().to_vec();
		assert!(!required.is_empty());
		let withheld = required[required.len() - 1];
		let partial: Vec<usize> = required.iter().copied().filter(|&r| r != withheld).collect();
		let rotations = keygen.gen_rotation_keys(&sk, &partial, true);

		let err = Bootstrapper::new(
			&precomp,
			BootstrappingKey {
				relin: relin.clone(),
				rotations,
			},
		)
		.err()
		.unwrap();
		assert_eq!(err, crate::Error::MissingRotationKey(withheld));

		// And a missing conjugation key.
		let rotations = keygen.gen_rotation_keys(&sk, &required, false);
		let err = Bootstrapper::new(&precomp, BootstrappingKey { relin, rotations })
			.err()
			.unwrap();
		assert_eq!(err, crate::Error::MissingConjugationKey);
	}

	#[test]
	fn coeffs_to_slots_then_back_is_identity() {
		// With the modular reduction skipped, the two DFT stages compose to
		// the identity scaled by prescale / (sc_fac * default_scale).
		let params = full_packing_params();
		let btp = btp_params_sin(params.max_level());
		let encoder = Encoder::new(&params);
		let precomp = Arc::new(Precomputation::new(&params, &btp, &encoder).unwrap());

		let mut keygen = KeyGenerator::from_seed(&params, 12);
		let sk = keygen.gen_secret_key_sparse(8);
		let relin = keygen.gen_relinearization_key(&sk);
		let rotations = keygen.gen_rotation_keys(&sk, precomp.required_rotations(), true);
		let mut btp_instance =
			Bootstrapper::new(&precomp, BootstrappingKey { relin, rotations }).unwrap();

		let encryptor = Encryptor::new(&params, &sk);
		let decryptor = Decryptor::new(&params, &sk);

		let values: Vec<Complex64> = (0..16)
			.map(|i| Complex64::new((i as f64 - 8.0) / 10.0, (i as f64) / 20.0))
			.collect();
		let pt = encoder.encode(&values, params.max_level(), params.default_scale()).unwrap();
		let ct = encryptor.encrypt(&pt).unwrap();

		let (t0, t1) = btp_instance.coeffs_to_slots(&ct).unwrap();
		assert!(t1.is_some());
		let out = btp_instance.slots_to_coeffs(t0, t1).unwrap();

		let factor = precomp.prescale / (precomp.sc_fac() * params.default_scale());
		let decoded = encoder.decode(&decryptor.decrypt(&out));
		for (v, d) in values.iter().zip(&decoded) {
			let normalized = d / factor;
			assert!(
				(normalized - v).norm() < 1e-2,
				"{normalized} vs {v} (factor {factor})"
			);
		}
	}

	#[test]
	fn bootstrap_refreshes_exhausted_ciphertext() {
		// Sparse packing, repack path: 8 slots in a 256-degree ring.
		let mut sizes = vec![55usize];
		sizes.extend(std::iter::repeat(45).take(16));
		let params = CkksParametersBuilder::new()
			.log_n(8)
			.log_slots(3)
			.moduli_sizes(&sizes)
			.default_scale((1u64 << 40) as f64)
			.build()
			.unwrap();
		let max_level = params.max_level();

		let btp = BootstrappingParameters {
			coeffs_to_slots: EncodingMatrixParameters {
				level_start: max_level,
				depth: 2,
				max_n1n2_ratio: 16.0,
			},
			eval_mod: EvalModParameters {
				level_start: max_level - 2,
				sine_type: SineType::Cos,
				k: 8,
				sine_degree: 24,
				double_angle: 1,
				arcsine_degree: 0,
				message_ratio: 256.0,
				scaling_factor: (1u64 << 45) as f64,
			},
			slots_to_coeffs: EncodingMatrixParameters {
				level_start: max_level - 2 - 10,
				depth: 2,
				max_n1n2_ratio: 16.0,
			},
			main_secret_density: 8,
			ephemeral_secret_density: 8,
		};
		assert_eq!(btp.eval_mod_depth(), 10);

		let encoder = Encoder::new(&params);
		let precomp = Arc::new(Precomputation::new(&params, &btp, &encoder).unwrap());

		let mut keygen = KeyGenerator::from_seed(&params, 13);
		let sk = keygen.gen_secret_key_sparse(btp.main_secret_density);
		let relin = keygen.gen_relinearization_key(&sk);
		let rotations = keygen.gen_rotation_keys(&sk, precomp.required_rotations(), true);
		let mut bootstrapper =
			Bootstrapper::new(&precomp, BootstrappingKey { relin, rotations }).unwrap();

		let encryptor = Encryptor::new(&params, &sk);
		let decryptor = Decryptor::new(&params, &sk);

		let values: Vec<f64> = (0..8).map(|i| 0.35 * ((i as f64) - 3.5) / 3.5).collect();
		let pt = encoder.encode_f64(&values, 0, params.default_scale()).unwrap();
		let ct = encryptor.encrypt(&pt).unwrap();
		assert_eq!(ct.level(), 0);

		let refreshed = bootstrapper.bootstrap(&ct).unwrap();
		assert!(refreshed.level() >= 2);

		let decoded = encoder.decode(&decryptor.decrypt(&refreshed));
		for (v, d) in values.iter().zip(&decoded) {
			assert!(
				(d.re - v).abs() < 1e-2 && d.im.abs() < 1e-2,
				"{} vs {v}",
				d.re
			);
		}
	}

	#[test]
	fn shallow_copies_share_keys() {
		let params = full_packing_params();
		let btp = btp_params_sin(params.max_level());
		let encoder = Encoder::new(&params);
		let precomp = Arc::new(Precomputation::new(&params, &btp, &encoder).unwrap());

		let mut keygen = KeyGenerator::from_seed(&params, 14);
		let sk = keygen.gen_secret_key_sparse(8);
		let relin = keygen.gen_relinearization_key(&sk);
		let rotations = keygen.gen_rotation_keys(&sk, precomp.required_rotations(), true);
		let bootstrapper =
			Bootstrapper::new(&precomp, BootstrappingKey { relin, rotations }).unwrap();
		let copy = bootstrapper.shallow_copy();
		assert!(Arc::ptr_eq(copy.precomputation(), bootstrapper.precomputation()));
	}
}
