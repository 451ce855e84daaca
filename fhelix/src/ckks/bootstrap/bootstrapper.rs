use std::sync::Arc;

use num_complex::Complex64;
use tracing::{debug, trace};

use crate::ckks::ciphertext::Ciphertext;
use crate::ckks::evaluator::Evaluator;
use crate::keys::{RelinearizationKey, RotationKeySet};
use crate::{Error, Result};

use super::precomp::Precomputation;

/// The public material the bootstrapping pipeline consumes: the
/// relinearization key and the rotation set covering every shift the
/// precomputation enumerates, plus the conjugation key.
pub struct BootstrappingKey {
	pub relin: RelinearizationKey,
	pub rotations: RotationKeySet,
}

/// Refreshes exhausted CKKS ciphertexts: raises the modulus, moves the
/// coefficients into the slots, removes the q0 multiples with the sine
/// approximation, and moves the slots back.
pub struct Bootstrapper {
	precomp: Arc<Precomputation>,
	key: Arc<BootstrappingKey>,
	evaluator: Evaluator,
}

impl Bootstrapper {
	/// Validates the key bundle against the precomputation and builds the
	/// bootstrapper.
	pub fn new(precomp: &Arc<Precomputation>, key: BootstrappingKey) -> Result<Self> {
		Self::check_keys(precomp, &key)?;
		let evaluator = Evaluator::new(precomp.params())?;
		Ok(Bootstrapper {
			precomp: precomp.clone(),
			key: Arc::new(key),
			evaluator,
		})
	}

	/// A copy sharing the precomputation and keys, with a fresh evaluator.
	pub fn shallow_copy(&self) -> Self {
		Bootstrapper {
			precomp: self.precomp.clone(),
			key: self.key.clone(),
			evaluator: self.evaluator.shallow_copy(),
		}
	}

	/// Verifies that every key the pipeline will touch is present.
	pub fn check_keys(precomp: &Precomputation, key: &BootstrappingKey) -> Result<()> {
		if key.relin.keys.is_empty() {
			return Err(Error::MissingRelinearizationKey { supported: 1, got: 2 });
		}
		if key.rotations.row.is_none() {
			return Err(Error::MissingConjugationKey);
		}
		for &shift in precomp.required_rotations() {
			if !key.rotations.left.contains_key(&shift) {
				return Err(Error::MissingRotationKey(shift));
			}
		}
		Ok(())
	}

	pub fn precomputation(&self) -> &Arc<Precomputation> {
		&self.precomp
	}

	/// Refreshes a ciphertext from the bottom of the chain back to
	/// max_level minus the pipeline depth. The input must carry the
	/// default scale.
	pub fn bootstrap(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
		let params = self.precomp.params().clone();
		if (ct.scale() / params.default_scale() - 1.0).abs() > 1e-9 {
			return Err(Error::ScaleMismatch(ct.scale(), params.default_scale()));
		}

		let mut ct = ct.clone();
		if ct.level() > 0 {
			ct.drop_to_level(0);
		}

		// Bring the message to the prescale, q0 / message_ratio.
		let factor = (self.precomp.prescale() / ct.scale()).round();
		let mut scaled = self
			.evaluator
			.mult_by_const_scaled(&ct, Complex64::new(factor, 0.0), 1.0)?;
		scaled.set_scale(ct.scale() * factor);
		trace!(scale = scaled.scale().log2(), "prescaled");

		let mut raised = self.mod_raise(&scaled);
		debug!(level = raised.level(), "modulus raised");

		// Fold the unused slot copies (sparse packings only).
		for i in params.log_slots()..params.max_log_slots() {
			let rotated = self.evaluator.rotate_raw(&raised, 1 << i, &self.key.rotations)?;
			raised = self.evaluator.add(&raised, &rotated)?;
		}

		let (t0, t1) = self.coeffs_to_slots(&raised)?;
		debug!(level = t0.level(), "coefficients moved to slots");

		let t0 = self.eval_mod(&t0)?;
		let t1 = match t1 {
			Some(t1) => Some(self.eval_mod(&t1)?),
			None => None,
		};
		debug!(level = t0.level(), "modular reduction evaluated");

		let out = self.slots_to_coeffs(t0, t1)?;
		debug!(level = out.level(), scale = out.scale().log2(), "bootstrap complete");
		Ok(out)
	}

	/// Lifts a level-0 ciphertext to the whole chain, reading each centered
	/// coefficient as an integer.
	fn mod_raise(&self, ct: &Ciphertext) -> Ciphertext {
		let params = self.precomp.params();
		let ring = &params.ring_q;
		let n = params.degree();
		let q0 = params.moduli()[0];
		let q0_half = q0 >> 1;
		let top = params.max_level();

		let mut out = Ciphertext::new(params, ct.degree(), top, ct.scale());
		for (i, p) in ct.value.iter().enumerate() {
			let mut base = vec![0u64; n];
			base.copy_from_slice(&p.coeffs[0]);
			ring.inv_ntt_row(0, &mut base);

			for (j, m) in ring.moduli().iter().enumerate().take(top + 1) {
				let row = &mut out.value[i].coeffs[j];
				for (dst, &c) in row.iter_mut().zip(&base) {
					*dst = if c > q0_half {
						let r = (q0 - c) % m.modulus();
						if r == 0 {
							0
						} else {
							m.modulus() - r
						}
					} else {
						c % m.modulus()
					};
				}
				ring.ntt_row(j, row);
			}
		}
		out
	}

	/// The homomorphic inverse DFT. Full packings split into two
	/// ciphertexts holding the real and imaginary coefficient halves;
	/// sparse packings repack both halves into one.
	pub fn coeffs_to_slots(&mut self, ct: &Ciphertext) -> Result<(Ciphertext, Option<Ciphertext>)> {
		let mut acc = ct.clone();
		for mat in &self.precomp.cts_matrices {
			acc = self.evaluator.multiply_by_diag_matrix(&acc, mat, &self.key.rotations)?;
			self.evaluator.rescale_inplace(&mut acc)?;
		}

		if self.precomp.repack {
			return Ok((acc, None));
		}

		let conj = self.evaluator.conjugate(&acc, &self.key.rotations)?;
		let t0 = self.evaluator.add(&acc, &conj)?;
		let diff = self.evaluator.sub(&acc, &conj)?;
		let t1 = self.evaluator.div_by_i(&diff)?;
		Ok((t0, Some(t1)))
	}

	/// The homomorphic forward DFT closing the pipeline.
	pub fn slots_to_coeffs(&mut self, t0: Ciphertext, t1: Option<Ciphertext>) -> Result<Ciphertext> {
		let mut acc = match t1 {
			Some(t1) => {
				let imag = self.evaluator.mult_by_i(&t1)?;
				self.evaluator.add(&t0, &imag)?
			}
			None => t0,
		};
		for mat in &self.precomp.stc_matrices {
			acc = self.evaluator.multiply_by_diag_matrix(&acc, mat, &self.key.rotations)?;
			self.evaluator.rescale_inplace(&mut acc)?;
		}
		Ok(acc)
	}

	/// Approximate reduction modulo q0: evaluates the sine or shifted
	/// cosine interpolant, unwinds the double angles, and applies the
	/// arcsine correction when configured.
	pub fn eval_mod(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
		let em = &self.precomp.btp.eval_mod;
		let rlk = &self.key.relin;

		// The quarter-turn shift that turns the unwound cosine into the
		// sine lives inside the interpolated function.
		let mut x = self.evaluator.evaluate_chebyshev_with_scale(
			ct,
			&self.precomp.sine_poly,
			rlk,
			self.precomp.sinescale,
		)?;

		// Double-angle unwinding: y -> 2y^2 - kappa^(2^j).
		let mut pow = self.precomp.double_angle_base * self.precomp.double_angle_base;
		for _ in 0..em.double_angle {
			let mut sq = self.evaluator.square_relin(&x, rlk)?;
			self.evaluator.rescale_inplace(&mut sq)?;
			x = self.evaluator.add(&sq, &sq)?;
			self.evaluator.add_const_inplace(&mut x, Complex64::new(-pow, 0.0))?;
			pow *= pow;
		}

		if let Some(arcsine) = &self.precomp.arcsine_poly {
			x = self.evaluator.evaluate_chebyshev(&x, arcsine, rlk)?;
		}

		Ok(x)
	}
}
