use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;
use tracing::debug;

use crate::ckks::chebyshev::{approximate, ChebyshevInterpolation};
use crate::ckks::encoder::{Encoder, PtDiagMatrix};
use crate::ckks::parameters::CkksParameters;
use crate::Result;

use super::parameters::{BootstrappingParameters, SineType};

/// Everything the bootstrapping pipeline derives from the parameters alone:
/// the factored DFT matrices with their chained scale corrections, the sine
/// approximation, and the rotation shifts the key bundle must cover. Carries
/// no key material and can be built long before keys exist.
pub struct Precomputation {
	pub(crate) params: Arc<CkksParameters>,
	pub(crate) btp: BootstrappingParameters,

	/// Slot count the pipeline works at: doubled when the ring packs fewer
	/// than n/2 slots and the real and imaginary halves ride side by side.
	pub(crate) dslots: usize,
	pub(crate) repack: bool,

	pub(crate) prescale: f64,
	pub(crate) sinescale: f64,
	pub(crate) postscale: f64,

	pub(crate) sine_poly: ChebyshevInterpolation,
	pub(crate) arcsine_poly: Option<ChebyshevInterpolation>,
	/// Base constant of the double-angle unwinding.
	pub(crate) double_angle_base: f64,

	pub(crate) cts_matrices: Vec<PtDiagMatrix>,
	pub(crate) stc_matrices: Vec<PtDiagMatrix>,

	/// Every rotation shift the pipeline performs.
	pub(crate) rotations: Vec<usize>,
}

impl Precomputation {
	pub fn new(
		params: &Arc<CkksParameters>, btp: &BootstrappingParameters, encoder: &Encoder,
	) -> Result<Self> {
		btp.validate(params.max_level())?;

		let slots = params.slots();
		let repack = params.log_slots() < params.max_log_slots();
		let dslots = if repack { slots << 1 } else { slots };

		let q0 = params.moduli()[0] as f64;
		if q0 < btp.eval_mod.message_ratio * params.default_scale() {
			return Err(crate::Error::InvalidParameters(
				"q0 must be at least message_ratio times the default scale".into(),
			));
		}
		let prescale = (q0 / btp.eval_mod.message_ratio).log2().round().exp2();
		let sinescale = btp.eval_mod.scaling_factor.log2().round().exp2();
		let postscale = sinescale / btp.eval_mod.message_ratio;

		let (sine_poly, arcsine_poly, double_angle_base) = gen_sine_poly(&btp.eval_mod);

		let mut this = Precomputation {
			params: params.clone(),
			btp: btp.clone(),
			dslots,
			repack,
			prescale,
			sinescale,
			postscale,
			sine_poly,
			arcsine_poly,
			double_angle_base,
			cts_matrices: vec![],
			stc_matrices: vec![],
			rotations: vec![],
		};
		this.gen_dft_matrices(encoder)?;
		this.collect_rotations();

		debug!(
			cts_levels = ?this.cts_matrices.iter().map(|m| m.level()).collect::<Vec<_>>(),
			stc_levels = ?this.stc_matrices.iter().map(|m| m.level()).collect::<Vec<_>>(),
			prescale = this.prescale.log2(),
			sinescale = this.sinescale.log2(),
			postscale = this.postscale.log2(),
			"bootstrapping precomputation ready"
		);

		Ok(this)
	}

	pub fn params(&self) -> &Arc<CkksParameters> {
		&self.params
	}

	pub fn bootstrapping_parameters(&self) -> &BootstrappingParameters {
		&self.btp
	}

	/// The rotation shifts the key bundle must provide.
	pub fn required_rotations(&self) -> &[usize] {
		&self.rotations
	}

	pub(crate) fn sc_fac(&self) -> f64 {
		self.btp.eval_mod.sc_fac()
	}

	pub(crate) fn prescale(&self) -> f64 {
		self.prescale
	}

	/// Builds the merged-layer DFT matrices for both directions, with the
	/// per-layer slice of the total scale correction folded in.
	fn gen_dft_matrices(&mut self, encoder: &Encoder) -> Result<()> {
		let params = &self.params;
		let slots = params.slots();
		let log_slots = params.log_slots();
		let log_dslots = log_slots + usize::from(self.repack);
		let n = params.degree() as f64;

		let roots = compute_roots(slots << 1);
		let mut pow5 = vec![0usize; (slots << 1) + 1];
		pow5[0] = 1;
		for i in 1..pow5.len() {
			pow5[i] = pow5[i - 1] * 5 & ((slots << 2) - 1);
		}

		let q0 = params.moduli()[0] as f64;
		let sc_fac = self.sc_fac();

		// CoeffsToSlots: the total physical correction prescale/(n q0 scfac)
		// spread evenly over the layers.
		let cts_depth = self.btp.cts_depth();
		let cts_scale = (self.prescale / (n * q0 * sc_fac)).powf(1.0 / cts_depth as f64);
		let cts_vectors = self.compute_dft_vectors(&roots, &pow5, cts_scale, true);
		for (i, diags) in cts_vectors.into_iter().enumerate() {
			let level = self.btp.coeffs_to_slots.level_start - i;
			let scale = params.moduli()[level] as f64;
			self.cts_matrices.push(encoder.encode_diag_matrix(
				level,
				&diags,
				scale,
				self.btp.coeffs_to_slots.max_n1n2_ratio,
				log_dslots,
			)?);
		}

		// SlotsToCoeffs: total correction q0 / default_scale.
		let stc_depth = self.btp.stc_depth();
		let stc_scale = (q0 / params.default_scale()).powf(1.0 / stc_depth as f64);
		let stc_vectors = self.compute_dft_vectors(&roots, &pow5, stc_scale, false);
		for (i, diags) in stc_vectors.into_iter().enumerate() {
			let level = self.btp.slots_to_coeffs.level_start - i;
			let scale = params.moduli()[level] as f64;
			self.stc_matrices.push(encoder.encode_diag_matrix(
				level,
				&diags,
				scale,
				self.btp.slots_to_coeffs.max_n1n2_ratio,
				log_dslots,
			)?);
		}

		Ok(())
	}

	/// Factors the DFT of the slot dimension into `depth` merged butterfly
	/// layers, returning one diagonal map per layer. `forward` selects the
	/// inverse DFT used by CoeffsToSlots.
	fn compute_dft_vectors(
		&self, roots: &[Complex64], pow5: &[usize], diff_scale: f64, forward: bool,
	) -> Vec<HashMap<usize, Vec<Complex64>>> {
		let log_slots = self.params.log_slots();
		let slots = 1usize << log_slots;
		let dslots = self.dslots;

		let (a, b, c) = if forward {
			fft_inv_plain_vectors(log_slots, dslots, roots, pow5)
		} else {
			fft_plain_vectors(log_slots, dslots, roots, pow5)
		};
		let max_depth = if forward {
			self.btp.cts_depth()
		} else {
			self.btp.stc_depth()
		};

		// Collapse the log(slots) elementary layers into max_depth groups;
		// the merge order differs between directions to minimize the
		// rotation count.
		let mut merge = vec![0usize; max_depth];
		let mut level = log_slots;
		for i in 0..max_depth {
			let depth = (level as f64 / (max_depth - i) as f64).ceil() as usize;
			if forward {
				merge[i] = depth;
			} else {
				merge[max_depth - i - 1] = depth;
			}
			level -= depth;
		}

		let mut vectors = Vec::with_capacity(max_depth);
		let mut level = log_slots;
		for (i, &m) in merge.iter().enumerate() {
			let mut layer;
			if self.repack && !forward && i == 0 {
				// Repacking matrix merged into the first SlotsToCoeffs layer.
				layer = gen_repack_vectors(log_slots);
				layer = next_level_fft(
					&layer,
					log_slots,
					2 << log_slots,
					level,
					&a[log_slots - level],
					&b[log_slots - level],
					&c[log_slots - level],
					forward,
				);
				let mut next = level - 1;
				for _ in 0..m.saturating_sub(1) {
					layer = next_level_fft(
						&layer,
						log_slots,
						2 << log_slots,
						next,
						&a[log_slots - next],
						&b[log_slots - next],
						&c[log_slots - next],
						forward,
					);
					next -= 1;
				}
			} else {
				layer = gen_fft_layer(log_slots, level, &a[log_slots - level], &b[log_slots - level], &c[log_slots - level], forward);
				let mut next = level.wrapping_sub(1);
				for _ in 0..m.saturating_sub(1) {
					layer = next_level_fft(
						&layer,
						log_slots,
						1 << log_slots,
						next,
						&a[log_slots - next],
						&b[log_slots - next],
						&c[log_slots - next],
						forward,
					);
					next = next.wrapping_sub(1);
				}
			}
			level -= m;
			vectors.push(layer);
		}

		// Repacking after CoeffsToSlots: the last matrix is multiplied by
		// [1,..,1,0,..,0] to clear the mirrored half.
		if self.repack && forward {
			let last = vectors.last_mut().unwrap();
			for diag in last.values_mut() {
				for x in 0..slots {
					diag[x + slots] = Complex64::new(0.0, 0.0);
				}
			}
		}

		for layer in vectors.iter_mut() {
			for diag in layer.values_mut() {
				for v in diag.iter_mut() {
					*v *= diff_scale;
				}
			}
		}

		vectors
	}

	fn collect_rotations(&mut self) {
		let mut rotations: Vec<usize> = vec![];
		let params = &self.params;

		// SubSum folding shifts, for sparse packings.
		for i in params.log_slots()..params.max_log_slots() {
			let shift = 1usize << i;
			if !rotations.contains(&shift) {
				rotations.push(shift);
			}
		}

		for mat in self.cts_matrices.iter().chain(&self.stc_matrices) {
			for r in mat.rotations() {
				if !rotations.contains(&r) {
					rotations.push(r);
				}
			}
		}

		rotations.sort_unstable();
		self.rotations = rotations;
	}
}

fn compute_roots(n: usize) -> Vec<Complex64> {
	let m = n << 1;
	let mut roots = Vec::with_capacity(m + 1);
	for i in 0..=m {
		let angle = 2.0 * PI * i as f64 / m as f64;
		roots.push(Complex64::new(angle.cos(), angle.sin()));
	}
	roots
}

type LayerVectors = (Vec<Vec<Complex64>>, Vec<Vec<Complex64>>, Vec<Vec<Complex64>>);

/// Elementary butterfly vectors of the forward DFT, one triple per level.
fn fft_plain_vectors(log_n: usize, dslots: usize, roots: &[Complex64], pow5: &[usize]) -> LayerVectors {
	let n = 1usize << log_n;
	let size = if 2 * n == dslots { 2 } else { 1 };
	let mut va = vec![vec![Complex64::default(); dslots]; log_n];
	let mut vb = vec![vec![Complex64::default(); dslots]; log_n];
	let mut vc = vec![vec![Complex64::default(); dslots]; log_n];

	let mut index = 0;
	let mut m = 2usize;
	while m <= n {
		let tt = m >> 1;
		let gap = n / m;
		let mask = (m << 2) - 1;
		let mut i = 0;
		while i < n {
			for j in 0..m >> 1 {
				let k = (pow5[j] & mask) * gap;
				let idx1 = i + j;
				let idx2 = i + j + tt;
				for u in 0..size {
					va[index][idx1 + u * n] = Complex64::new(1.0, 0.0);
					va[index][idx2 + u * n] = -roots[k];
					vb[index][idx1 + u * n] = roots[k];
					vc[index][idx2 + u * n] = Complex64::new(1.0, 0.0);
				}
			}
			i += m;
		}
		index += 1;
		m <<= 1;
	}
	(va, vb, vc)
}

/// Elementary butterfly vectors of the inverse DFT.
fn fft_inv_plain_vectors(log_n: usize, dslots: usize, roots: &[Complex64], pow5: &[usize]) -> LayerVectors {
	let n = 1usize << log_n;
	let size = if 2 * n == dslots { 2 } else { 1 };
	let mut va = vec![vec![Complex64::default(); dslots]; log_n];
	let mut vb = vec![vec![Complex64::default(); dslots]; log_n];
	let mut vc = vec![vec![Complex64::default(); dslots]; log_n];

	let mut index = 0;
	let mut m = n;
	while m >= 2 {
		let tt = m >> 1;
		let gap = n / m;
		let mask = (m << 2) - 1;
		let mut i = 0;
		while i < n {
			for j in 0..m >> 1 {
				let k = ((m << 2) - (pow5[j] & mask)) * gap;
				let idx1 = i + j;
				let idx2 = i + j + tt;
				for u in 0..size {
					va[index][idx1 + u * n] = Complex64::new(1.0, 0.0);
					va[index][idx2 + u * n] = -roots[k];
					vb[index][idx1 + u * n] = Complex64::new(1.0, 0.0);
					vc[index][idx2 + u * n] = roots[k];
				}
			}
			i += m;
		}
		index += 1;
		m >>= 1;
	}
	(va, vb, vc)
}

/// One elementary DFT layer as a three-diagonal map.
fn gen_fft_layer(
	log_l: usize, level: usize, a: &[Complex64], b: &[Complex64], c: &[Complex64], forward: bool,
) -> HashMap<usize, Vec<Complex64>> {
	let rot = if forward {
		1usize << (level - 1)
	} else {
		1usize << (log_l - level)
	};
	let mut vectors = HashMap::new();
	add_to_diag_map(&mut vectors, 0, a);
	add_to_diag_map(&mut vectors, rot, b);
	add_to_diag_map(&mut vectors, (1 << log_l) - rot, c);
	vectors
}

/// The sparse repacking matrix: moves the imaginary halves alongside the
/// real ones so one ciphertext carries both.
fn gen_repack_vectors(log_l: usize) -> HashMap<usize, Vec<Complex64>> {
	let l = 1usize << log_l;
	let mut a = vec![Complex64::default(); 2 * l];
	let mut b = vec![Complex64::default(); 2 * l];
	for i in 0..l {
		a[i] = Complex64::new(1.0, 0.0);
		a[i + l] = Complex64::new(0.0, 1.0);
		b[i] = Complex64::new(0.0, 1.0);
		b[i + l] = Complex64::new(1.0, 0.0);
	}
	let mut vectors = HashMap::new();
	add_to_diag_map(&mut vectors, 0, &a);
	add_to_diag_map(&mut vectors, l, &b);
	vectors
}

/// Merges the accumulated transform with the next elementary layer:
/// M' = L * M expressed on diagonals.
fn next_level_fft(
	vec: &HashMap<usize, Vec<Complex64>>, log_l: usize, n: usize, next_level: usize,
	a: &[Complex64], b: &[Complex64], c: &[Complex64], forward: bool,
) -> HashMap<usize, Vec<Complex64>> {
	let rot = if forward {
		(1usize << (next_level - 1)) & (n - 1)
	} else {
		(1usize << (log_l - next_level)) & (n - 1)
	};
	let mut out = HashMap::new();
	for (&i, v) in vec {
		let mul_a = mul_vec(v, a);
		add_to_diag_map(&mut out, i, &mul_a);
		let mul_b = mul_vec(&rotate_vec(v, rot), b);
		add_to_diag_map(&mut out, (i + rot) & (n - 1), &mul_b);
		let mul_c = mul_vec(&rotate_vec(v, n - rot), c);
		add_to_diag_map(&mut out, (i + n - rot) & (n - 1), &mul_c);
	}
	out
}

fn add_to_diag_map(map: &mut HashMap<usize, Vec<Complex64>>, index: usize, vec: &[Complex64]) {
	match map.get_mut(&index) {
		Some(existing) => {
			for (e, v) in existing.iter_mut().zip(vec) {
				*e += v;
			}
		}
		None => {
			map.insert(index, vec.to_vec());
		}
	}
}

fn rotate_vec(x: &[Complex64], r: usize) -> Vec<Complex64> {
	let mask = x.len() - 1;
	(0..x.len()).map(|i| x[(i + r) & mask]).collect()
}

fn mul_vec(a: &[Complex64], b: &[Complex64]) -> Vec<Complex64> {
	a.iter().zip(b).map(|(x, y)| x * y).collect()
}

/// Builds the sine (or shifted cosine) interpolant with the double-angle
/// base folded into its coefficients, plus the optional arcsine correction.
fn gen_sine_poly(
	em: &super::parameters::EvalModParameters,
) -> (ChebyshevInterpolation, Option<ChebyshevInterpolation>, f64) {
	let two_pi = 2.0 * PI;
	let sc_fac = em.sc_fac();
	let k = em.k as f64;

	let (mut sine_poly, base) = match em.sine_type {
		SineType::Sin => {
			let poly = approximate(|x| (two_pi * x).sin() / two_pi, -k, k, em.sine_degree);
			(poly, 0.0)
		}
		SineType::Cos => {
			// kappa^(2^r) must equal 1/(2 pi), unless the arcsine stage
			// wants the raw sine.
			let kappa = if em.arcsine_degree > 0 {
				1.0
			} else {
				(1.0 / two_pi).powf(1.0 / sc_fac)
			};
			let poly = approximate(
				|x| (two_pi * (x - 0.25 / sc_fac)).cos(),
				-k / sc_fac,
				k / sc_fac,
				em.sine_degree,
			);
			(poly, kappa)
		}
	};

	if em.sine_type == SineType::Cos {
		for c in sine_poly.coeffs.iter_mut() {
			*c *= base;
		}
	}

	let arcsine = if em.arcsine_degree > 0 {
		let poly = match em.sine_type {
			// The sine output is already divided by 2 pi.
			SineType::Sin => approximate(
				|y| (two_pi * y).clamp(-1.0, 1.0).asin() / two_pi,
				-1.0 / two_pi,
				1.0 / two_pi,
				em.arcsine_degree,
			),
			// The cosine path kept the raw sine in [-1, 1].
			SineType::Cos => approximate(|y| y.clamp(-1.0, 1.0).asin() / two_pi, -1.0, 1.0, em.arcsine_degree),
		};
		Some(poly)
	} else {
		None
	};

	(sine_poly, arcsine, base)
}
