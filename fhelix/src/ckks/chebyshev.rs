use std::collections::BTreeMap;

use num_complex::Complex64;

use crate::keys::RelinearizationKey;
use crate::{Error, Result};

use super::ciphertext::Ciphertext;
use super::evaluator::Evaluator;

/// A Chebyshev interpolant of a real function over [a, b].
#[derive(Debug, Clone)]
pub struct ChebyshevInterpolation {
	pub(crate) coeffs: Vec<f64>,
	pub(crate) a: f64,
	pub(crate) b: f64,
}

impl ChebyshevInterpolation {
	pub fn degree(&self) -> usize {
		self.coeffs.len() - 1
	}

	/// The interpolation interval.
	pub fn interval(&self) -> (f64, f64) {
		(self.a, self.b)
	}

	/// Evaluates the interpolant in the clear, by Clenshaw recurrence.
	pub fn eval(&self, x: f64) -> f64 {
		let u = (2.0 * x - self.a - self.b) / (self.b - self.a);
		let mut b1 = 0.0f64;
		let mut b2 = 0.0f64;
		for &c in self.coeffs.iter().skip(1).rev() {
			let t = 2.0 * u * b1 - b2 + c;
			b2 = b1;
			b1 = t;
		}
		u * b1 - b2 + self.coeffs[0]
	}
}

/// Interpolates `f` over [a, b] at the Chebyshev nodes, returning the
/// coefficients in the Chebyshev basis.
pub fn approximate<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, degree: usize) -> ChebyshevInterpolation {
	let n = degree + 1;
	let nodes: Vec<f64> = (0..n)
		.map(|k| (std::f64::consts::PI * (k as f64 + 0.5) / n as f64).cos())
		.collect();
	let fx: Vec<f64> = nodes
		.iter()
		.map(|&u| f(u * (b - a) / 2.0 + (b + a) / 2.0))
		.collect();

	let mut coeffs = Vec::with_capacity(n);
	for j in 0..n {
		let mut c = 0.0;
		for k in 0..n {
			c += fx[k] * (std::f64::consts::PI * j as f64 * (k as f64 + 0.5) / n as f64).cos();
		}
		c *= 2.0 / n as f64;
		if j == 0 {
			c /= 2.0;
		}
		coeffs.push(c);
	}

	ChebyshevInterpolation { coeffs, a, b }
}

/// The Chebyshev power basis T_1 .. T_{2^L} plus the giant squares up to
/// T_{2^(M-1)}, generated once per evaluation.
pub(crate) struct PowerBasis {
	pub(crate) t: BTreeMap<usize, Ciphertext>,
}

impl Evaluator {
	/// Rescales `ct` onto an exact target scale by multiplying with a
	/// rounded unit constant, at the cost of one level.
	pub(crate) fn match_scale(&mut self, ct: &Ciphertext, target_scale: f64) -> Result<Ciphertext> {
		if ct.level() == 0 {
			return Err(Error::LevelExhausted(0));
		}
		let q = self.params().qi_f64(ct.level());
		let factor = (target_scale / ct.scale() * q).round();
		let scaled = self.mult_by_const_scaled(ct, Complex64::new(1.0, 0.0), factor)?;
		let mut out = scaled;
		self.rescale_inplace(&mut out)?;
		Ok(out)
	}

	/// Subtraction that first aligns the scale of `b` to `a`.
	fn sub_matched(&mut self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
		if (a.scale() / b.scale() - 1.0).abs() < 1e-9 {
			self.sub(a, b)
		} else {
			let aligned = self.match_scale(b, a.scale())?;
			self.sub(a, &aligned)
		}
	}

	/// Builds T_1..T_{2^L} and the giant powers of two up to T_{2^(M-1)}.
	fn gen_power_basis(
		&mut self, y: &Ciphertext, m: usize, l: usize, rlk: &RelinearizationKey,
	) -> Result<PowerBasis> {
		let mut t: BTreeMap<usize, Ciphertext> = BTreeMap::new();
		t.insert(1, y.clone());

		for k in 2..=(1usize << l) {
			let hi = k.div_ceil(2);
			let lo = k / 2;
			let prod = {
				let (a, b) = (t[&hi].clone(), t[&lo].clone());
				let mut p = self.mul_relin(&a, &b, rlk)?;
				self.rescale_inplace(&mut p)?;
				let doubled = self.add(&p, &p)?;
				doubled
			};
			let tk = if hi == lo {
				// T_{2j} = 2 T_j^2 - 1.
				self.add_const(&prod, Complex64::new(-1.0, 0.0))?
			} else {
				// T_{hi+lo} = 2 T_hi T_lo - T_{hi-lo}.
				let diff = t[&(hi - lo)].clone();
				self.sub_matched(&prod, &diff)?
			};
			t.insert(k, tk);
		}

		let mut pow = 1usize << l;
		while pow < (1 << (m - 1)) {
			let next = pow << 1;
			let base = t[&pow].clone();
			let mut sq = self.square_relin(&base, rlk)?;
			self.rescale_inplace(&mut sq)?;
			let doubled = self.add(&sq, &sq)?;
			let tn = self.add_const(&doubled, Complex64::new(-1.0, 0.0))?;
			t.insert(next, tn);
			pow = next;
		}

		Ok(PowerBasis { t })
	}

	/// Linear combination sum_j c_j T_j for degrees below the baby bound,
	/// produced at the requested level and scale through one rescale.
	fn cheby_linear_combination(
		&mut self, coeffs: &[f64], basis: &PowerBasis, out_level: usize, out_scale: f64,
	) -> Result<Ciphertext> {
		let work_level = out_level + 1;
		let q_w = self.params().qi_f64(work_level);
		let mut acc = Ciphertext::new(self.params(), 1, work_level, out_scale * q_w);

		for (j, &c) in coeffs.iter().enumerate().skip(1) {
			if c.abs() < 1e-12 {
				continue;
			}
			let tj = &basis.t[&j];
			if tj.level() < work_level {
				return Err(Error::LevelExhausted(tj.level()));
			}
			let s_j = out_scale * q_w / tj.scale();
			let mut term = self.mult_by_const_scaled(tj, Complex64::new(c, 0.0), s_j)?;
			term.drop_to_level(work_level);
			term.set_scale(acc.scale());
			acc = self.add(&acc, &term)?;
		}

		self.rescale_inplace(&mut acc)?;
		acc.set_scale(out_scale);
		if coeffs[0].abs() > 1e-12 {
			self.add_const_inplace(&mut acc, Complex64::new(coeffs[0], 0.0))?;
		}
		Ok(acc)
	}

	/// Recursive baby-step giant-step evaluation in the Chebyshev basis:
	/// p = q * T_t + r with the Chebyshev reflection folded into r.
	fn cheby_eval_recurse(
		&mut self, coeffs: &[f64], basis: &PowerBasis, baby_bound: usize, out_level: usize,
		out_scale: f64, rlk: &RelinearizationKey,
	) -> Result<Ciphertext> {
		let d = coeffs.len() - 1;
		if d < baby_bound {
			return self.cheby_linear_combination(coeffs, basis, out_level, out_scale);
		}

		let t = prev_power_of_two(d);
		let mut q = Vec::with_capacity(d - t + 1);
		q.push(coeffs[t]);
		for k in 1..=d - t {
			q.push(2.0 * coeffs[t + k]);
		}
		let mut r = coeffs[..t].to_vec();
		for k in 1..=d - t {
			r[t - k] -= coeffs[t + k];
		}

		let t_t = basis.t[&t].clone();
		let w = out_level + 1;
		let s_q = out_scale * self.params().qi_f64(out_level + 1) / t_t.scale();
		let u = self.cheby_eval_recurse(&q, basis, baby_bound, w, s_q, rlk)?;

		let mut prod = self.mul_relin(&u, &t_t, rlk)?;
		self.rescale_inplace(&mut prod)?;
		prod.set_scale(out_scale);

		let rv = self.cheby_eval_recurse(&r, basis, baby_bound, out_level, out_scale, rlk)?;
		self.add(&prod, &rv)
	}

	/// Homomorphically evaluates a Chebyshev interpolant. Consumes roughly
	/// ceil(log2(degree)) + 2 levels.
	pub fn evaluate_chebyshev(
		&mut self, ct: &Ciphertext, cheby: &ChebyshevInterpolation, rlk: &RelinearizationKey,
	) -> Result<Ciphertext> {
		let scale = ct.scale();
		self.evaluate_chebyshev_with_scale(ct, cheby, rlk, scale)
	}

	/// As [`Evaluator::evaluate_chebyshev`], with an explicit output scale.
	pub(crate) fn evaluate_chebyshev_with_scale(
		&mut self, ct: &Ciphertext, cheby: &ChebyshevInterpolation, rlk: &RelinearizationKey,
		target_scale: f64,
	) -> Result<Ciphertext> {
		let (a, b) = (cheby.a, cheby.b);
		let d = cheby.degree();
		let m = usize::BITS as usize - (d + 1).leading_zeros() as usize; // ceil(log2(d+1)) for d+1 not pow2
		let m = if (d + 1).is_power_of_two() { m - 1 } else { m };
		let l = (m / 2).max(1);

		// Change of variable onto [-1, 1].
		let mut y = self.mult_by_const(ct, Complex64::new(2.0 / (b - a), 0.0))?;
		self.rescale_inplace(&mut y)?;
		let y = self.add_const(&y, Complex64::new(-(a + b) / (b - a), 0.0))?;

		let basis = self.gen_power_basis(&y, m.max(l + 1), l, rlk)?;

		let min_basis_level = basis.t.values().map(Ciphertext::level).min().unwrap();
		let n_splits = m.saturating_sub(l);
		if min_basis_level < n_splits + 2 {
			return Err(Error::LevelExhausted(min_basis_level));
		}
		let out_level = min_basis_level - n_splits - 1;

		self.cheby_eval_recurse(&cheby.coeffs, &basis, 1 << l, out_level, target_scale, rlk)
	}
}

fn prev_power_of_two(x: usize) -> usize {
	let mut p = 1;
	while p * 2 <= x {
		p *= 2;
	}
	p
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn interpolation_matches_function() {
		// The sigmoid has poles at +-i*pi, so a degree-32 interpolant over
		// [-8, 8] converges to roughly 1e-5.
		let cheby = approximate(|x| 1.0 / (1.0 + (-x).exp()), -8.0, 8.0, 32);
		for i in 0..100 {
			let x = -8.0 + 16.0 * i as f64 / 99.0;
			let expected = 1.0 / (1.0 + (-x).exp());
			assert!(
				(cheby.eval(x) - expected).abs() < 1e-4,
				"x={x}: {} vs {expected}",
				cheby.eval(x)
			);
		}
	}

	#[test]
	fn interpolation_of_sine() {
		let two_pi = 2.0 * std::f64::consts::PI;
		let cheby = approximate(|x| (two_pi * x).sin() / two_pi, -2.5, 2.5, 60);
		for i in 0..50 {
			let x = -2.5 + 5.0 * i as f64 / 49.0;
			let expected = (two_pi * x).sin() / two_pi;
			assert!((cheby.eval(x) - expected).abs() < 1e-7);
		}
	}
}
