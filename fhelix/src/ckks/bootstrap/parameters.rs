use crate::serialization::{FromBytes, ToBytes};
use crate::{Error, Result};

/// The approximation family used by the modular-reduction stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SineType {
	/// Direct interpolation of sin(2 pi x) / (2 pi); incompatible with
	/// double-angle unwinding.
	Sin,
	/// Interpolation of a shifted cosine over a range compressed by
	/// 2^double_angle, unwound by the double-angle formula.
	Cos,
}

/// Parameters of one homomorphic DFT stage (CoeffsToSlots or
/// SlotsToCoeffs): where it starts, how many merged layers it spans, and
/// the baby-step/giant-step ratio of its matrix products.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingMatrixParameters {
	pub level_start: usize,
	pub depth: usize,
	pub max_n1n2_ratio: f64,
}

impl EncodingMatrixParameters {
	fn to_blob(&self) -> Result<Vec<u8>> {
		if self.level_start > 0xFF || self.depth > 0xFF {
			return Err(Error::InvalidEncoding("encoding-matrix field out of range"));
		}
		let mut data = vec![self.level_start as u8, self.depth as u8];
		data.extend_from_slice(&self.max_n1n2_ratio.to_be_bytes());
		Ok(data)
	}

	fn from_blob(data: &[u8]) -> Result<Self> {
		if data.len() != 10 {
			return Err(Error::InvalidEncoding("encoding-matrix blob must be 10 bytes"));
		}
		Ok(EncodingMatrixParameters {
			level_start: data[0] as usize,
			depth: data[1] as usize,
			max_n1n2_ratio: f64::from_be_bytes(data[2..10].try_into().unwrap()),
		})
	}
}

/// Parameters of the approximate modular reduction: the sine family, its
/// range K, interpolation degree, double-angle count, optional arcsine
/// correction, the message ratio q0/|m|, and the evaluation scale.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalModParameters {
	pub level_start: usize,
	pub sine_type: SineType,
	pub k: usize,
	pub sine_degree: usize,
	pub double_angle: usize,
	pub arcsine_degree: usize,
	pub message_ratio: f64,
	pub scaling_factor: f64,
}

impl EvalModParameters {
	/// 2^double_angle, the range-compression factor.
	pub fn sc_fac(&self) -> f64 {
		(1u64 << self.double_angle) as f64
	}

	fn to_blob(&self) -> Result<Vec<u8>> {
		if self.level_start > 0xFF
			|| self.k > 0xFFFF
			|| self.sine_degree > 0xFFFF
			|| self.double_angle > 0xFF
			|| self.arcsine_degree > 0xFF
		{
			return Err(Error::InvalidEncoding("eval-mod field out of range"));
		}
		let mut data = vec![
			self.level_start as u8,
			match self.sine_type {
				SineType::Sin => 0,
				SineType::Cos => 1,
			},
		];
		data.extend_from_slice(&(self.k as u16).to_be_bytes());
		data.extend_from_slice(&(self.sine_degree as u16).to_be_bytes());
		data.push(self.double_angle as u8);
		data.push(self.arcsine_degree as u8);
		data.extend_from_slice(&self.message_ratio.to_be_bytes());
		data.extend_from_slice(&self.scaling_factor.to_be_bytes());
		Ok(data)
	}

	fn from_blob(data: &[u8]) -> Result<Self> {
		if data.len() != 24 {
			return Err(Error::InvalidEncoding("eval-mod blob must be 24 bytes"));
		}
		let sine_type = match data[1] {
			0 => SineType::Sin,
			1 => SineType::Cos,
			_ => return Err(Error::InvalidEncoding("unknown sine type")),
		};
		Ok(EvalModParameters {
			level_start: data[0] as usize,
			sine_type,
			k: u16::from_be_bytes(data[2..4].try_into().unwrap()) as usize,
			sine_degree: u16::from_be_bytes(data[4..6].try_into().unwrap()) as usize,
			double_angle: data[6] as usize,
			arcsine_degree: data[7] as usize,
			message_ratio: f64::from_be_bytes(data[8..16].try_into().unwrap()),
			scaling_factor: f64::from_be_bytes(data[16..24].try_into().unwrap()),
		})
	}
}

/// The full bootstrapping parameter set: the three pipeline stages plus the
/// Hamming weights of the main and ephemeral secrets.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrappingParameters {
	pub slots_to_coeffs: EncodingMatrixParameters,
	pub eval_mod: EvalModParameters,
	pub coeffs_to_slots: EncodingMatrixParameters,
	pub main_secret_density: usize,
	pub ephemeral_secret_density: usize,
}

impl BootstrappingParameters {
	pub fn cts_depth(&self) -> usize {
		self.coeffs_to_slots.depth
	}

	pub fn stc_depth(&self) -> usize {
		self.slots_to_coeffs.depth
	}

	/// Levels consumed by one Chebyshev evaluation of the given degree, as
	/// scheduled by the evaluator.
	pub(crate) fn cheby_depth(degree: usize) -> usize {
		let m = usize::BITS as usize - (degree + 1).leading_zeros() as usize;
		let m = if (degree + 1).is_power_of_two() { m - 1 } else { m };
		let l = (m / 2).max(1);
		let m = m.max(l + 1);
		2 * m - l + 1
	}

	/// Levels consumed by the modular-reduction stage.
	pub fn eval_mod_depth(&self) -> usize {
		let mut depth = Self::cheby_depth(self.eval_mod.sine_degree) + self.eval_mod.double_angle;
		if self.eval_mod.arcsine_degree > 0 {
			depth += Self::cheby_depth(self.eval_mod.arcsine_degree);
		}
		depth
	}

	/// Construction-time consistency checks.
	pub fn validate(&self, max_level: usize) -> Result<()> {
		if self.eval_mod.sine_type == SineType::Sin && self.eval_mod.double_angle != 0 {
			return Err(Error::InvalidParameters(
				"double-angle unwinding requires the Cos sine type".into(),
			));
		}
		if self.eval_mod.k == 0 {
			return Err(Error::InvalidParameters("sine range K must be positive".into()));
		}
		if self.eval_mod.message_ratio < 2.0 {
			return Err(Error::InvalidParameters("message ratio must be at least 2".into()));
		}
		if self.coeffs_to_slots.level_start != max_level {
			return Err(Error::InvalidParameters(format!(
				"CoeffsToSlots must start at the top level {max_level}, got {}",
				self.coeffs_to_slots.level_start
			)));
		}
		if self.coeffs_to_slots.level_start < self.cts_depth()
			|| self.coeffs_to_slots.level_start - self.cts_depth() != self.eval_mod.level_start
		{
			return Err(Error::InvalidParameters(
				"CoeffsToSlots depth is inconsistent with the EvalMod starting level".into(),
			));
		}
		if self.eval_mod.level_start < self.eval_mod_depth()
			|| self.eval_mod.level_start - self.eval_mod_depth() < self.slots_to_coeffs.level_start
		{
			return Err(Error::InvalidParameters(
				"EvalMod depth is inconsistent with the SlotsToCoeffs starting level".into(),
			));
		}
		if self.slots_to_coeffs.level_start < self.stc_depth() {
			return Err(Error::InvalidParameters(
				"SlotsToCoeffs has fewer levels than its depth".into(),
			));
		}
		Ok(())
	}
}

impl ToBytes for BootstrappingParameters {
	/// Three length-prefixed stage blobs followed by the two secret
	/// densities as big-endian u32.
	fn as_bytes(&self) -> Result<Vec<u8>> {
		let mut data = vec![];
		for blob in [
			self.slots_to_coeffs.to_blob()?,
			self.eval_mod.to_blob()?,
			self.coeffs_to_slots.to_blob()?,
		] {
			data.push(blob.len() as u8);
			data.extend_from_slice(&blob);
		}
		data.extend_from_slice(&(self.main_secret_density as u32).to_be_bytes());
		data.extend_from_slice(&(self.ephemeral_secret_density as u32).to_be_bytes());
		Ok(data)
	}
}

impl FromBytes for BootstrappingParameters {
	type State = ();

	fn from_bytes(_state: &(), bytes: &[u8]) -> Result<Self> {
		let mut at = 0usize;
		let mut next = |bytes: &[u8]| -> Result<(usize, usize)> {
			if at >= bytes.len() {
				return Err(Error::InvalidEncoding("truncated stage blob"));
			}
			let len = bytes[at] as usize;
			let start = at + 1;
			if bytes.len() < start + len {
				return Err(Error::InvalidEncoding("truncated stage blob"));
			}
			at = start + len;
			Ok((start, len))
		};

		let (s0, l0) = next(bytes)?;
		let slots_to_coeffs = EncodingMatrixParameters::from_blob(&bytes[s0..s0 + l0])?;
		let (s1, l1) = next(bytes)?;
		let eval_mod = EvalModParameters::from_blob(&bytes[s1..s1 + l1])?;
		let (s2, l2) = next(bytes)?;
		let coeffs_to_slots = EncodingMatrixParameters::from_blob(&bytes[s2..s2 + l2])?;

		if bytes.len() != at + 8 {
			return Err(Error::InvalidEncoding("densities missing or trailing bytes"));
		}
		let main = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap()) as usize;
		let ephemeral = u32::from_be_bytes(bytes[at + 4..at + 8].try_into().unwrap()) as usize;

		Ok(BootstrappingParameters {
			slots_to_coeffs,
			eval_mod,
			coeffs_to_slots,
			main_secret_density: main,
			ephemeral_secret_density: ephemeral,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::serialization::{FromBytes, ToBytes};

	fn sample() -> BootstrappingParameters {
		BootstrappingParameters {
			slots_to_coeffs: EncodingMatrixParameters {
				level_start: 2,
				depth: 2,
				max_n1n2_ratio: 16.0,
			},
			eval_mod: EvalModParameters {
				level_start: 13,
				sine_type: SineType::Cos,
				k: 8,
				sine_degree: 24,
				double_angle: 1,
				arcsine_degree: 0,
				message_ratio: 256.0,
				scaling_factor: (1u64 << 55) as f64,
			},
			coeffs_to_slots: EncodingMatrixParameters {
				level_start: 15,
				depth: 2,
				max_n1n2_ratio: 16.0,
			},
			main_secret_density: 192,
			ephemeral_secret_density: 32,
		}
	}

	#[test]
	fn serialization_round_trip() {
		let params = sample();
		let bytes = params.as_bytes().unwrap();
		let back = BootstrappingParameters::from_bytes(&(), &bytes).unwrap();
		assert_eq!(params, back);
	}

	#[test]
	fn serialization_rejects_truncation() {
		let bytes = sample().as_bytes().unwrap();
		assert!(BootstrappingParameters::from_bytes(&(), &bytes[..bytes.len() - 3]).is_err());
		assert!(BootstrappingParameters::from_bytes(&(), &[]).is_err());
	}

	#[test]
	fn sin_with_double_angle_is_rejected() {
		let mut params = sample();
		params.eval_mod.sine_type = SineType::Sin;
		assert!(params.validate(15).is_err());
	}

	#[test]
	fn level_consistency_is_enforced() {
		let params = sample();
		// Depth bookkeeping: 15 - 2 = 13 = eval_mod start; eval_mod depth
		// covers sine degree 24 and one double angle.
		assert_eq!(params.eval_mod_depth(), BootstrappingParameters::cheby_depth(24) + 1);
		assert!(params.validate(15).is_ok());
		assert!(params.validate(14).is_err());
	}
}
