use crate::{Error, Result};

/// A ring element in double-CRT representation: one row of `n` coefficients
/// per prime of the basis. Whether the rows are in coefficient or NTT form,
/// and whether they carry a Montgomery factor, is tracked by the operations
/// applied to the polynomial, not by the polynomial itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Poly {
	pub coeffs: Vec<Vec<u64>>,
}

impl Poly {
	/// Allocates a zero polynomial with `limbs` rows of `n` coefficients.
	pub fn new(limbs: usize, n: usize) -> Self {
		Poly {
			coeffs: vec![vec![0u64; n]; limbs],
		}
	}

	/// Number of coefficients per row.
	pub fn degree(&self) -> usize {
		self.coeffs.first().map_or(0, Vec::len)
	}

	/// Number of CRT rows.
	pub fn limbs(&self) -> usize {
		self.coeffs.len()
	}

	/// Sets every coefficient to zero.
	pub fn zero(&mut self) {
		for row in self.coeffs.iter_mut() {
			row.fill(0);
		}
	}

	/// Copies the rows of `other` into this polynomial. Rows beyond
	/// `other`'s limb count are left untouched.
	pub fn copy_from(&mut self, other: &Poly) {
		for (dst, src) in self.coeffs.iter_mut().zip(&other.coeffs) {
			dst.copy_from_slice(src);
		}
	}

	/// Serializes the polynomial: one byte of log2(n), one byte of limb
	/// count, then every row as big-endian u64 words.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let n = self.degree();
		let limbs = self.limbs();
		if limbs == 0 || limbs > 0xFF {
			return Err(Error::InvalidEncoding("limb count must be in 1..=255"));
		}
		if !n.is_power_of_two() {
			return Err(Error::InvalidEncoding("degree must be a power of two"));
		}
		let mut data = Vec::with_capacity(2 + limbs * n * 8);
		data.push(n.trailing_zeros() as u8);
		data.push(limbs as u8);
		for row in &self.coeffs {
			for c in row {
				data.extend_from_slice(&c.to_be_bytes());
			}
		}
		Ok(data)
	}

	/// Deserializes a polynomial written by [`Poly::to_bytes`].
	pub fn from_bytes(data: &[u8]) -> Result<Self> {
		if data.len() < 2 {
			return Err(Error::InvalidEncoding("truncated header"));
		}
		let log_n = data[0];
		if log_n > 16 {
			return Err(Error::InvalidEncoding("degree byte out of range"));
		}
		let n = 1usize << log_n;
		let limbs = data[1] as usize;
		if limbs == 0 {
			return Err(Error::InvalidEncoding("limb count must be nonzero"));
		}
		if data.len() - 2 != limbs * n * 8 {
			return Err(Error::InvalidEncoding("length does not match header"));
		}
		let mut coeffs = vec![vec![0u64; n]; limbs];
		let mut at = 2;
		for row in coeffs.iter_mut() {
			for c in row.iter_mut() {
				*c = u64::from_be_bytes(data[at..at + 8].try_into().unwrap());
				at += 8;
			}
		}
		Ok(Poly { coeffs })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn serialization_round_trip() {
		let mut p = Poly::new(3, 32);
		for (i, row) in p.coeffs.iter_mut().enumerate() {
			for (j, c) in row.iter_mut().enumerate() {
				*c = (i as u64) << 32 | j as u64;
			}
		}
		let bytes = p.to_bytes().unwrap();
		assert_eq!(bytes.len(), 2 + 3 * 32 * 8);
		assert_eq!(bytes[0], 5);
		assert_eq!(bytes[1], 3);
		assert_eq!(Poly::from_bytes(&bytes).unwrap(), p);
	}

	#[test]
	fn rejects_malformed_encodings() {
		let p = Poly::new(1, 16);
		let mut bytes = p.to_bytes().unwrap();

		// Truncated payload.
		bytes.pop();
		assert!(Poly::from_bytes(&bytes).is_err());

		// Degree byte out of range.
		let mut bytes = p.to_bytes().unwrap();
		bytes[0] = 60;
		assert!(Poly::from_bytes(&bytes).is_err());

		// Too many limbs to declare.
		let wide = Poly::new(300, 16);
		assert!(wide.to_bytes().is_err());
	}
}
