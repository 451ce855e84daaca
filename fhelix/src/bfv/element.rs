use std::sync::Arc;

use fhelix_ring::Poly;

use crate::serialization::{FromBytes, ToBytes};
use crate::{Error, Result};

use super::parameters::BfvParameters;

/// A view over the polynomials of a BFV operand. Plaintexts have degree 0,
/// ciphertexts degree >= 1; the few binary entry points of the evaluator
/// dispatch on this trait instead of on concrete types.
pub trait Operand {
	/// The polynomials c_0 .. c_d.
	fn polys(&self) -> &[Poly];

	/// The operand degree d.
	fn degree(&self) -> usize {
		self.polys().len() - 1
	}
}

/// A BFV ciphertext: polynomials c_0 .. c_d over R_Q, in coefficient form
/// at rest.
#[derive(Debug, Clone)]
pub struct Ciphertext {
	pub(crate) params: Arc<BfvParameters>,
	pub(crate) value: Vec<Poly>,
}

impl Ciphertext {
	/// Allocates a zero ciphertext of the given degree.
	pub fn new(params: &Arc<BfvParameters>, degree: usize) -> Self {
		Ciphertext {
			params: params.clone(),
			value: (0..=degree).map(|_| params.ring_q.new_poly()).collect(),
		}
	}

	pub fn degree(&self) -> usize {
		self.value.len() - 1
	}

	/// Grows or truncates to the requested degree; new polynomials are zero.
	pub(crate) fn resize(&mut self, degree: usize) {
		while self.value.len() < degree + 1 {
			self.value.push(self.params.ring_q.new_poly());
		}
		self.value.truncate(degree + 1);
	}
}

impl Operand for Ciphertext {
	fn polys(&self) -> &[Poly] {
		&self.value
	}
}

/// A BFV plaintext: a single polynomial carrying the message scaled by
/// floor(Q * m / t), so it composes with ciphertexts in every evaluator
/// operation.
#[derive(Debug, Clone)]
pub struct Plaintext {
	pub(crate) params: Arc<BfvParameters>,
	pub(crate) value: [Poly; 1],
}

impl Plaintext {
	pub(crate) fn from_poly(params: &Arc<BfvParameters>, poly: Poly) -> Self {
		Plaintext {
			params: params.clone(),
			value: [poly],
		}
	}

	/// The underlying scaled polynomial.
	pub fn poly(&self) -> &Poly {
		&self.value[0]
	}
}

impl Operand for Plaintext {
	fn polys(&self) -> &[Poly] {
		&self.value
	}
}

impl ToBytes for Ciphertext {
	fn as_bytes(&self) -> Result<Vec<u8>> {
		if self.value.len() > 0xFF {
			return Err(Error::InvalidEncoding("ciphertext degree too large"));
		}
		let mut data = vec![self.value.len() as u8];
		for p in &self.value {
			data.extend_from_slice(&p.to_bytes()?);
		}
		Ok(data)
	}
}

impl FromBytes for Ciphertext {
	type State = Arc<BfvParameters>;

	fn from_bytes(params: &Self::State, bytes: &[u8]) -> Result<Self> {
		if bytes.is_empty() {
			return Err(Error::InvalidEncoding("empty ciphertext"));
		}
		let count = bytes[0] as usize;
		if count == 0 {
			return Err(Error::InvalidEncoding("ciphertext must hold polynomials"));
		}
		let mut value = Vec::with_capacity(count);
		let mut at = 1;
		for _ in 0..count {
			if bytes.len() < at + 2 {
				return Err(Error::InvalidEncoding("truncated polynomial header"));
			}
			if bytes[at] > 16 {
				return Err(Error::InvalidEncoding("degree byte out of range"));
			}
			let n = 1usize << bytes[at];
			let limbs = bytes[at + 1] as usize;
			let len = 2 + n * limbs * 8;
			if bytes.len() < at + len {
				return Err(Error::InvalidEncoding("truncated polynomial body"));
			}
			value.push(Poly::from_bytes(&bytes[at..at + len])?);
			at += len;
		}
		if at != bytes.len() {
			return Err(Error::InvalidEncoding("trailing bytes"));
		}
		Ok(Ciphertext {
			params: params.clone(),
			value,
		})
	}
}
