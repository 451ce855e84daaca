use fhelix_ring::Poly;

use crate::Result;

/// A trait for converting objects into byte arrays.
pub trait ToBytes {
	/// Returns the object as a byte array.
	fn as_bytes(&self) -> Result<Vec<u8>>;
}

/// A trait for reconstructing objects from byte slices, given whatever
/// contextual state the object needs.
pub trait FromBytes {
	/// State used to deserialize an object from bytes.
	type State;
	/// Deserialize an object from the given bytes using the given state.
	fn from_bytes(state: &Self::State, bytes: &[u8]) -> Result<Self>
	where
		Self: Sized;
}

impl ToBytes for Poly {
	fn as_bytes(&self) -> Result<Vec<u8>> {
		Ok(self.to_bytes()?)
	}
}

impl FromBytes for Poly {
	type State = ();

	fn from_bytes(_state: &(), bytes: &[u8]) -> Result<Self> {
		Ok(Poly::from_bytes(bytes)?)
	}
}
