/// Errors produced while constructing or serializing ring-level objects.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	/// The ring degree is not a power of two, or is too small.
	#[error("ring degree must be a power of two >= 16, got {0}")]
	InvalidRingDegree(usize),

	/// A modulus does not support the negacyclic NTT for the ring degree.
	#[error("modulus {0} does not support an NTT of degree {1}")]
	NttUnsupported(u64, usize),

	/// A modulus is out of the supported range.
	#[error("modulus {0} must be an odd prime below 2^60")]
	InvalidModulus(u64),

	/// Not enough NTT-friendly primes of the requested size exist.
	#[error("could not generate {0} distinct {1}-bit NTT-friendly primes")]
	NotEnoughPrimes(usize, usize),

	/// A serialized polynomial header is malformed.
	#[error("invalid polynomial encoding: {0}")]
	InvalidEncoding(&'static str),

	/// Operand shapes are incompatible with the requested operation.
	#[error("operand of {0} limbs and degree {1} does not fit the ring")]
	ShapeMismatch(usize, usize),
}

/// The result type for ring operations.
pub type Result<T> = std::result::Result<T, Error>;
