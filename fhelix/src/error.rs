/// A type representing all errors that can occur in fhelix.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
	/// Operand degrees are incompatible with the operation.
	#[error("receiver degree {got} is smaller than the required degree {required}")]
	DegreeTooSmall {
		/// Degree the operation needs.
		required: usize,
		/// Degree the receiver has.
		got: usize,
	},

	/// Both sides of a binary operation are plaintexts.
	#[error("at least one operand must be a ciphertext")]
	PlaintextOnlyOperands,

	/// An operation requires canonical degree-1 ciphertexts.
	#[error("operation requires degree-1 ciphertexts, got degree {0}")]
	NotCanonicalDegree(usize),

	/// Operand levels differ.
	#[error("operand levels {0} and {1} do not match")]
	LevelMismatch(usize, usize),

	/// Operand scales differ beyond tolerance.
	#[error("operand scales {0} and {1} do not match")]
	ScaleMismatch(f64, f64),

	/// A ciphertext has no levels left for the operation.
	#[error("not enough levels left (level {0})")]
	LevelExhausted(usize),

	/// The requested rotation has no switching key and cannot be reached
	/// through power-of-two rotations.
	#[error("no rotation key for shift {0}")]
	MissingRotationKey(usize),

	/// The relinearization key covers fewer degrees than the ciphertext.
	#[error("relinearization key supports degree {supported}, ciphertext has degree {got}")]
	MissingRelinearizationKey {
		/// Largest degree the key can reduce.
		supported: usize,
		/// Degree of the ciphertext.
		got: usize,
	},

	/// The conjugation (row-swap) key is absent.
	#[error("no conjugation key")]
	MissingConjugationKey,

	/// A switching key has the wrong number of gadget blocks.
	#[error("switching key has {got} gadget blocks, expected {expected}")]
	SwitchingKeyMismatch {
		/// Blocks the parameters call for.
		expected: usize,
		/// Blocks the key carries.
		got: usize,
	},

	/// Construction-time parameter inconsistency.
	#[error("invalid parameters: {0}")]
	InvalidParameters(String),

	/// Serialized bytes are malformed.
	#[error("invalid encoding: {0}")]
	InvalidEncoding(&'static str),

	/// Error bubbled up from the ring layer.
	#[error(transparent)]
	Ring(#[from] fhelix_ring::Error),
}

/// The result type for fhelix operations.
pub type Result<T> = std::result::Result<T, Error>;
