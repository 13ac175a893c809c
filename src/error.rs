use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants follow the failure modes of heap introspection: data-integrity failures
/// (short reads, corrupt structures) always surface to the caller, while lookups that have a
/// well-defined "absent" meaning (no renaming-map entry, no visualizer) never produce an error
/// in the first place.
///
/// # Error Categories
///
/// ## Data integrity
/// - [`Error::ShortRead`] - The target returned fewer bytes than requested
/// - [`Error::InvalidAddress`] - The address is not mapped in the target
/// - [`Error::Malformed`] - Corrupt or inconsistent heap / certificate data
/// - [`Error::UnresolvedType`] - The unresolved-type sentinel was used as a real type
///
/// ## Input contract
/// - [`Error::FieldNotFound`] - A field name could not be resolved
/// - [`Error::NullReference`] - Member access on a null reference
/// - [`Error::IndexOutOfRange`] - Array index outside `0..length`
/// - [`Error::NotAnArray`] - Array operation on a non-array object
/// - [`Error::NotSimpleValue`] - Simple-value operation on a complex object
/// - [`Error::TypeMismatch`] - Narrowing conversion to the wrong kind
/// - [`Error::UnsupportedType`] - Field type that is neither reference, primitive nor struct
///
/// ## Control and external
/// - [`Error::Cancelled`] - A full heap scan was interrupted by the caller
/// - [`Error::Xml`], [`Error::FileError`], [`Error::InvalidPattern`] - Wrapped external errors
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::Error;
///
/// fn describe(err: &Error) -> &'static str {
///     match err {
///         Error::FieldNotFound { .. } => "caller asked for a field that does not exist",
///         Error::ShortRead { .. } => "the dump is missing memory for this object",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The data is damaged and could not be interpreted.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing a byte buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Fewer bytes than requested could be read from the target.
    ///
    /// Partial reads are never zero-filled or truncated.
    #[error("Expected to read {expected} bytes at 0x{address:X} and actually read {actual}")]
    ShortRead {
        /// Start of the attempted read
        address: u64,
        /// Number of bytes requested
        expected: usize,
        /// Number of bytes the target delivered
        actual: usize,
    },

    /// The address is not backed by any memory in the target.
    #[error("Address 0x{0:X} is not mapped in the target")]
    InvalidAddress(u64),

    /// The unresolved-type sentinel was used where a real type is required.
    #[error("Type at 0x{address:X} could not be resolved")]
    UnresolvedType {
        /// Address of the object whose type could not be resolved
        address: u64,
    },

    /// A field name could not be resolved on the given type.
    #[error("Field '{field}' not found on type '{type_name}'")]
    FieldNotFound {
        /// Display name of the type that was searched
        type_name: String,
        /// The requested field name
        field: String,
    },

    /// A field or element was requested from a null reference.
    #[error("Cannot access '{member}' on a null '{type_name}' reference")]
    NullReference {
        /// Display name of the declared type
        type_name: String,
        /// The requested member
        member: String,
    },

    /// An array index was outside the runtime-reported bounds.
    #[error("Array index '{index}' is not between 0 and '{length}'")]
    IndexOutOfRange {
        /// The requested index
        index: i64,
        /// The array length reported by the runtime
        length: usize,
    },

    /// An array operation was attempted on a non-array object.
    #[error("Type '{0}' is not an array")]
    NotAnArray(String),

    /// A simple-value operation was attempted on a complex object.
    #[error("SimpleValue not available for type '{0}'")]
    NotSimpleValue(String),

    /// A narrowing conversion was requested for a value of a different kind.
    #[error("Cannot convert '{actual}' to {expected}")]
    TypeMismatch {
        /// The requested target kind
        expected: &'static str,
        /// Description of the value that was found
        actual: String,
    },

    /// The field type is neither an object reference, a primitive nor a value type.
    #[error("Object type not supported '{0}'")]
    UnsupportedType(String),

    /// A full heap scan was interrupted by the caller.
    #[error("Operation was cancelled")]
    Cancelled,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The renaming map is not well-formed XML.
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    /// A visualizer or wildcard pattern failed to compile.
    #[error("{0}")]
    InvalidPattern(#[from] regex::Error),
}
