use core::fmt;

/// The class of failure an [`Error`](crate::Error) represents.
///
/// Exactly one kind is attached to each error value. [`Kind::Other`] is the
/// default and means "not classified at this level": an error of kind `Other`
/// inherits the kind of the structured error it wraps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Unclassified error. This value is not printed in the error message.
    #[default]
    Other,
    /// Invalid operation for this type of item, usually bad input.
    Invalid,
    /// Permission denied.
    Permission,
    /// Item already exists, e.g. a token that was stored before.
    #[doc(alias = "Exist")]
    Duplicate,
    /// Item does not exist.
    NotFound,
    /// External I/O error such as a network failure.
    Io,
    /// Internal error or inconsistency.
    Internal,
    /// Link target does not exist.
    BrokenLink,
    /// Information withheld.
    Private,
}

impl Kind {
    /// Every kind, in wire-code order.
    pub const ALL: [Kind; 9] = [
        Kind::Other,
        Kind::Invalid,
        Kind::Permission,
        Kind::Duplicate,
        Kind::NotFound,
        Kind::Io,
        Kind::Internal,
        Kind::BrokenLink,
        Kind::Private,
    ];

    /// Returns the human-readable description used when rendering errors.
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Other => "other error",
            Kind::Invalid => "invalid operation",
            Kind::Permission => "permission denied",
            Kind::Duplicate => "item already exists",
            Kind::NotFound => "item does not exist",
            Kind::Io => "I/O error",
            Kind::Internal => "internal error",
            Kind::BrokenLink => "link target does not exist",
            Kind::Private => "information withheld",
        }
    }

    /// Stable numeric code used by the binary encoding.
    pub const fn code(self) -> u8 {
        match self {
            Kind::Other => 0,
            Kind::Invalid => 1,
            Kind::Permission => 2,
            Kind::Duplicate => 3,
            Kind::NotFound => 4,
            Kind::Io => 5,
            Kind::Internal => 6,
            Kind::BrokenLink => 7,
            Kind::Private => 8,
        }
    }

    /// Inverse of [`Kind::code`]. Returns `None` for unknown codes.
    pub const fn from_code(code: u64) -> Option<Self> {
        if code < Self::ALL.len() as u64 {
            Some(Self::ALL[code as usize])
        } else {
            None
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
