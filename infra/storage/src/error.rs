use std::borrow::Cow;

/// Errors produced by the file storage manager.
#[limbo_derive::limbo_error]
pub enum StorageError {
    /// A completed file already sits under the requested name. Nothing was modified.
    #[error("Destination already exists{}: {message}", format_context(.context))]
    DestinationExists { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Canonicalizing a name twice gave two different results.
    #[error("File name canonicalization failed{}: {message}", format_context(.context))]
    NameCanonicalization { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("File not found{}: {message}", format_context(.context))]
    FileNotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A lifecycle call that does not fit the current sweep state.
    #[error("Invalid storage state{}: {message}", format_context(.context))]
    InvalidState { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Settings the manager cannot run with, such as a zero poll interval.
    #[error("Invalid storage configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Hardware I/O failure{}: {source}", format_context(.context))]
    Io { source: std::io::Error, context: Option<Cow<'static, str>> },

    #[error("Internal storage fault{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl StorageError {
    /// `true` for the write conflict callers are expected to resolve themselves.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::DestinationExists { .. })
    }

    /// `true` when the named file does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound { .. })
    }
}
