use std::fmt::{self, Debug, Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use derive_more::Display;

/// A boxed error as returned by a [`Transport`](crate::Transport).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A shareable error cause, so [`Error`] stays cheap to clone.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while building, streaming or decoding a
/// multipart body.
#[derive(Display, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An attached file couldn't be read. The whole multipart body is
    /// abandoned when this happens.
    #[display(fmt = "failed to read attachment '{}': {}", "path.display()", cause)]
    Attachment { path: PathBuf, cause: Arc<io::Error> },

    /// A [`Part`](crate::Part) was mutated in a state that doesn't allow it.
    #[display(fmt = "invalid part state: {}", _0)]
    InvalidState(&'static str),

    /// A header name given by the caller is not a valid HTTP header name.
    #[display(fmt = "invalid header name: {:?}", _0)]
    InvalidHeaderName(String),

    /// A header value given by the caller can't be put on the wire.
    #[display(fmt = "invalid value for header '{}'", name)]
    InvalidHeaderValue { name: String },

    /// The transport failed to deliver the request or its response.
    #[display(fmt = "transport failed: {}", _0)]
    Transport(SharedError),

    /// An unknown field is detected when decoder
    /// [`constraints`](crate::Constraints::allowed_fields) are added.
    #[display(fmt = "unknown field received: {}", "field_name.as_deref().unwrap_or(\"<unknown>\")")]
    UnknownField { field_name: Option<String> },

    /// The field data is found incomplete.
    #[display(
        fmt = "field '{}' received with incomplete data",
        "field_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    IncompleteFieldData { field_name: Option<String> },

    /// Couldn't read the field headers completely.
    #[display(fmt = "failed to read field complete headers")]
    IncompleteHeaders,

    /// Failed to read headers.
    #[display(fmt = "failed to read headers: {}", _0)]
    ReadHeaderFailed(httparse::Error),

    /// Failed to decode the field's raw header name to
    /// [`HeaderName`](http::header::HeaderName) type.
    #[display(fmt = "failed to decode field's raw header name: {:?} {}", name, cause)]
    DecodeHeaderName { name: String, cause: SharedError },

    /// Failed to decode the field's raw header value to
    /// [`HeaderValue`](http::header::HeaderValue) type.
    #[display(fmt = "failed to decode field's raw header value: {}", cause)]
    DecodeHeaderValue { value: Vec<u8>, cause: SharedError },

    /// Multipart stream is incomplete.
    #[display(fmt = "incomplete multipart stream")]
    IncompleteStream,

    /// The incoming field size exceeded the maximum limit.
    #[display(
        fmt = "field '{}' exceeded the maximum size limit: {} bytes",
        "field_name.as_deref().unwrap_or(\"<unknown>\")",
        limit
    )]
    FieldSizeExceeded { limit: u64, field_name: Option<String> },

    /// The incoming stream size exceeded the maximum limit.
    #[display(fmt = "stream size exceeded the maximum limit: {} bytes", limit)]
    StreamSizeExceeded { limit: u64 },

    /// Stream read failed.
    #[display(fmt = "stream read failed: {}", _0)]
    StreamReadFailed(SharedError),

    /// The `Content-Type` header is not `multipart/form-data`.
    #[display(fmt = "Content-Type is not multipart/form-data")]
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    #[display(fmt = "Failed to convert Content-Type to `mime::Mime` type: {}", _0)]
    DecodeContentType(SharedError),

    /// No boundary found in `Content-Type` header.
    #[display(fmt = "multipart boundary not found in Content-Type")]
    NoBoundary,

    /// A decoded file part couldn't be written to the upload directory.
    #[display(fmt = "failed to persist uploaded file '{}': {}", "path.display()", cause)]
    PersistFile { path: PathBuf, cause: Arc<io::Error> },

    /// Failed to encode a value as `JSON` in
    /// [`form.json_field()`](crate::Form::json_field) method.
    #[cfg(feature = "json")]
    #[display(fmt = "failed to encode field value as JSON: {}", _0)]
    EncodeJson(Arc<serde_json::Error>),

    /// Failed to decode the part data as `JSON` in
    /// [`part.json()`](crate::DecodedPart::json) method.
    #[cfg(feature = "json")]
    #[display(fmt = "failed to decode field data as JSON: {}", _0)]
    DecodeJson(Arc<serde_json::Error>),
}

impl Error {
    pub(crate) fn attachment(path: PathBuf, cause: io::Error) -> Error {
        Error::Attachment {
            path,
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn transport<E: Into<BoxError>>(cause: E) -> Error {
        let cause: BoxError = cause.into();
        Error::Transport(Arc::from(cause))
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Attachment { cause, .. } => Some(&**cause),
            Error::PersistFile { cause, .. } => Some(&**cause),
            Error::Transport(cause) => Some(&**cause),
            Error::StreamReadFailed(cause) => Some(&**cause),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
