//! Streaming `multipart/form-data` request bodies for tokio.rs in Rust.
//!
//! A [`Form`] collects text fields, file attachments and hand-built
//! [`Part`]s, then encodes them as a stream of [`Bytes`](bytes::Bytes)
//! chunks. Attachments are read concurrently while the body is streamed, but
//! parts always go out in the order they were declared. A [`Request`] wraps
//! a form for delivery through any [`Transport`], and a [`Decoder`] reads a
//! `multipart/form-data` stream back into fields and files.
//!
//! # Examples
//!
//! ```
//! use futures_util::stream::TryStreamExt;
//! use multiform::{Decoder, Form};
//!
//! # async fn run() -> multiform::Result<()> {
//! let mut form = Form::new();
//! form.field("name", "Tobi").field("species", "ferret");
//!
//! let boundary = form.boundary().to_owned();
//! let decoded = Decoder::new(form.into_stream(), boundary).decode().await?;
//!
//! assert_eq!(decoded.fields["name"], "Tobi");
//! assert_eq!(decoded.fields["species"], "ferret");
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run()).unwrap();
//! ```
//!
//! ## Optional features
//!
//! **`json`**: Adds [`Form::json_field`] and [`DecodedPart::json`] to send
//! and read parts as `JSON`.

pub use boundary::generate_boundary;
pub use constraints::Constraints;
pub use decoder::{DecodedFile, DecodedForm, DecodedPart, Decoder};
pub use error::{BoxError, Error, SharedError};
pub use form::{Form, FormStream};
pub use part::{FileMeta, FinalizedPart, Part};
pub use request::{Body, Request, Response, ResponseBody, Transport};
pub use resolver::{Filesystem, Resolver, TokioFs};
pub use size_limit::SizeLimit;

mod boundary;
mod buffer;
mod constants;
mod constraints;
mod content_disposition;
mod decoder;
mod error;
mod form;
mod helpers;
mod part;
mod request;
mod resolver;
mod size_limit;
mod state;

/// A Result type often returned from methods that can have `multiform` errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// # Examples
///
/// ```
/// # fn run() {
/// let content_type = "multipart/form-data; boundary=ABCDEFG";
///
/// assert_eq!(multiform::parse_boundary(content_type), Ok("ABCDEFG".to_owned()));
/// # }
/// # run();
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(|err| Error::DecodeContentType(std::sync::Arc::new(err)))?;

    if !(m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA) {
        return Err(Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(Error::NoBoundary)
}
