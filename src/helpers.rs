use std::borrow::Cow;
use std::convert::TryFrom;
use std::sync::Arc;

use bytes::BytesMut;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use httparse::Header;

use crate::constants;

pub(crate) fn convert_raw_headers_to_header_map(raw_headers: &[Header]) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw_headers.len());

    for raw_header in raw_headers {
        let name = HeaderName::try_from(raw_header.name).map_err(|err| crate::Error::DecodeHeaderName {
            name: raw_header.name.to_owned(),
            cause: Arc::new(err),
        })?;

        let value = HeaderValue::try_from(raw_header.value).map_err(|err| crate::Error::DecodeHeaderValue {
            value: raw_header.value.to_owned(),
            cause: Arc::new(err),
        })?;

        headers.insert(name, value);
    }

    Ok(headers)
}

/// Renders a lowercase header name the way it is usually written on the
/// wire, e.g. `content-disposition` becomes `Content-Disposition`.
pub(crate) fn title_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;

    for ch in name.chars() {
        if upper {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        upper = ch == '-';
    }

    out
}

pub(crate) fn put_header_line(buf: &mut BytesMut, name: &str, value: &[u8]) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value);
    buf.extend_from_slice(constants::CRLF.as_bytes());
}

/// Escapes a `Content-Disposition` parameter value so it survives inside a
/// quoted string: `"` and control characters are percent-encoded.
///
/// This is the HTML form submission encoding browsers use. `%` itself is
/// left alone, so the encoding can't be reversed and decoders, ours
/// included, keep received names as they are.
pub(crate) fn escape_param(value: &str) -> Cow<'_, str> {
    if !value.chars().any(|ch| ch == '"' || ch.is_ascii_control()) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        if ch == '"' || ch.is_ascii_control() {
            out.push_str(&format!("%{:02X}", ch as u32));
        } else {
            out.push(ch);
        }
    }

    Cow::Owned(out)
}

pub(crate) fn random_alphanumeric(len: usize) -> String {
    std::iter::repeat_with(fastrand::alphanumeric).take(len).collect()
}
