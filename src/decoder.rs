use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::future::poll_fn;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
use indexmap::IndexMap;
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::buffer::StreamBuffer;
use crate::constants;
use crate::constraints::Constraints;
use crate::content_disposition::ContentDisposition;
use crate::helpers;
use crate::state::{CurrentField, DecoderState, StreamingStage};

/// Reconstructs fields and files from a `multipart/form-data` stream.
///
/// Parts can be pulled one at a time with [`next_part`](Decoder::next_part),
/// or the whole stream can be folded into a [`DecodedForm`] with
/// [`decode`](Decoder::decode), which writes file parts to the upload
/// directory of the [`Constraints`].
///
/// # Examples
///
/// ```
/// use multiform::Decoder;
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::once;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let form = Decoder::new(stream, "X-BOUNDARY").decode().await.unwrap();
///
/// assert_eq!(form.fields["my_text_field"], "abcd");
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Decoder {
    state: DecoderState,
    constraints: Constraints,
}

/// The fields and files of a decoded form, in the order they were received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedForm {
    /// Text values of parts without a file name, keyed by field name.
    pub fields: IndexMap<String, String>,
    /// Parts with a file name, keyed by field name or, when the part has no
    /// name, by file name.
    pub files: IndexMap<String, DecodedFile>,
}

/// A file part written to disk by [`Decoder::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    pub field_name: String,
    pub file_name: String,
    /// Where the file content was written.
    pub path: PathBuf,
    /// The declared `Content-Type`, `application/octet-stream` when absent.
    pub content_type: mime::Mime,
}

/// A single part of a decoded stream, with its content fully buffered.
#[derive(Debug, Clone)]
pub struct DecodedPart {
    idx: usize,
    headers: HeaderMap,
    name: Option<String>,
    file_name: Option<String>,
    content_type: Option<mime::Mime>,
    data: Bytes,
}

impl DecodedPart {
    fn new(field: CurrentField) -> DecodedPart {
        let content_type = field
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok());

        DecodedPart {
            idx: field.idx,
            headers: field.headers,
            name: field.content_disposition.field_name,
            file_name: field.content_disposition.file_name,
            content_type,
            data: field.data.freeze(),
        }
    }

    /// The `name` parameter of the part's `Content-Disposition`.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The `filename` parameter of the part's `Content-Disposition`.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.content_type.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The position of the part in the stream, starting at zero.
    pub fn index(&self) -> usize {
        self.idx
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// The content decoded as text with the part's `charset`, UTF-8 when
    /// none is declared.
    pub fn text(&self) -> String {
        self.text_with_charset("utf-8")
    }

    pub fn text_with_charset(&self, default_encoding: &str) -> String {
        let encoding_name = self
            .content_type()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str())
            .unwrap_or(default_encoding);

        let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);

        let (text, _, _) = encoding.decode(&self.data);

        match text {
            Cow::Owned(s) => s,
            Cow::Borrowed(s) => String::from(s),
        }
    }

    /// The content deserialized from JSON.
    #[cfg(feature = "json")]
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        serde_json::from_slice(&self.data).map_err(|err| crate::Error::DecodeJson(Arc::new(err)))
    }
}

impl Decoder {
    /// Construct a new `Decoder` instance with the given [`Bytes`] stream and
    /// the boundary.
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> Decoder
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        Decoder::new_with_constraints(stream, boundary, Constraints::default())
    }

    /// Construct a new `Decoder` instance with the given [`Bytes`] stream,
    /// the boundary and the constraints.
    pub fn new_with_constraints<S, O, E, B>(stream: S, boundary: B, constraints: Constraints) -> Decoder
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| {
                let err: Box<dyn std::error::Error + Send + Sync> = err.into();
                crate::Error::StreamReadFailed(Arc::from(err))
            });

        let state = DecoderState {
            buffer: StreamBuffer::new(stream, constraints.size_limit.whole_stream),
            boundary: boundary.into(),
            stage: StreamingStage::FindingFirstBoundary,
            next_field_idx: 0,
            curr_field: None,
        };

        Decoder { state, constraints }
    }

    /// Construct a new `Decoder` instance with the given [`AsyncRead`]
    /// reader and the boundary.
    pub fn with_reader<R, B>(reader: R, boundary: B) -> Decoder
    where
        R: AsyncRead + Send + 'static,
        B: Into<String>,
    {
        Decoder::new(ReaderStream::new(reader), boundary)
    }

    /// Construct a new `Decoder` instance with the given [`AsyncRead`]
    /// reader, the boundary and the constraints.
    pub fn with_reader_with_constraints<R, B>(reader: R, boundary: B, constraints: Constraints) -> Decoder
    where
        R: AsyncRead + Send + 'static,
        B: Into<String>,
    {
        Decoder::new_with_constraints(ReaderStream::new(reader), boundary, constraints)
    }

    /// Yields the next part if available.
    pub async fn next_part(&mut self) -> crate::Result<Option<DecodedPart>> {
        poll_fn(|cx| self.poll_next_part(cx)).await
    }

    /// Reads the whole stream into text fields and files written to the
    /// upload directory.
    pub async fn decode(mut self) -> crate::Result<DecodedForm> {
        let mut form = DecodedForm::default();

        while let Some(part) = self.next_part().await? {
            match part.file_name() {
                Some(file_name) => {
                    let field_name = part.name().unwrap_or(file_name).to_owned();
                    let path = persist(&self.constraints.upload_dir, &part).await?;

                    form.files.insert(
                        field_name.clone(),
                        DecodedFile {
                            field_name,
                            file_name: file_name.to_owned(),
                            path,
                            content_type: part
                                .content_type()
                                .cloned()
                                .unwrap_or(mime::APPLICATION_OCTET_STREAM),
                        },
                    );
                }
                None => match part.name() {
                    Some(name) => {
                        form.fields.insert(name.to_owned(), part.text());
                    }
                    None => log::warn!("skipping unnamed part {}", part.index()),
                },
            }
        }

        Ok(form)
    }

    fn poll_next_part(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<Option<DecodedPart>>> {
        let res = self.poll_stages(cx);

        if let Poll::Ready(Err(_)) = res {
            self.state.stage = StreamingStage::Eof;
        }

        res
    }

    fn poll_stages(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<Option<DecodedPart>>> {
        let state = &mut self.state;
        let constraints = &self.constraints;

        loop {
            if state.stage == StreamingStage::Eof {
                return Poll::Ready(Ok(None));
            }

            if let Err(err) = state.buffer.poll_stream(cx) {
                return Poll::Ready(Err(err));
            }

            let eof = state.buffer.eof;
            let pending_or_incomplete = || {
                if eof {
                    Poll::Ready(Err(crate::Error::IncompleteStream))
                } else {
                    Poll::Pending
                }
            };

            match state.stage {
                StreamingStage::FindingFirstBoundary => {
                    let boundary_deriv = format!("{}{}", constants::BOUNDARY_EXT, state.boundary);

                    if !state.buffer.skip_to(boundary_deriv.as_bytes()) {
                        return pending_or_incomplete();
                    }

                    drop(state.buffer.read_exact(boundary_deriv.len()));
                    state.stage = StreamingStage::DeterminingBoundaryType;
                }
                StreamingStage::ReadingBoundary => {
                    let boundary_deriv = format!("{}{}", constants::BOUNDARY_EXT, state.boundary);

                    match state.buffer.read_exact(boundary_deriv.len()) {
                        Some(bytes) if bytes == boundary_deriv.as_bytes() => {
                            state.stage = StreamingStage::DeterminingBoundaryType;
                        }
                        Some(_) => return Poll::Ready(Err(crate::Error::IncompleteStream)),
                        None => return pending_or_incomplete(),
                    }
                }
                StreamingStage::DeterminingBoundaryType => match state.buffer.read_exact(2) {
                    Some(ext) if ext == constants::BOUNDARY_EXT.as_bytes() => {
                        state.stage = StreamingStage::Eof;
                        return Poll::Ready(Ok(None));
                    }
                    Some(ext) if ext == constants::CRLF.as_bytes() => {
                        state.stage = StreamingStage::ReadingFieldHeaders;
                    }
                    Some(_) => return Poll::Ready(Err(crate::Error::IncompleteStream)),
                    None => return pending_or_incomplete(),
                },
                StreamingStage::ReadingFieldHeaders => {
                    let headers = if state.buffer.peek_exact(2) == Some(constants::CRLF.as_bytes()) {
                        drop(state.buffer.read_exact(2));
                        HeaderMap::new()
                    } else {
                        let header_bytes = match state.buffer.read_until(constants::CRLF_CRLF.as_bytes()) {
                            Some(bytes) => bytes,
                            None => return pending_or_incomplete(),
                        };

                        let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

                        match httparse::parse_headers(&header_bytes, &mut headers) {
                            Ok(httparse::Status::Complete((_, raw_headers))) => {
                                match helpers::convert_raw_headers_to_header_map(raw_headers) {
                                    Ok(headers) => headers,
                                    Err(err) => return Poll::Ready(Err(err)),
                                }
                            }
                            Ok(httparse::Status::Partial) => {
                                return Poll::Ready(Err(crate::Error::IncompleteHeaders));
                            }
                            Err(err) => return Poll::Ready(Err(crate::Error::ReadHeaderFailed(err))),
                        }
                    };

                    let content_disposition = ContentDisposition::parse(&headers);
                    let field_name = content_disposition.field_name.as_deref();

                    if !constraints.is_it_allowed(field_name) {
                        return Poll::Ready(Err(crate::Error::UnknownField {
                            field_name: field_name.map(|name| name.to_owned()),
                        }));
                    }

                    let size_limit = constraints.size_limit.extract_size_limit_for(field_name);
                    let idx = state.next_field_idx;
                    state.next_field_idx += 1;

                    state.curr_field = Some(CurrentField {
                        idx,
                        headers,
                        content_disposition,
                        data: BytesMut::new(),
                        size_limit,
                    });
                    state.stage = StreamingStage::ReadingFieldData;
                }
                StreamingStage::ReadingFieldData => {
                    let field = match state.curr_field.as_mut() {
                        Some(field) => field,
                        None => return Poll::Ready(Err(crate::Error::IncompleteStream)),
                    };

                    let field_name = field.content_disposition.field_name.as_deref();

                    match state.buffer.read_field_data(&state.boundary, field_name) {
                        Ok(Some((done, bytes))) => {
                            field.data.extend_from_slice(&bytes);

                            if field.data.len() as u64 > field.size_limit {
                                return Poll::Ready(Err(crate::Error::FieldSizeExceeded {
                                    limit: field.size_limit,
                                    field_name: field.content_disposition.field_name.clone(),
                                }));
                            }

                            if done {
                                state.stage = StreamingStage::ReadingBoundary;

                                if let Some(field) = state.curr_field.take() {
                                    return Poll::Ready(Ok(Some(DecodedPart::new(field))));
                                }
                            }
                        }
                        Ok(None) => return Poll::Pending,
                        Err(err) => return Poll::Ready(Err(err)),
                    }
                }
                StreamingStage::Eof => return Poll::Ready(Ok(None)),
            }
        }
    }
}

async fn persist(upload_dir: &Path, part: &DecodedPart) -> crate::Result<PathBuf> {
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|err| crate::Error::PersistFile {
            path: upload_dir.to_owned(),
            cause: Arc::new(err),
        })?;

    let path = upload_dir.join(format!(
        "{}{}",
        constants::UPLOADED_FILE_PREFIX,
        helpers::random_alphanumeric(constants::UPLOADED_FILE_RANDOM_LEN)
    ));

    tokio::fs::write(&path, part.bytes())
        .await
        .map_err(|err| crate::Error::PersistFile {
            path: path.clone(),
            cause: Arc::new(err),
        })?;

    log::debug!(
        "persisted {} bytes of part {} to {}",
        part.bytes().len(),
        part.index(),
        path.display()
    );

    Ok(path)
}
