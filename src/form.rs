use std::collections::VecDeque;
use std::convert::TryFrom;
use std::future::Future;
use std::mem;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::Stream;
use http::header::{self, HeaderMap, HeaderValue};

use crate::boundary::generate_boundary;
use crate::constants;
use crate::part::FinalizedPart;
use crate::resolver::{Filesystem, Resolver};
use crate::Part;

/// An ordered set of parts to be sent as one `multipart/form-data` body.
///
/// Fields, attachments and hand-built parts are emitted in the order they
/// were declared. Attachments are read concurrently once the body is
/// streamed, but a part is never emitted before every part declared ahead of
/// it.
///
/// # Examples
///
/// ```
/// use futures_util::stream::TryStreamExt;
/// use multiform::Form;
///
/// # async fn run() -> multiform::Result<()> {
/// let mut form = Form::with_boundary("X-BOUNDARY");
/// form.field("name", "tobi");
/// form.part().set_name("species")?.write("ferret")?;
///
/// let body = form
///     .into_stream()
///     .try_fold(Vec::new(), |mut body, chunk| async move {
///         body.extend_from_slice(&chunk);
///         Ok(body)
///     })
///     .await?;
///
/// assert!(body.ends_with(b"ferret\r\n--X-BOUNDARY--\r\n"));
/// # Ok(())
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run()).unwrap();
/// ```
#[derive(Debug)]
pub struct Form {
    boundary: String,
    parts: Vec<Part>,
    resolver: Resolver,
}

impl Default for Form {
    fn default() -> Self {
        Form::new()
    }
}

impl Form {
    /// Creates an empty form with a freshly generated boundary.
    pub fn new() -> Form {
        Form::with_boundary(generate_boundary())
    }

    /// Creates an empty form delimited by `boundary`.
    pub fn with_boundary<B: Into<String>>(boundary: B) -> Form {
        Form {
            boundary: boundary.into(),
            parts: Vec::new(),
            resolver: Resolver::default(),
        }
    }

    /// Reads attachments from `fs` instead of the local filesystem.
    pub fn set_filesystem(&mut self, fs: Arc<dyn Filesystem>) -> &mut Form {
        self.resolver = Resolver::new(fs);
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The `Content-Type` value describing this form.
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", mime::MULTIPART_FORM_DATA, self.boundary)
    }

    /// The number of declared parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Appends a `form-data` field named `name` with the given value.
    pub fn field<N: Into<String>, V: AsRef<[u8]>>(&mut self, name: N, value: V) -> &mut Form {
        self.parts.push(Part::field(name, value.as_ref()));
        self
    }

    /// Appends a field holding `value` serialized as JSON.
    #[cfg(feature = "json")]
    pub fn json_field<T: serde::Serialize + ?Sized>(&mut self, name: &str, value: &T) -> crate::Result<&mut Form> {
        let json = serde_json::to_vec(value).map_err(|err| crate::Error::EncodeJson(Arc::new(err)))?;

        let mut part = Part::new();
        part.set_name(name)?
            .set_header(header::CONTENT_TYPE.as_str(), mime::APPLICATION_JSON.as_ref())?
            .write(json)?;
        self.parts.push(part);

        Ok(self)
    }

    /// Appends the file at `path`, named after its base name.
    pub fn attach<P: AsRef<Path>>(&mut self, path: P) -> &mut Form {
        self.parts.push(Part::file(path, None));
        self
    }

    /// Appends the file at `path` under the name `file_name`.
    pub fn attach_as<P: AsRef<Path>>(&mut self, path: P, file_name: &str) -> &mut Form {
        self.parts.push(Part::file(path, Some(file_name)));
        self
    }

    /// Appends an empty part and returns it for manual configuration.
    pub fn part(&mut self) -> &mut Part {
        let idx = self.parts.len();
        self.parts.push(Part::new());
        &mut self.parts[idx]
    }

    /// Makes `headers` describe this form.
    ///
    /// A missing `Content-Type` is set to `multipart/form-data` with the
    /// form's boundary. A `multipart/*` type without a boundary gets the
    /// boundary parameter appended, and one that already has a boundary is
    /// kept while the form adopts that boundary. Any other type is left as
    /// the caller set it.
    pub fn negotiate_content_type(&mut self, headers: &mut HeaderMap) -> crate::Result<()> {
        let existing = headers.get(header::CONTENT_TYPE).map(|val| {
            val.to_str()
                .ok()
                .and_then(|raw| raw.parse::<mime::Mime>().ok().map(|m| (raw.to_owned(), m)))
        });

        let value = match existing {
            None => self.content_type(),
            Some(Some((raw, m))) if m.type_() == mime::MULTIPART => match m.get_param(mime::BOUNDARY) {
                Some(boundary) => {
                    self.boundary = boundary.as_str().to_owned();
                    return Ok(());
                }
                None => format!("{}; boundary={}", raw.trim_end().trim_end_matches(';'), self.boundary),
            },
            Some(_) => {
                log::warn!("leaving a non-multipart Content-Type on a multipart body untouched");
                return Ok(());
            }
        };

        let value = HeaderValue::try_from(value).map_err(|_| crate::Error::InvalidHeaderValue {
            name: header::CONTENT_TYPE.as_str().to_owned(),
        })?;
        headers.insert(header::CONTENT_TYPE, value);

        Ok(())
    }

    /// Turns the form into a stream of encoded body chunks.
    pub fn into_stream(self) -> FormStream {
        let resolver = self.resolver;

        let slots = self
            .parts
            .into_iter()
            .map(|part| {
                if part.pending_path().is_some() {
                    Slot::Resolving(resolver.resolve_part(part))
                } else {
                    Slot::Ready(part)
                }
            })
            .collect();

        FormStream {
            boundary: self.boundary,
            slots,
            cursor: 0,
            queued: VecDeque::new(),
            done: false,
        }
    }
}

enum Slot {
    Ready(Part),
    Resolving(BoxFuture<'static, crate::Result<Part>>),
    Emitted,
}

/// The encoded body of a [`Form`], produced chunk by chunk.
///
/// Every part still being read is driven on each poll; `cursor` only moves
/// past a slot once that slot holds a ready part. The first attachment
/// failure ends the stream with that error, dropping all reads still in
/// flight.
pub struct FormStream {
    boundary: String,
    slots: Vec<Slot>,
    cursor: usize,
    queued: VecDeque<Bytes>,
    done: bool,
}

impl FormStream {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    fn poll_resolving(&mut self, cx: &mut Context<'_>) -> crate::Result<()> {
        for slot in &mut self.slots[self.cursor..] {
            if let Slot::Resolving(read) = slot {
                match read.as_mut().poll(cx) {
                    Poll::Ready(Ok(part)) => *slot = Slot::Ready(part),
                    Poll::Ready(Err(err)) => return Err(err),
                    Poll::Pending => {}
                }
            }
        }

        Ok(())
    }

    fn encode(&mut self, part: FinalizedPart) -> Bytes {
        let mut head = BytesMut::with_capacity(
            constants::BOUNDARY_EXT.len() + self.boundary.len() + constants::CRLF.len() + part.head().len(),
        );
        head.extend_from_slice(constants::BOUNDARY_EXT.as_bytes());
        head.extend_from_slice(self.boundary.as_bytes());
        head.extend_from_slice(constants::CRLF.as_bytes());
        head.extend_from_slice(part.head());

        if !part.body().is_empty() {
            self.queued.push_back(part.body().clone());
        }
        self.queued.push_back(Bytes::from_static(constants::CRLF.as_bytes()));

        head.freeze()
    }

    fn closing_delimiter(&self) -> Bytes {
        Bytes::from(format!(
            "{}{}{}{}",
            constants::BOUNDARY_EXT,
            self.boundary,
            constants::BOUNDARY_EXT,
            constants::CRLF
        ))
    }

    fn abort(&mut self, err: &crate::Error) {
        log::debug!("abandoning multipart body after part {}: {}", self.cursor, err);

        self.slots.clear();
        self.queued.clear();
        self.done = true;
    }
}

impl Stream for FormStream {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(chunk) = this.queued.pop_front() {
            return Poll::Ready(Some(Ok(chunk)));
        }

        if this.done {
            return Poll::Ready(None);
        }

        if let Err(err) = this.poll_resolving(cx) {
            this.abort(&err);
            return Poll::Ready(Some(Err(err)));
        }

        if this.cursor == this.slots.len() {
            this.done = true;
            return Poll::Ready(Some(Ok(this.closing_delimiter())));
        }

        match mem::replace(&mut this.slots[this.cursor], Slot::Emitted) {
            Slot::Ready(mut part) => {
                log::trace!("emitting part {} of {}", this.cursor + 1, this.slots.len());
                this.cursor += 1;

                match part.finalize() {
                    Ok(finalized) => Poll::Ready(Some(Ok(this.encode(finalized)))),
                    Err(err) => {
                        this.abort(&err);
                        Poll::Ready(Some(Err(err)))
                    }
                }
            }
            slot => {
                this.slots[this.cursor] = slot;
                Poll::Pending
            }
        }
    }
}
