use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::constants;
use crate::content_disposition::ContentDisposition;
use crate::helpers;

/// One segment of a multipart body: a set of headers plus its content.
///
/// A part is created through [`Form::part`](crate::Form::part) (or the
/// [`Request`](crate::Request) equivalents) and configured with the setter
/// methods. Headers can only change until content is written or the part is
/// finalized; after that every header setter fails with
/// [`Error::InvalidState`](crate::Error::InvalidState).
///
/// # Examples
///
/// ```
/// use multiform::Part;
///
/// # fn run() -> multiform::Result<()> {
/// let mut part = Part::new();
/// part.set_header("Content-Type", "image/png")?
///     .set_header("Content-Disposition", r#"attachment; filename="image.png""#)?
///     .write("some image data")?;
///
/// assert_eq!(part.name(), Some("image.png"));
/// assert_eq!(part.media_type(), mime::IMAGE_PNG);
/// # Ok(())
/// # }
/// # run().unwrap();
/// ```
#[derive(Debug)]
pub struct Part {
    disposition: Option<ContentDisposition>,
    content_type: Option<String>,
    headers: HeaderMap,
    content: Content,
    written: bool,
    finalized: Option<FinalizedPart>,
}

#[derive(Debug)]
enum Content {
    Literal(BytesMut),
    PendingFile { path: PathBuf },
    ResolvedFile { bytes: Bytes, meta: FileMeta },
}

/// What is known about a file once an attachment has been read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// The size of the file in bytes.
    pub len: u64,
    /// The media type inferred from the file name.
    pub media_type: mime::Mime,
}

/// The frozen, ready-to-serialize form of a [`Part`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedPart {
    head: Bytes,
    body: Bytes,
}

impl FinalizedPart {
    /// The header block: one `Name: value\r\n` line per header followed by a
    /// blank line.
    pub fn head(&self) -> &Bytes {
        &self.head
    }

    /// The part content.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The header block immediately followed by the content.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.head.len() + self.body.len());
        buf.extend_from_slice(&self.head);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}

impl Default for Part {
    fn default() -> Self {
        Part::new()
    }
}

impl Part {
    /// Creates an empty part with no headers and no content.
    pub fn new() -> Part {
        Part {
            disposition: None,
            content_type: None,
            headers: HeaderMap::new(),
            content: Content::Literal(BytesMut::new()),
            written: false,
            finalized: None,
        }
    }

    /// Creates a `form-data` part named `name` holding `value`.
    pub fn field<N: Into<String>>(name: N, value: &[u8]) -> Part {
        let mut part = Part::new();

        let mut disposition = ContentDisposition::new(constants::DISPOSITION_FORM_DATA);
        disposition.field_name = Some(name.into());
        part.disposition = Some(disposition);

        if let Content::Literal(buf) = &mut part.content {
            buf.extend_from_slice(value);
        }
        part.written = true;

        part
    }

    /// Creates a part backed by the file at `path`, whose content is read
    /// later by a [`Resolver`](crate::Resolver).
    ///
    /// The part is named after `file_name`, or after the base name of `path`
    /// when no name is given. Its `Content-Type` is inferred from the
    /// extension of `path`.
    pub fn file<P: AsRef<Path>>(path: P, file_name: Option<&str>) -> Part {
        let path = path.as_ref();
        let file_name = match file_name {
            Some(name) => base_name(name),
            None => base_name(&path.to_string_lossy()),
        };

        let mut part = Part::new();
        part.content_type = Some(infer_media_type(&path.to_string_lossy()).to_string());

        let mut disposition = ContentDisposition::new(constants::DISPOSITION_FORM_DATA);
        disposition.field_name = Some(file_name.clone());
        disposition.file_name = Some(file_name);
        part.disposition = Some(disposition);

        part.content = Content::PendingFile { path: path.to_owned() };
        part
    }

    /// Sets a header, overwriting any previous value of the same
    /// (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: &str) -> crate::Result<&mut Part> {
        self.ensure_headers_mutable()?;

        let name = HeaderName::try_from(name).map_err(|_| crate::Error::InvalidHeaderName(name.to_owned()))?;
        let value = HeaderValue::try_from(value).map_err(|_| crate::Error::InvalidHeaderValue {
            name: name.as_str().to_owned(),
        })?;

        if name == header::CONTENT_DISPOSITION {
            let value = std::str::from_utf8(value.as_bytes()).map_err(|_| crate::Error::InvalidHeaderValue {
                name: name.as_str().to_owned(),
            })?;
            self.disposition = Some(ContentDisposition::parse_value(value));
        } else if name == header::CONTENT_TYPE {
            let value = value.to_str().map_err(|_| crate::Error::InvalidHeaderValue {
                name: name.as_str().to_owned(),
            })?;
            self.content_type = Some(value.to_owned());
        } else {
            self.headers.insert(name, value);
        }

        Ok(self)
    }

    /// Sets `Content-Disposition` to `form-data; name="<name>"`, keeping an
    /// existing `filename` parameter.
    pub fn set_name(&mut self, name: &str) -> crate::Result<&mut Part> {
        self.ensure_headers_mutable()?;

        let mut disposition = self
            .disposition
            .take()
            .unwrap_or_else(|| ContentDisposition::new(constants::DISPOSITION_FORM_DATA));
        disposition.disposition = constants::DISPOSITION_FORM_DATA.to_owned();
        disposition.field_name = Some(name.to_owned());
        disposition.raw = None;
        self.disposition = Some(disposition);

        Ok(self)
    }

    /// Sets the `filename` parameter of `Content-Disposition` to the base
    /// name of `path_or_name`.
    ///
    /// The disposition type defaults to `attachment` when no
    /// `Content-Disposition` was set yet, and `Content-Type` is inferred from
    /// the extension unless it was set explicitly.
    pub fn set_filename(&mut self, path_or_name: &str) -> crate::Result<&mut Part> {
        self.ensure_headers_mutable()?;

        let file_name = base_name(path_or_name);

        if self.content_type.is_none() {
            self.content_type = Some(infer_media_type(&file_name).to_string());
        }

        let mut disposition = self
            .disposition
            .take()
            .unwrap_or_else(|| ContentDisposition::new(constants::DISPOSITION_ATTACHMENT));
        disposition.file_name = Some(file_name);
        disposition.raw = None;
        self.disposition = Some(disposition);

        Ok(self)
    }

    /// Appends `chunk` to the part content.
    ///
    /// Fails for file-backed parts, whose content is the file itself, and
    /// for finalized parts.
    pub fn write<C: AsRef<[u8]>>(&mut self, chunk: C) -> crate::Result<&mut Part> {
        if self.finalized.is_some() {
            return Err(crate::Error::InvalidState("can't write to a finalized part"));
        }

        match &mut self.content {
            Content::Literal(buf) => buf.extend_from_slice(chunk.as_ref()),
            Content::PendingFile { .. } | Content::ResolvedFile { .. } => {
                return Err(crate::Error::InvalidState("can't write to a file-backed part"));
            }
        }

        self.written = true;
        Ok(self)
    }

    /// Freezes the part and returns its serializable form.
    ///
    /// A missing `Content-Disposition` is synthesized as `form-data`, and a
    /// missing `Content-Type` is inferred when the part carries a file name.
    /// Calling this again returns the same representation.
    pub fn finalize(&mut self) -> crate::Result<FinalizedPart> {
        if let Some(finalized) = &self.finalized {
            return Ok(finalized.clone());
        }

        let body = match &mut self.content {
            Content::Literal(buf) => buf.split().freeze(),
            Content::ResolvedFile { bytes, .. } => bytes.clone(),
            Content::PendingFile { .. } => {
                return Err(crate::Error::InvalidState("file-backed part hasn't been read yet"));
            }
        };

        let disposition = self
            .disposition
            .get_or_insert_with(|| ContentDisposition::new(constants::DISPOSITION_FORM_DATA));

        if self.content_type.is_none() {
            self.content_type = disposition
                .file_name
                .as_deref()
                .map(|file_name| infer_media_type(file_name).to_string());
        }

        let finalized = FinalizedPart {
            head: self.render_head(),
            body,
        };
        self.finalized = Some(finalized.clone());

        Ok(finalized)
    }

    /// The logical field name: the `name` parameter of `Content-Disposition`,
    /// falling back to the file name.
    pub fn name(&self) -> Option<&str> {
        self.disposition
            .as_ref()
            .and_then(|disposition| disposition.field_name.as_deref())
            .or_else(|| self.file_name())
    }

    /// The `filename` parameter of `Content-Disposition`.
    pub fn file_name(&self) -> Option<&str> {
        self.disposition
            .as_ref()
            .and_then(|disposition| disposition.file_name.as_deref())
    }

    /// The `Content-Type` header value, if one is set.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The media type of the content: the `Content-Type` header when it
    /// parses, otherwise inferred from the file name, otherwise
    /// `application/octet-stream`.
    pub fn media_type(&self) -> mime::Mime {
        self.content_type
            .as_deref()
            .and_then(|val| val.parse::<mime::Mime>().ok())
            .or_else(|| self.file_name().map(infer_media_type))
            .unwrap_or(mime::APPLICATION_OCTET_STREAM)
    }

    /// Headers other than `Content-Disposition` and `Content-Type`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Metadata of the backing file, once it has been read.
    pub fn file_meta(&self) -> Option<&FileMeta> {
        match &self.content {
            Content::ResolvedFile { meta, .. } => Some(meta),
            _ => None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    pub(crate) fn pending_path(&self) -> Option<&Path> {
        match &self.content {
            Content::PendingFile { path } => Some(path),
            _ => None,
        }
    }

    pub(crate) fn bind_file(&mut self, bytes: Bytes) -> crate::Result<()> {
        if self.pending_path().is_none() {
            return Err(crate::Error::InvalidState("part isn't waiting for a file"));
        }

        let meta = FileMeta {
            len: bytes.len() as u64,
            media_type: self.media_type(),
        };
        self.content = Content::ResolvedFile { bytes, meta };

        Ok(())
    }

    fn ensure_headers_mutable(&self) -> crate::Result<()> {
        if self.finalized.is_some() {
            return Err(crate::Error::InvalidState("headers can't change after the part is finalized"));
        }

        if self.written {
            return Err(crate::Error::InvalidState("headers can't change once content is written"));
        }

        if let Content::ResolvedFile { .. } = self.content {
            return Err(crate::Error::InvalidState("headers can't change once the file is read"));
        }

        Ok(())
    }

    fn render_head(&self) -> Bytes {
        let mut head = BytesMut::new();

        if let Some(disposition) = &self.disposition {
            helpers::put_header_line(&mut head, "Content-Disposition", disposition.render().as_bytes());
        }

        if let Some(content_type) = &self.content_type {
            helpers::put_header_line(&mut head, "Content-Type", content_type.as_bytes());
        }

        for (name, value) in self.headers.iter() {
            helpers::put_header_line(&mut head, &helpers::title_case(name.as_str()), value.as_bytes());
        }

        head.extend_from_slice(constants::CRLF.as_bytes());
        head.freeze()
    }
}

fn base_name(path_or_name: &str) -> String {
    Path::new(path_or_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_or_name.to_owned())
}

pub(crate) fn infer_media_type(file_name: &str) -> mime::Mime {
    mime_guess::from_path(file_name).first_or_octet_stream()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head_of(part: &mut Part) -> String {
        String::from_utf8(part.finalize().unwrap().head().to_vec()).unwrap()
    }

    #[test]
    fn test_field_part() {
        let mut part = Part::field("user[name]", b"tobi");
        let finalized = part.finalize().unwrap();

        assert_eq!(
            finalized.head(),
            &Bytes::from_static(b"Content-Disposition: form-data; name=\"user[name]\"\r\n\r\n")
        );
        assert_eq!(finalized.body(), &Bytes::from_static(b"tobi"));
        assert_eq!(part.name(), Some("user[name]"));
        assert_eq!(part.file_name(), None);
    }

    #[test]
    fn test_set_name_keeps_filename() {
        let mut part = Part::new();
        part.set_filename("path/to/my.txt").unwrap();
        part.set_name("upload").unwrap();

        assert_eq!(part.name(), Some("upload"));
        assert_eq!(part.file_name(), Some("my.txt"));
        assert_eq!(
            head_of(&mut part),
            "Content-Disposition: form-data; name=\"upload\"; filename=\"my.txt\"\r\nContent-Type: text/plain\r\n\r\n"
        );
    }

    #[test]
    fn test_set_filename_defaults_to_attachment() {
        let mut part = Part::new();
        part.set_filename("path/to/my.txt").unwrap().write("Tobi").unwrap();

        assert_eq!(part.name(), Some("my.txt"));
        assert_eq!(part.media_type(), mime::TEXT_PLAIN);
        assert_eq!(
            head_of(&mut part),
            "Content-Disposition: attachment; filename=\"my.txt\"\r\nContent-Type: text/plain\r\n\r\n"
        );
    }

    #[test]
    fn test_set_filename_keeps_explicit_content_type() {
        let mut part = Part::new();
        part.set_header("content-type", "application/x-custom")
            .unwrap()
            .set_filename("data.json")
            .unwrap();

        assert_eq!(part.content_type(), Some("application/x-custom"));
    }

    #[test]
    fn test_set_header_is_case_insensitive() {
        let mut part = Part::new();
        part.set_header("X-Trace", "a")
            .unwrap()
            .set_header("x-trace", "b")
            .unwrap()
            .write("data")
            .unwrap();

        assert_eq!(part.headers().len(), 1);
        assert_eq!(
            head_of(&mut part),
            "Content-Disposition: form-data\r\nX-Trace: b\r\n\r\n"
        );
    }

    #[test]
    fn test_headers_frozen_after_write() {
        let mut part = Part::new();
        part.write("random").unwrap();

        assert_eq!(
            part.set_header("Content-Type", "text/plain").err(),
            Some(crate::Error::InvalidState("headers can't change once content is written"))
        );
        assert!(part.set_name("late").is_err());
        assert!(part.set_filename("late.txt").is_err());
    }

    #[test]
    fn test_frozen_after_finalize() {
        let mut part = Part::new();
        part.set_name("a").unwrap();
        part.finalize().unwrap();

        assert!(part.is_finalized());
        assert!(part.set_header("Content-Type", "text/plain").is_err());
        assert!(part.write("x").is_err());
    }

    #[test]
    fn test_multiple_writes_concatenate() {
        let mut part = Part::new();
        part.set_header("Content-Type", "image/png")
            .unwrap()
            .set_header("Content-Disposition", r#"attachment; filename="another.png""#)
            .unwrap();

        part.write("random").unwrap();
        part.write("thing").unwrap();
        part.write(b"here").unwrap();

        let finalized = part.finalize().unwrap();
        assert_eq!(finalized.body(), &Bytes::from_static(b"randomthinghere"));
        assert_eq!(part.finalize().unwrap(), finalized);
    }

    #[test]
    fn test_finalize_synthesizes_defaults() {
        let mut part = Part::new();
        part.write("payload").unwrap();
        assert_eq!(head_of(&mut part), "Content-Disposition: form-data\r\n\r\n");

        let mut part = Part::new();
        part.set_header("Content-Disposition", r#"attachment; filename="page.html""#)
            .unwrap();
        assert_eq!(
            head_of(&mut part),
            "Content-Disposition: attachment; filename=\"page.html\"\r\nContent-Type: text/html\r\n\r\n"
        );
    }

    #[test]
    fn test_caller_disposition_is_kept_verbatim() {
        let mut part = Part::new();
        part.set_header("Content-Disposition", "form-data; name=user")
            .unwrap()
            .write("Tobi")
            .unwrap();

        assert_eq!(part.name(), Some("user"));
        assert_eq!(head_of(&mut part), "Content-Disposition: form-data; name=user\r\n\r\n");

        let mut part = Part::new();
        part.set_header(
            "Content-Disposition",
            "attachment; name=\"doc\"; filename*=UTF-8''na%C3%AFve.txt",
        )
        .unwrap();

        assert_eq!(part.name(), Some("doc"));
        assert_eq!(
            head_of(&mut part),
            "Content-Disposition: attachment; name=\"doc\"; filename*=UTF-8''na%C3%AFve.txt\r\n\r\n"
        );
    }

    #[test]
    fn test_set_name_rewrites_caller_disposition() {
        let mut part = Part::new();
        part.set_header("Content-Disposition", "attachment; filename=a.txt")
            .unwrap()
            .set_name("upload")
            .unwrap();

        assert_eq!(part.file_name(), Some("a.txt"));
        assert_eq!(
            head_of(&mut part),
            "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\n"
        );
    }

    #[test]
    fn test_invalid_headers_are_rejected() {
        let mut part = Part::new();
        assert_eq!(
            part.set_header("bad name", "x").err(),
            Some(crate::Error::InvalidHeaderName("bad name".to_owned()))
        );
        assert!(part.set_header("X-Ok", "line\nbreak").is_err());
    }

    #[test]
    fn test_file_part_lifecycle() {
        let mut part = Part::file("test/fixtures/user.html", Some("document"));

        assert_eq!(part.name(), Some("document"));
        assert_eq!(part.file_name(), Some("document"));
        assert_eq!(part.pending_path(), Some(Path::new("test/fixtures/user.html")));
        assert_eq!(part.content_type(), Some("text/html"));
        assert!(part.finalize().is_err());
        assert!(part.write("nope").is_err());

        part.bind_file(Bytes::from_static(b"<h1>name</h1>")).unwrap();
        assert_eq!(
            part.file_meta(),
            Some(&FileMeta {
                len: 13,
                media_type: mime::TEXT_HTML,
            })
        );
        assert!(part.set_name("late").is_err());
        assert!(part.bind_file(Bytes::new()).is_err());
        assert_eq!(
            part.write("x").err(),
            Some(crate::Error::InvalidState("can't write to a file-backed part"))
        );

        let finalized = part.finalize().unwrap();
        assert_eq!(finalized.body(), &Bytes::from_static(b"<h1>name</h1>"));
    }

    #[test]
    fn test_unknown_extension_falls_back_to_octet_stream() {
        let part = Part::file("blob.unknownext", None);
        assert_eq!(part.media_type(), mime::APPLICATION_OCTET_STREAM);
        assert_eq!(part.content_type(), Some("application/octet-stream"));
    }

    #[test]
    fn test_to_bytes() {
        let mut part = Part::field("a", b"1");
        assert_eq!(
            part.finalize().unwrap().to_bytes(),
            Bytes::from_static(b"Content-Disposition: form-data; name=\"a\"\r\n\r\n1")
        );
    }
}
