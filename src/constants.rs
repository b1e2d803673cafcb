use lazy_static::lazy_static;
use regex::Regex;

pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: u64 = std::u64::MAX;
pub(crate) const DEFAULT_PER_FIELD_SIZE_LIMIT: u64 = std::u64::MAX;

pub(crate) const MAX_HEADERS: usize = 32;
pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CR: u8 = b'\r';
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";

pub(crate) const BOUNDARY_PREFIX: &str = "----MultiformBoundary";
pub(crate) const BOUNDARY_RANDOM_LEN: usize = 32;

pub(crate) const DISPOSITION_FORM_DATA: &str = "form-data";
pub(crate) const DISPOSITION_ATTACHMENT: &str = "attachment";

pub(crate) const UPLOADED_FILE_PREFIX: &str = "multiform-upload-";
pub(crate) const UPLOADED_FILE_RANDOM_LEN: usize = 24;

lazy_static! {
    pub(crate) static ref CONTENT_DISPOSITION_TYPE_RE: Regex = Regex::new(r#"^\s*([^;\s]+)"#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FIELD_NAME_RE: Regex =
        Regex::new(r#"(?i);\s*name\s*=\s*(?:"([^"]*)"|([^;\s"]+))"#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FILE_NAME_RE: Regex =
        Regex::new(r#"(?i);\s*filename\s*=\s*(?:"([^"]*)"|([^;\s"]+))"#).unwrap();
}
