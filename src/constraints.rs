use std::path::PathBuf;

use crate::size_limit::SizeLimit;

/// Represents the decoder configuration: which fields are accepted, how big
/// they may get and where file parts are written.
///
/// # Examples
///
/// ```
/// use multiform::{Constraints, SizeLimit};
///
/// let constraints = Constraints::new()
///     .allowed_fields(vec!["name", "document"])
///     .size_limit(SizeLimit::new().whole_stream(15 * 1024 * 1024).per_field(10 * 1024 * 1024))
///     .upload_dir(std::env::temp_dir().join("uploads"));
/// ```
#[derive(Debug, Clone)]
pub struct Constraints {
    pub(crate) size_limit: SizeLimit,
    pub(crate) allowed_fields: Option<Vec<String>>,
    pub(crate) upload_dir: PathBuf,
}

impl Constraints {
    /// Creates a set of rules with no field restriction, no size limit and
    /// the system temporary directory as upload directory.
    pub fn new() -> Constraints {
        Constraints::default()
    }

    /// Applies rules on field sizes.
    pub fn size_limit(mut self, size_limit: SizeLimit) -> Constraints {
        self.size_limit = size_limit;
        self
    }

    /// Accepts only the given field names; any other field fails decoding
    /// with [`Error::UnknownField`](crate::Error::UnknownField).
    pub fn allowed_fields<N: Into<String>>(mut self, allowed_fields: Vec<N>) -> Constraints {
        let allowed_fields = allowed_fields.into_iter().map(|item| item.into()).collect();
        self.allowed_fields = Some(allowed_fields);
        self
    }

    /// Sets the directory decoded file parts are written to.
    pub fn upload_dir<P: Into<PathBuf>>(mut self, upload_dir: P) -> Constraints {
        self.upload_dir = upload_dir.into();
        self
    }

    pub(crate) fn is_it_allowed(&self, field: Option<&str>) -> bool {
        match &self.allowed_fields {
            Some(allowed_fields) => field
                .map(|field| allowed_fields.iter().any(|item| item == field))
                .unwrap_or(false),
            None => true,
        }
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Constraints {
            size_limit: SizeLimit::default(),
            allowed_fields: None,
            upload_dir: std::env::temp_dir(),
        }
    }
}
