use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::Part;

/// The filesystem an attachment is read from.
///
/// The default implementation, [`TokioFs`], reads through `tokio::fs`.
/// Another implementation can be plugged into a [`Form`](crate::Form) to
/// read attachments from somewhere else.
pub trait Filesystem: Send + Sync {
    /// Reads the whole file at `path`.
    fn read(&self, path: &Path) -> BoxFuture<'static, io::Result<Bytes>>;
}

/// Reads attachments from the local filesystem with `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFs;

impl Filesystem for TokioFs {
    fn read(&self, path: &Path) -> BoxFuture<'static, io::Result<Bytes>> {
        let path = path.to_owned();
        Box::pin(async move { tokio::fs::read(path).await.map(Bytes::from) })
    }
}

/// Turns file-backed parts into parts holding the file content.
///
/// # Examples
///
/// ```
/// use multiform::Resolver;
///
/// # async fn run() {
/// let resolver = Resolver::default();
/// let err = resolver.resolve("does/not/exist.txt", None).await.unwrap_err();
///
/// assert!(matches!(err, multiform::Error::Attachment { .. }));
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Clone)]
pub struct Resolver {
    fs: Arc<dyn Filesystem>,
}

impl Resolver {
    pub fn new(fs: Arc<dyn Filesystem>) -> Resolver {
        Resolver { fs }
    }

    /// Reads the file at `path` into a new part named `file_name`, or the
    /// base name of `path`.
    pub fn resolve<P: AsRef<Path>>(&self, path: P, file_name: Option<&str>) -> BoxFuture<'static, crate::Result<Part>> {
        self.resolve_part(Part::file(path, file_name))
    }

    /// Reads the content of a part created with [`Part::file`]. Any other
    /// part is handed back unchanged.
    ///
    /// The read starts when the returned future is first polled and is
    /// abandoned when the future is dropped.
    pub fn resolve_part(&self, mut part: Part) -> BoxFuture<'static, crate::Result<Part>> {
        let read = part.pending_path().map(|path| (path.to_owned(), self.fs.read(path)));

        Box::pin(async move {
            if let Some((path, read)) = read {
                let bytes = read.await.map_err(|err| crate::Error::attachment(path.clone(), err))?;

                log::debug!("read attachment {} ({} bytes)", path.display(), bytes.len());

                part.bind_file(bytes)?;
            }

            Ok(part)
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(Arc::new(TokioFs))
    }
}

impl Debug for Resolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").finish()
    }
}
