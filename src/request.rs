use std::fmt::{self, Debug, Formatter};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use futures_util::future::{self, BoxFuture};
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Uri};
use spin::Mutex;

use crate::constraints::Constraints;
use crate::decoder::{DecodedForm, Decoder};
use crate::error::BoxError;
use crate::form::{Form, FormStream};
use crate::resolver::Filesystem;
use crate::Part;

/// The inbound body a [`Transport`] hands back.
pub type ResponseBody = BoxStream<'static, Result<Bytes, BoxError>>;

/// Delivers a request and returns the peer's response.
///
/// Connection handling, TLS and retries all belong to the implementation.
/// Errors it returns are reported as [`Error::Transport`](crate::Error::Transport).
pub trait Transport {
    fn send(&mut self, request: http::Request<Body>) -> BoxFuture<'_, Result<http::Response<ResponseBody>, BoxError>>;
}

/// How the outgoing body ended.
#[derive(Debug, Clone)]
enum Delivery {
    /// Every chunk, closing delimiter included, was handed out.
    Sent,
    /// An attachment failed and the stream stopped early.
    Failed(crate::Error),
    /// The transport dropped the body before reaching its end.
    Abandoned,
}

#[derive(Debug, Default)]
struct BodyState {
    outcome: Option<Delivery>,
    waker: Option<Waker>,
}

type SharedState = Arc<Mutex<BodyState>>;

fn settle(state: &Mutex<BodyState>, outcome: Delivery) {
    let waker = {
        let mut state = state.lock();
        if state.outcome.is_some() {
            return;
        }
        state.outcome = Some(outcome);
        state.waker.take()
    };

    if let Some(waker) = waker {
        waker.wake();
    }
}

fn poll_outcome(state: &Mutex<BodyState>, cx: &mut Context<'_>) -> Poll<Delivery> {
    let mut state = state.lock();
    match &state.outcome {
        Some(outcome) => Poll::Ready(outcome.clone()),
        None => {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// The outgoing body of a [`Request`]: the encoded form, or nothing when no
/// part was declared.
pub struct Body {
    form: Option<FormStream>,
    state: SharedState,
}

impl Body {
    /// A body with no content.
    pub fn empty() -> Body {
        let state = BodyState {
            outcome: Some(Delivery::Sent),
            waker: None,
        };

        Body {
            form: None,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn multipart(form: FormStream) -> Body {
        Body {
            form: Some(form),
            state: SharedState::default(),
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.form.is_some()
    }
}

impl Stream for Body {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let form = match this.form.as_mut() {
            Some(form) => form,
            None => return Poll::Ready(None),
        };

        match Pin::new(form).poll_next(cx) {
            Poll::Ready(Some(Err(err))) => {
                settle(&this.state, Delivery::Failed(err.clone()));
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                settle(&this.state, Delivery::Sent);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        settle(&self.state, Delivery::Abandoned);
    }
}

impl Debug for Body {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").field("multipart", &self.is_multipart()).finish()
    }
}

/// Builds a request whose body is a `multipart/form-data` form.
///
/// The form is created by the first call to [`field`](Request::field),
/// [`attach`](Request::attach) or [`part`](Request::part); parts are sent in
/// the order of those calls. A request without any of them is sent with an
/// empty body, unless its `Content-Type` is `multipart/*`.
///
/// # Examples
///
/// ```no_run
/// use http::Uri;
/// use multiform::{Request, Transport};
///
/// # async fn run<T: Transport>(transport: &mut T) -> multiform::Result<()> {
/// let mut req = Request::post(Uri::from_static("http://localhost:3005/echo"));
///
/// req.field("name", "Tobi");
/// req.attach_as("test/fixtures/user.html", "document");
/// req.field("species", "ferret");
///
/// let res = req.send(transport).await?;
/// let form = res.form().await?;
///
/// assert_eq!(form.fields["name"], "Tobi");
/// assert_eq!(form.files["document"].content_type, mime::TEXT_HTML);
/// # Ok(())
/// # }
/// ```
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    form: Option<Form>,
    filesystem: Option<Arc<dyn Filesystem>>,
    error_observer: Option<Box<dyn FnMut(&crate::Error) + Send>>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Request {
        Request {
            method,
            uri,
            headers: HeaderMap::new(),
            form: None,
            filesystem: None,
            error_observer: None,
        }
    }

    pub fn post(uri: Uri) -> Request {
        Request::new(Method::POST, uri)
    }

    pub fn put(uri: Uri) -> Request {
        Request::new(Method::PUT, uri)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Sets a request header, replacing previous values of the same name.
    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Request {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request `Content-Type`. A `multipart/*` type without a
    /// boundary gets the form's boundary appended when the request is sent.
    pub fn content_type(&mut self, value: &str) -> crate::Result<&mut Request> {
        let value = HeaderValue::from_str(value).map_err(|_| crate::Error::InvalidHeaderValue {
            name: header::CONTENT_TYPE.as_str().to_owned(),
        })?;
        self.headers.insert(header::CONTENT_TYPE, value);
        Ok(self)
    }

    /// Reads attachments from `fs` instead of the local filesystem.
    pub fn filesystem(&mut self, fs: Arc<dyn Filesystem>) -> &mut Request {
        if let Some(form) = self.form.as_mut() {
            form.set_filesystem(Arc::clone(&fs));
        }
        self.filesystem = Some(fs);
        self
    }

    /// Appends a `form-data` field.
    pub fn field<N: Into<String>, V: AsRef<[u8]>>(&mut self, name: N, value: V) -> &mut Request {
        self.form().field(name, value);
        self
    }

    /// Appends the file at `path`, named after its base name.
    pub fn attach<P: AsRef<Path>>(&mut self, path: P) -> &mut Request {
        self.form().attach(path);
        self
    }

    /// Appends the file at `path` under the name `file_name`.
    pub fn attach_as<P: AsRef<Path>>(&mut self, path: P, file_name: &str) -> &mut Request {
        self.form().attach_as(path, file_name);
        self
    }

    /// Appends an empty part and returns it for manual configuration.
    pub fn part(&mut self) -> &mut Part {
        self.form().part()
    }

    /// Registers the observer told about a failed request. It is called at
    /// most once per request.
    pub fn on_error<F>(&mut self, observer: F) -> &mut Request
    where
        F: FnMut(&crate::Error) + Send + 'static,
    {
        self.error_observer = Some(Box::new(observer));
        self
    }

    /// Builds the outgoing `http::Request`, setting the multipart
    /// `Content-Type` when a form was declared.
    ///
    /// A `multipart/*` `Content-Type` set without any part still gets a
    /// boundary and a body holding the closing delimiter.
    pub fn into_http(mut self) -> crate::Result<http::Request<Body>> {
        if self.form.is_none() && self.declares_multipart() {
            self.form();
        }

        let body = match self.form.take() {
            Some(mut form) => {
                form.negotiate_content_type(&mut self.headers)?;
                Body::multipart(form.into_stream())
            }
            None => Body::empty(),
        };

        let mut request = http::Request::new(body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.headers_mut() = self.headers;

        Ok(request)
    }

    /// Sends the request and waits until the peer answered and the whole
    /// body was handed to the transport.
    ///
    /// An attachment that can't be read fails the whole request with
    /// [`Error::Attachment`](crate::Error::Attachment), even when the
    /// transport already returned the response head or reported the aborted
    /// body as its own failure. Any failure is also handed to the registered
    /// error observer.
    pub async fn send<T: Transport + ?Sized>(mut self, transport: &mut T) -> crate::Result<Response> {
        let observer = self.error_observer.take();
        let result = self.dispatch(transport).await;

        if let Err(err) = &result {
            match observer {
                Some(mut observer) => observer(err),
                None => log::error!("request failed: {}", err),
            }
        }

        result
    }

    /// Sends the request and calls `on_complete` with the response. When
    /// the request fails only the error observer is told, `on_complete` is
    /// never called.
    pub async fn end<T, F>(self, transport: &mut T, on_complete: F)
    where
        T: Transport + ?Sized,
        F: FnOnce(Response),
    {
        if let Ok(response) = self.send(transport).await {
            on_complete(response);
        }
    }

    async fn dispatch<T: Transport + ?Sized>(self, transport: &mut T) -> crate::Result<Response> {
        let request = self.into_http()?;
        let state = Arc::clone(&request.body().state);

        let response = match transport.send(request).await {
            Ok(response) => response,
            Err(cause) => {
                return match state.lock().outcome.take() {
                    Some(Delivery::Failed(err)) => Err(err),
                    _ => Err(crate::Error::transport(cause)),
                };
            }
        };

        // A streaming transport can hand back the response head while the
        // body is still going out. The response is buffered until the body
        // settles so the peer never stalls on a full socket.
        let (head, body) = response.into_parts();
        let mut body = body.fuse();
        let mut buffered = Vec::new();
        let mut body_ended = false;

        let outcome = future::poll_fn(|cx| loop {
            if let Poll::Ready(outcome) = poll_outcome(&state, cx) {
                return Poll::Ready(outcome);
            }
            if body_ended {
                return Poll::Pending;
            }

            match body.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => buffered.push(Ok(chunk)),
                Poll::Ready(Some(Err(err))) => {
                    buffered.push(Err(err));
                    body_ended = true;
                }
                Poll::Ready(None) => body_ended = true,
                Poll::Pending => return Poll::Pending,
            }
        })
        .await;

        log::trace!("request body settled as {:?}", outcome);
        if let Delivery::Failed(err) = outcome {
            return Err(err);
        }

        let body = stream::iter(buffered).chain(body).boxed();
        Ok(Response::new(http::Response::from_parts(head, body)))
    }

    fn declares_multipart(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok())
            .map_or(false, |ty| ty.type_() == mime::MULTIPART)
    }
}

impl Request {
    fn form(&mut self) -> &mut Form {
        let filesystem = &self.filesystem;

        self.form.get_or_insert_with(|| {
            let mut form = Form::new();
            if let Some(fs) = filesystem {
                form.set_filesystem(Arc::clone(fs));
            }
            form
        })
    }
}

impl Debug for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("headers", &self.headers)
            .field("form", &self.form)
            .finish()
    }
}

/// The response to a [`Request`].
pub struct Response {
    head: http::response::Parts,
    body: ResponseBody,
}

impl Response {
    fn new(response: http::Response<ResponseBody>) -> Response {
        let (head, body) = response.into_parts();
        Response { head, body }
    }

    pub fn status(&self) -> StatusCode {
        self.head.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.head
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
    }

    /// Reads the whole response body.
    pub async fn bytes(self) -> crate::Result<Bytes> {
        self.body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await
            .map(BytesMut::freeze)
            .map_err(crate::Error::transport)
    }

    /// Decodes a `multipart/form-data` response body.
    ///
    /// A response that isn't `multipart/form-data` decodes to an empty form.
    pub async fn form(self) -> crate::Result<DecodedForm> {
        self.form_with_constraints(Constraints::default()).await
    }

    pub async fn form_with_constraints(self, constraints: Constraints) -> crate::Result<DecodedForm> {
        let boundary = match self.content_type().map(crate::parse_boundary) {
            Some(Ok(boundary)) => boundary,
            _ => return Ok(DecodedForm::default()),
        };

        Decoder::new_with_constraints(self.body, boundary, constraints)
            .decode()
            .await
    }
}

impl Debug for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.head.status)
            .field("headers", &self.head.headers)
            .finish()
    }
}
