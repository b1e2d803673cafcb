use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use futures_util::future::BoxFuture;
use futures_util::stream::{StreamExt, TryStreamExt};
use http::header::{self, HeaderValue};
use http::Uri;
use http_body_util::{BodyStream, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper_util::rt::TokioIo;
use multiform::{Body, BoxError, Constraints, Filesystem, Request, ResponseBody, Transport};
use tokio::net::{TcpListener, TcpStream};

async fn echo(req: hyper::Request<Incoming>) -> Result<hyper::Response<Incoming>, Infallible> {
    let (parts, body) = req.into_parts();
    let mut res = hyper::Response::new(body);

    *res.headers_mut() = parts.headers;
    for name in &[header::TRANSFER_ENCODING, header::CONTENT_LENGTH, header::HOST, header::CONNECTION] {
        res.headers_mut().remove(name);
    }

    Ok(res)
}

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => return,
            };

            tokio::spawn(async move {
                let service = hyper::service::service_fn(echo);
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), service)
                    .await
                {
                    eprintln!("server error: {}", e);
                }
            });
        }
    });

    addr
}

/// Sends requests over a fresh HTTP/1 connection to `addr`.
struct HyperTransport {
    addr: SocketAddr,
}

impl Transport for HyperTransport {
    fn send(&mut self, request: http::Request<Body>) -> BoxFuture<'_, Result<http::Response<ResponseBody>, BoxError>> {
        let addr = self.addr;

        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let (mut parts, body) = request.into_parts();
            parts
                .headers
                .insert(header::HOST, HeaderValue::from_str(&addr.to_string())?);

            let body = StreamBody::new(body.map_ok(Frame::data));
            let res = sender.send_request(hyper::Request::from_parts(parts, body)).await?;

            let (parts, body) = res.into_parts();
            let body = BodyStream::new(body)
                .try_filter_map(|frame| async move { Ok(frame.into_data().ok()) })
                .map_err(BoxError::from)
                .boxed();

            Ok::<_, BoxError>(http::Response::from_parts(parts, body))
        })
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn upload_dir(test: &str) -> PathBuf {
    std::env::temp_dir().join(format!("multiform-hyper-{}-{}", test, std::process::id()))
}

#[tokio::test]
async fn test_hyper_echo_fields_and_attachment() {
    let addr = start_echo_server().await;
    let mut transport = HyperTransport { addr };

    let mut req = Request::post(Uri::from_static("/echo"));
    req.field("name", "Tobi")
        .attach_as(fixture("user.html"), "document")
        .field("species", "ferret");

    let res = req.send(&mut transport).await.unwrap();
    assert_eq!(res.status(), http::StatusCode::OK);
    assert!(res
        .content_type()
        .unwrap()
        .starts_with("multipart/form-data; boundary="));

    let form = res
        .form_with_constraints(Constraints::new().upload_dir(upload_dir("fields")))
        .await
        .unwrap();

    assert_eq!(form.fields.keys().collect::<Vec<_>>(), vec!["name", "species"]);
    assert_eq!(form.fields["name"], "Tobi");
    assert_eq!(form.fields["species"], "ferret");

    let html = &form.files["document"];
    assert_eq!(html.content_type, mime::TEXT_HTML);
    assert_eq!(tokio::fs::read(&html.path).await.unwrap(), b"<h1>name</h1>");
}

#[tokio::test]
async fn test_hyper_echo_attachments() {
    let addr = start_echo_server().await;
    let mut transport = HyperTransport { addr };

    let mut req = Request::post(Uri::from_static("/echo"));
    req.attach(fixture("user.html"))
        .attach(fixture("user.json"))
        .attach(fixture("user.txt"));

    let form = req
        .send(&mut transport)
        .await
        .unwrap()
        .form_with_constraints(Constraints::new().upload_dir(upload_dir("attachments")))
        .await
        .unwrap();

    assert_eq!(
        form.files.keys().collect::<Vec<_>>(),
        vec!["user.html", "user.json", "user.txt"]
    );

    for (name, file) in &form.files {
        assert_eq!(
            tokio::fs::read(&file.path).await.unwrap(),
            tokio::fs::read(fixture(name)).await.unwrap()
        );
    }
}

#[tokio::test]
async fn test_hyper_echo_without_parts() {
    let addr = start_echo_server().await;
    let mut transport = HyperTransport { addr };

    let res = Request::post(Uri::from_static("/echo"))
        .send(&mut transport)
        .await
        .unwrap();

    assert!(res.content_type().is_none());
    assert!(res.bytes().await.unwrap().is_empty());
}

/// Fails every read, but only after the echo has started answering.
struct SlowFailFs;

impl Filesystem for SlowFailFs {
    fn read(&self, _path: &Path) -> BoxFuture<'static, std::io::Result<Bytes>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))
        })
    }
}

#[tokio::test]
async fn test_hyper_echo_slow_attachment_failure() {
    let addr = start_echo_server().await;
    let mut transport = HyperTransport { addr };

    let errors = Arc::new(Mutex::new(Vec::new()));
    let mut completed = false;

    let mut req = Request::post(Uri::from_static("/echo"));
    req.filesystem(Arc::new(SlowFailFs));
    req.field("name", "Tobi").attach("foo");

    let observed = Arc::clone(&errors);
    req.on_error(move |err| observed.lock().unwrap().push(err.clone()));
    req.end(&mut transport, |_| completed = true).await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        multiform::Error::Attachment { path, cause } => {
            assert_eq!(path, Path::new("foo"));
            assert_eq!(cause.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!completed);
}
