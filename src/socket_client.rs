use crate::error::Error;
use http_body_util::BodyExt;
use hyper::{Request, StatusCode, client::conn::http1};
use hyper_util::rt::TokioIo;
use log::error;
use std::path::Path;
use tokio::net::UnixStream;

/// Raw status and body of a daemon response, before envelope decoding.
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

pub async fn get(socket_path: &Path, path: &str) -> Result<RawResponse, Error> {
    let request = Request::builder()
        .uri(path)
        .method("GET")
        .header("Host", "localhost")
        .body(String::new())
        .map_err(|e| Error::Transport(format!("build request failed: {e}")))?;

    send_request(request, socket_path).await
}

pub async fn post(socket_path: &Path, path: &str, body: String) -> Result<RawResponse, Error> {
    let request = Request::builder()
        .uri(path)
        .method("POST")
        .header("Host", "localhost")
        .body(body)
        .map_err(|e| Error::Transport(format!("build request failed: {e}")))?;

    send_request(request, socket_path).await
}

async fn send_request(request: Request<String>, socket_path: &Path) -> Result<RawResponse, Error> {
    let mut sender = sender(socket_path).await?;

    let res = sender
        .send_request(request)
        .await
        .map_err(|e| Error::Transport(format!("send request failed: {e}")))?;

    let status = res.status();

    let body = res
        .collect()
        .await
        .map_err(|e| Error::Transport(format!("collect response body failed: {e}")))?;

    let body = String::from_utf8(body.to_bytes().to_vec())
        .map_err(|e| Error::Transport(format!("get response body failed: {e}")))?;

    Ok(RawResponse { status, body })
}

async fn sender(socket_path: &Path) -> Result<http1::SendRequest<String>, Error> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| Error::Transport(format!("cannot create unix stream: {e}")))?;

    let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| Error::Transport(format!("unix stream handshake failed: {e}")))?;

    tokio::spawn(async move {
        if let Err(err) = conn.await {
            error!("unix socket connection failed: {err:?}");
        }
    });

    sender
        .ready()
        .await
        .map_err(|e| Error::Transport(format!("unix stream unexpectedly closed: {e}")))?;

    Ok(sender)
}
