use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{HttpError, HttpResponse, ServerAddress};
use crate::transport::{Connection, TransportClient};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const READ_CHUNK: usize = 4096;

/// One-shot HTTP/1.0 requests over [`TransportClient`] connections.
#[derive(Debug, Clone)]
pub struct HttpExchange {
    transport: TransportClient,
    max_response_bytes: usize,
}

impl HttpExchange {
    #[must_use]
    pub fn new(transport: TransportClient, max_response_bytes: usize) -> Self {
        Self {
            transport,
            max_response_bytes,
        }
    }

    /// Sends a `GET` request and reads the complete response.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] on transport failure or a malformed response.
    pub async fn get(
        &self,
        server: &ServerAddress,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<HttpResponse, HttpError> {
        let request = build_request(&Method::GET, server, path, headers, None);
        self.send(server, path, &request).await
    }

    /// Sends a form-encoded `POST` request and reads the complete response.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] on transport failure or a malformed response.
    pub async fn post(
        &self,
        server: &ServerAddress,
        path: &str,
        headers: &HeaderMap,
        body: &str,
    ) -> Result<HttpResponse, HttpError> {
        let request = build_request(&Method::POST, server, path, headers, Some(body.as_bytes()));
        self.send(server, path, &request).await
    }

    async fn send(
        &self,
        server: &ServerAddress,
        path: &str,
        request: &[u8],
    ) -> Result<HttpResponse, HttpError> {
        let mut conn = self.transport.connect(&server.host, server.port).await?;
        let result = exchange_on(&mut conn, request, self.max_response_bytes).await;
        conn.disconnect().await;

        if let Ok(response) = &result {
            debug!(
                host = %server.host,
                path = %path,
                status = response.status.as_u16(),
                bytes = response.body.len(),
                "HTTP exchange completed"
            );
        }
        result
    }
}

fn build_request(
    method: &Method,
    server: &ServerAddress,
    path: &str,
    headers: &HeaderMap,
    body: Option<&[u8]>,
) -> Vec<u8> {
    let mut head = format!(
        "{method} {path} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n",
        server.host_header()
    );
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
    }
    if let Some(body) = body {
        if !headers.contains_key(CONTENT_TYPE) {
            head.push_str(&format!("{CONTENT_TYPE}: {FORM_CONTENT_TYPE}\r\n"));
        }
        head.push_str(&format!("{CONTENT_LENGTH}: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    let mut request = head.into_bytes();
    if let Some(body) = body {
        request.extend_from_slice(body);
    }
    request
}

/// Writes `request` and reads one response from an open connection.
///
/// The caller owns the connection and is responsible for disconnecting it.
async fn exchange_on<S>(
    conn: &mut Connection<S>,
    request: &[u8],
    max_response_bytes: usize,
) -> Result<HttpResponse, HttpError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    conn.write_all(request).await?;

    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    let head_len = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > max_response_bytes {
            return Err(HttpError::ResponseTooLarge {
                limit: max_response_bytes,
            });
        }
        let n = conn.read(&mut chunk).await?;
        if n == 0 {
            return Err(HttpError::PrematureClose);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let (status, headers) = parse_head(&buf[..head_len])?;

    if let Some(encoding) = headers.get(TRANSFER_ENCODING) {
        let encoding = encoding.to_str().unwrap_or("").trim();
        if !encoding.eq_ignore_ascii_case("identity") {
            return Err(HttpError::UnsupportedTransferEncoding(encoding.to_string()));
        }
    }

    let content_length = match headers.get(CONTENT_LENGTH) {
        Some(value) => {
            let text = value.to_str().unwrap_or("").trim();
            Some(
                text.parse::<usize>()
                    .map_err(|_| HttpError::InvalidContentLength(text.to_string()))?,
            )
        }
        None => None,
    };

    let body_limit = max_response_bytes.saturating_sub(head_len);
    if content_length.is_some_and(|len| len > body_limit) {
        return Err(HttpError::ResponseTooLarge {
            limit: max_response_bytes,
        });
    }

    let mut body = buf.split_off(head_len);
    match content_length {
        Some(len) => {
            while body.len() < len {
                let n = conn.read(&mut chunk).await?;
                if n == 0 {
                    return Err(HttpError::PrematureClose);
                }
                body.extend_from_slice(&chunk[..n]);
            }
            body.truncate(len);
        }
        None => loop {
            if body.len() > body_limit {
                return Err(HttpError::ResponseTooLarge {
                    limit: max_response_bytes,
                });
            }
            let n = conn.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        },
    }

    if body.len() > body_limit {
        return Err(HttpError::ResponseTooLarge {
            limit: max_response_bytes,
        });
    }

    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn parse_head(head: &[u8]) -> Result<(StatusCode, HeaderMap), HttpError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| HttpError::MalformedStatusLine("response head is not UTF-8".to_string()))?;
    let mut lines = text.split("\r\n").filter(|line| !line.is_empty());

    let status_line = lines
        .next()
        .ok_or_else(|| HttpError::MalformedStatusLine(String::new()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    let code = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::MalformedStatusLine(status_line.to_string()));
    }
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| HttpError::MalformedStatusLine(status_line.to_string()))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::MalformedHeader(line.to_string()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| HttpError::MalformedHeader(line.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| HttpError::MalformedHeader(line.to_string()))?;
        headers.append(name, value);
    }

    Ok((status, headers))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::transport::TransportError;

    /// Starts a peer that answers with `response`, closes its write half and
    /// returns everything the client sent.
    fn serve(response: &'static [u8]) -> (Connection<DuplexStream>, JoinHandle<Vec<u8>>) {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let handle = tokio::spawn(async move {
            server.write_all(response).await.unwrap();
            server.shutdown().await.unwrap();
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received
        });
        let conn = Connection::new(client, "idp.test:443", Duration::from_secs(5));
        (conn, handle)
    }

    async fn run(
        response: &'static [u8],
        request: &[u8],
        limit: usize,
    ) -> (Result<HttpResponse, HttpError>, Vec<u8>) {
        let (mut conn, handle) = serve(response);
        let result = exchange_on(&mut conn, request, limit).await;
        conn.disconnect().await;
        (result, handle.await.unwrap())
    }

    #[test]
    fn test_post_request_format() {
        let server = ServerAddress::new("idp.example.com", 443);
        let request = build_request(
            &Method::POST,
            &server,
            "/oauth/token",
            &HeaderMap::new(),
            Some(b"code=abc1"),
        );
        let text = String::from_utf8(request).unwrap();
        assert!(text.starts_with("POST /oauth/token HTTP/1.0\r\n"));
        assert!(text.contains("Host: idp.example.com\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("content-type: application/x-www-form-urlencoded\r\n"));
        assert!(text.contains("content-length: 9\r\n"));
        assert!(text.ends_with("\r\n\r\ncode=abc1"));
    }

    #[test]
    fn test_get_request_has_no_body_headers() {
        let server = ServerAddress::new("idp.example.com", 8443);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer t0k"));
        let request = build_request(&Method::GET, &server, "/profile", &headers, None);
        let text = String::from_utf8(request).unwrap();
        assert!(text.starts_with("GET /profile HTTP/1.0\r\n"));
        assert!(text.contains("Host: idp.example.com:8443\r\n"));
        assert!(text.contains("authorization: Bearer t0k\r\n"));
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_reads_content_length_body() {
        let (result, sent) = run(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"uid\":\"a\"}",
            b"GET / HTTP/1.0\r\n\r\n",
            4096,
        )
        .await;
        let response = assert_ok!(result);
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.text(), "{\"uid\":\"a\"}");
        assert_eq!(
            response.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(sent, b"GET / HTTP/1.0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_reads_body_until_close() {
        let (result, _) = run(
            b"HTTP/1.0 400 Bad Request\r\n\r\n{\"error\":\"invalid_grant\"}",
            b"GET / HTTP/1.0\r\n\r\n",
            4096,
        )
        .await;
        let response = assert_ok!(result);
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.text(), "{\"error\":\"invalid_grant\"}");
    }

    #[tokio::test]
    async fn test_rejects_chunked() {
        let (result, _) = run(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n",
            b"GET / HTTP/1.0\r\n\r\n",
            4096,
        )
        .await;
        assert!(matches!(
            assert_err!(result),
            HttpError::UnsupportedTransferEncoding(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_status_line() {
        let (result, _) = run(b"SSH-2.0-OpenSSH\r\n\r\n", b"GET / HTTP/1.0\r\n\r\n", 4096).await;
        assert!(matches!(
            assert_err!(result),
            HttpError::MalformedStatusLine(_)
        ));
    }

    #[tokio::test]
    async fn test_premature_close_in_body() {
        let (result, _) = run(
            b"HTTP/1.0 200 OK\r\nContent-Length: 100\r\n\r\nshort",
            b"GET / HTTP/1.0\r\n\r\n",
            4096,
        )
        .await;
        assert!(matches!(assert_err!(result), HttpError::PrematureClose));
    }

    #[tokio::test]
    async fn test_premature_close_in_head() {
        let (result, _) = run(b"HTTP/1.0 200 OK\r\nContent-", b"GET / HTTP/1.0\r\n\r\n", 4096).await;
        assert!(matches!(assert_err!(result), HttpError::PrematureClose));
    }

    #[tokio::test]
    async fn test_response_size_cap() {
        let (result, _) = run(
            b"HTTP/1.0 200 OK\r\nContent-Length: 500\r\n\r\n",
            b"GET / HTTP/1.0\r\n\r\n",
            128,
        )
        .await;
        assert!(matches!(
            assert_err!(result),
            HttpError::ResponseTooLarge { limit: 128 }
        ));

        let (result, _) = run(
            b"HTTP/1.0 200 OK\r\n\r\n0123456789012345678901234567890123456789",
            b"GET / HTTP/1.0\r\n\r\n",
            40,
        )
        .await;
        assert!(matches!(
            assert_err!(result),
            HttpError::ResponseTooLarge { .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_content_length() {
        let (result, _) = run(
            b"HTTP/1.0 200 OK\r\nContent-Length: ten\r\n\r\n",
            b"GET / HTTP/1.0\r\n\r\n",
            4096,
        )
        .await;
        assert!(matches!(
            assert_err!(result),
            HttpError::InvalidContentLength(_)
        ));
    }

    #[tokio::test]
    async fn test_disconnected_connection_is_transport_error() {
        let (mut conn, _handle) = serve(b"");
        conn.disconnect().await;
        let result = exchange_on(&mut conn, b"GET / HTTP/1.0\r\n\r\n", 4096).await;
        assert!(matches!(
            assert_err!(result),
            HttpError::Transport(TransportError::NotConnected)
        ));
    }
}
