// File: rawhttp.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::TransportError;
use log::trace;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_RESPONSE_BYTES: usize = 65536;
const READ_CHUNK_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RawHttpResponse {
    pub status: u16,
    pub reason: String,
    pub http_version: String,
    pub headers: HashMap<String, String>,
    pub raw_response: String,
}

impl RawHttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|v| v.as_str())
    }

    /// Whatever body bytes arrived after the head.
    pub fn body(&self) -> &str {
        self.raw_response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or_default()
    }
}

/// Writes `request` verbatim over a fresh connection and reads until the
/// response head is complete, the peer closes, or `timeout` elapses.
pub async fn send_raw_request(
    host: &str,
    port: u16,
    request: &[u8],
    timeout: Duration,
) -> Result<RawHttpResponse, TransportError> {
    exchange(host, port, request, timeout, true).await
}

/// Like [`send_raw_request`] but keeps reading body bytes until the peer
/// closes. Requests should carry `Connection: close`.
pub async fn send_raw_request_to_close(
    host: &str,
    port: u16,
    request: &[u8],
    timeout: Duration,
) -> Result<RawHttpResponse, TransportError> {
    exchange(host, port, request, timeout, false).await
}

async fn exchange(
    host: &str,
    port: u16,
    request: &[u8],
    timeout: Duration,
    stop_at_head: bool,
) -> Result<RawHttpResponse, TransportError> {
    let addr = format!("{}:{}", host, port);
    let mut stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(TransportError::from(e)),
        Err(_) => return Err(TransportError::ConnectTimeout(timeout)),
    };

    match tokio::time::timeout(timeout, stream.write_all(request)).await {
        Ok(result) => result?,
        Err(_) => return Err(TransportError::WriteTimeout(timeout)),
    }
    trace!("Wrote {} bytes to {}", request.len(), addr);

    let mut response_buffer = Vec::new();
    let start_time = Instant::now();
    let mut peer_closed = false;

    while start_time.elapsed() < timeout && response_buffer.len() < MAX_RESPONSE_BYTES {
        let mut chunk_buffer = [0u8; 4096];
        let read_result =
            tokio::time::timeout(READ_CHUNK_TIMEOUT, stream.read(&mut chunk_buffer)).await;

        match read_result {
            Ok(Ok(0)) => {
                peer_closed = true;
                break;
            }
            Ok(Ok(n)) => {
                response_buffer.extend_from_slice(&chunk_buffer[..n]);
                if stop_at_head && contains_head_terminator(&response_buffer) {
                    break;
                }
            }
            Ok(Err(e)) => {
                if response_buffer.is_empty() {
                    return Err(TransportError::from(e));
                }
                break;
            }
            Err(_) => continue,
        }
    }

    if response_buffer.is_empty() {
        return Err(if peer_closed {
            TransportError::ConnectionReset("connection closed without response".to_string())
        } else {
            TransportError::ReadTimeout(timeout)
        });
    }

    let raw_response = String::from_utf8_lossy(&response_buffer).to_string();
    parse_http_response(&raw_response)
}

fn contains_head_terminator(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|w| w == b"\r\n\r\n")
}

pub fn parse_http_response(raw_response: &str) -> Result<RawHttpResponse, TransportError> {
    let mut lines = raw_response.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| TransportError::MalformedResponse("no status line".to_string()))?;

    if !status_line.starts_with("HTTP/") {
        return Err(TransportError::MalformedResponse(format!(
            "unexpected status line: {}",
            status_line.chars().take(64).collect::<String>()
        )));
    }

    let mut parts = status_line.splitn(3, ' ');
    let http_version = parts.next().unwrap_or_default().to_string();
    let status: u16 = parts
        .next()
        .and_then(|code| code.trim().parse().ok())
        .ok_or_else(|| {
            TransportError::MalformedResponse(format!("invalid status code in: {}", status_line))
        })?;
    let reason = parts.next().unwrap_or_default().trim().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(colon_pos) = line.find(':') {
            let key = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.insert(key, value);
        }
    }

    Ok(RawHttpResponse {
        status,
        reason,
        http_version,
        headers,
        raw_response: raw_response.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response).await;
            }
        });
        port
    }

    #[test]
    fn test_parse_status_line_and_headers() {
        let raw = "HTTP/1.1 503 Service Unavailable\r\nServer: nginx/1.18.0\r\nContent-Length: 0\r\n\r\n";
        let response = parse_http_response(raw).unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.reason, "Service Unavailable");
        assert_eq!(response.http_version, "HTTP/1.1");
        assert_eq!(response.header("Server"), Some("nginx/1.18.0"));
    }

    #[test]
    fn test_parse_status_without_reason() {
        let response = parse_http_response("HTTP/1.0 200\r\n\r\n").unwrap();
        assert_eq!(response.status, 200);
        assert!(response.reason.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_http() {
        assert!(matches!(
            parse_http_response("SSH-2.0-OpenSSH_8.9\r\n"),
            Err(TransportError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_http_response("HTTP/1.1 abc Broken\r\n\r\n"),
            Err(TransportError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_send_raw_request_reads_response() {
        let port = serve_once(b"HTTP/1.1 500 Internal Server Error\r\nConnection: close\r\n\r\n").await;
        let response = send_raw_request(
            "127.0.0.1",
            port,
            b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.header("connection"), Some("close"));
    }

    #[tokio::test]
    async fn test_send_raw_request_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = send_raw_request("127.0.0.1", port, b"GET / HTTP/1.1\r\n\r\n", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_send_raw_request_closed_without_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let result = send_raw_request("127.0.0.1", port, b"GET / HTTP/1.1\r\n\r\n", Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_to_close_keeps_body() {
        let port = serve_once(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nroot:x:0:0:root:/root:/bin/sh\n").await;
        let response = send_raw_request_to_close(
            "127.0.0.1",
            port,
            b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n",
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert_eq!(response.status, 200);
        assert!(response.body().starts_with("root:"));
    }

    #[tokio::test]
    async fn test_write_to_stalled_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(socket);
            }
        });

        let payload = vec![b'A'; 64 * 1024 * 1024];
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            send_raw_request("127.0.0.1", port, &payload, Duration::from_millis(500)),
        )
        .await
        .expect("write was not bounded by the trial timeout");
        assert!(matches!(result, Err(TransportError::WriteTimeout(_))));
    }
}
