//! Local HTTP callback server for OAuth authentication.
//!
//! Listens on the loopback port of the redirect URI, shows a short result
//! page in the browser and hands the callback URL back to the sign-in flow.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use url::Url;

use crate::error::AuthError;

/// How long a single connection may take to send its request line.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A bound callback listener waiting for the authorization redirect.
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
    path: String,
}

impl CallbackServer {
    /// Bind to the port named in `redirect_uri` on 127.0.0.1.
    ///
    /// Bind before opening the browser so the redirect cannot race the listener.
    pub async fn bind(redirect_uri: &str) -> Result<Self, AuthError> {
        let url = Url::parse(redirect_uri).map_err(|e| {
            AuthError::CallbackServer(format!("Invalid redirect URI {}: {}", redirect_uri, e))
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            AuthError::CallbackServer(format!("Redirect URI {} has no port", redirect_uri))
        })?;

        let addr = format!("127.0.0.1:{}", port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            AuthError::CallbackServer(format!("Failed to bind callback server to {}: {}", addr, e))
        })?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::CallbackServer(e.to_string()))?
            .port();

        info!("OAuth callback server listening on 127.0.0.1:{}", port);

        Ok(Self {
            listener,
            port,
            path: url.path().to_string(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for a single OAuth callback and return its full URL.
    pub async fn wait_for_callback(self, timeout: Duration) -> Result<String, AuthError> {
        tokio::time::timeout(timeout, self.accept_loop())
            .await
            .map_err(|_| AuthError::CallbackTimeout)?
    }

    async fn accept_loop(&self) -> Result<String, AuthError> {
        loop {
            let (stream, peer_addr) = self
                .listener
                .accept()
                .await
                .map_err(|e| AuthError::CallbackServer(format!("Connection error: {}", e)))?;

            debug!("Connection from {}", peer_addr);
            if let Some(url) = self.handle_connection(stream).await {
                info!("OAuth callback received");
                return Ok(url);
            }
        }
    }

    /// Handle one incoming HTTP connection.
    ///
    /// Returns Some(url) if this was an OAuth callback, None otherwise.
    async fn handle_connection(&self, mut stream: TcpStream) -> Option<String> {
        let mut buffer = [0; 4096];
        let bytes_read = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buffer)).await
        {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                debug!("Failed to read request: {}", e);
                return None;
            }
            Err(_) => {
                debug!("Timed out reading request");
                return None;
            }
        };

        let request = String::from_utf8_lossy(&buffer[..bytes_read]);
        let Some((method, target)) = parse_request_line(&request) else {
            send_response(&mut stream, 400, "text/plain", "Bad Request").await;
            return None;
        };

        if method != "GET" {
            send_response(&mut stream, 405, "text/plain", "Method Not Allowed").await;
            return None;
        }

        let path = target.split('?').next().unwrap_or(target);
        if path != self.path {
            send_response(&mut stream, 404, "text/plain", "Not Found").await;
            return None;
        }

        let callback_url = format!("http://localhost:{}{}", self.port, target);

        // Error callbacks are handed back too so the caller can report them
        if target.contains("error=") {
            let page = result_page("Authentication Failed", &error_description(target));
            send_response(&mut stream, 200, "text/html; charset=utf-8", &page).await;
            return Some(callback_url);
        }

        if !target.contains("code=") {
            send_response(&mut stream, 400, "text/plain", "Missing authorization code").await;
            return None;
        }

        let page = result_page(
            "Authentication Successful",
            "You have been signed in to autopim.",
        );
        send_response(&mut stream, 200, "text/html; charset=utf-8", &page).await;
        Some(callback_url)
    }
}

/// Split `GET /path?query HTTP/1.1` into method and request target.
fn parse_request_line(request: &str) -> Option<(&str, &str)> {
    let mut parts = request.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    Some((method, target))
}

fn error_description(target: &str) -> String {
    if let Some(start) = target.find("error_description=") {
        let start = start + "error_description=".len();
        let end = target[start..]
            .find('&')
            .map(|i| start + i)
            .unwrap_or(target.len());
        let raw = target[start..end].replace('+', " ");
        urlencoding::decode(&raw)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| "Authentication failed".to_string())
    } else {
        "Authentication was cancelled or failed.".to_string()
    }
}

fn result_page(title: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; text-align: center; padding-top: 4rem; color: #1F2937; }}
        .hint {{ font-size: 0.875rem; color: #9CA3AF; }}
    </style>
</head>
<body>
    <h1>{title}</h1>
    <p>{message}</p>
    <p class="hint">You can close this tab now.</p>
</body>
</html>"#,
        title = escape_html(title),
        message = escape_html(message),
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn send_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &str) {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
    );

    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
}
