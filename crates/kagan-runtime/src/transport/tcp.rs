use super::{TransportError, TransportHandle, TransportType};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 64 lowercase hex characters, generated from two v4 UUIDs concatenated.
pub fn generate_handshake_token() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

#[derive(Debug, Error)]
pub enum TcpHandshakeError {
    #[error("connection closed during handshake")]
    Closed,

    #[error("handshake token mismatch")]
    TokenMismatch,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn bind_tcp_addr(port: u16) -> String {
    format!("127.0.0.1:{port}")
}

pub async fn bind_tcp(port: u16) -> Result<(TcpListener, TransportHandle), TransportError> {
    let addr = bind_tcp_addr(port);
    let listener = TcpListener::bind(&addr).await?;
    let bound_port = listener.local_addr()?.port();
    let handle = TransportHandle {
        transport_type: TransportType::Tcp,
        address: format!("127.0.0.1:{bound_port}"),
        port: Some(bound_port),
    };
    Ok((listener, handle))
}

/// Accepts one connection and verifies the 64-hex-char handshake token sent
/// as the first line before any envelope traffic is framed (spec §4.2).
pub async fn accept_tcp(
    listener: &TcpListener,
    expected_token: &str,
) -> Result<TcpStream, TransportError> {
    let (mut stream, _addr) = listener.accept().await?;
    let mut buf = vec![0u8; expected_token.len() + 1];
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(TcpHandshakeError::Closed.into());
        }
        filled += n;
    }
    let received = String::from_utf8_lossy(&buf[..expected_token.len()]);
    if received != expected_token {
        let _ = stream.shutdown().await;
        return Err(TcpHandshakeError::TokenMismatch.into());
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_token_is_64_hex_chars() {
        let token = generate_handshake_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn accept_rejects_wrong_token() {
        let (listener, handle) = bind_tcp(0).await.unwrap();
        let port = handle.port.unwrap();
        let expected = generate_handshake_token();
        let server = tokio::spawn(async move { accept_tcp(&listener, &expected).await });
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"0000000000000000000000000000000000000000000000000000000000000000\n").await.unwrap();
        let result = server.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn accept_accepts_correct_token() {
        let (listener, handle) = bind_tcp(0).await.unwrap();
        let port = handle.port.unwrap();
        let expected = generate_handshake_token();
        let expected_clone = expected.clone();
        let server = tokio::spawn(async move { accept_tcp(&listener, &expected_clone).await });
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(format!("{expected}\n").as_bytes()).await.unwrap();
        let result = server.await.unwrap();
        assert!(result.is_ok());
    }
}
