use super::{TransportError, TransportHandle, TransportType};
use std::path::Path;
use tokio::net::UnixListener;

/// Binds a Unix domain socket at `path`. The socket file is removed first
/// since `bind` fails if a stale one is left over from an unclean shutdown;
/// the lease (spec §4.1) is what actually guarantees only one core runs
/// against this runtime directory at a time.
pub fn bind_unix(path: &Path) -> Result<(UnixListener, TransportHandle), TransportError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(path)?;
    let handle = TransportHandle {
        transport_type: TransportType::Unix,
        address: path.display().to_string(),
        port: None,
    };
    Ok((listener, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn binds_and_reports_handle_address() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("core.sock");
        let (_listener, handle) = bind_unix(&path).unwrap();
        assert_eq!(handle.transport_type, TransportType::Unix);
        assert_eq!(handle.address, path.display().to_string());
        assert!(handle.port.is_none());
    }

    #[tokio::test]
    async fn rebinding_removes_stale_socket_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("core.sock");
        let (listener, _handle) = bind_unix(&path).unwrap();
        drop(listener);
        let (_listener2, _handle2) = bind_unix(&path).unwrap();
    }
}
