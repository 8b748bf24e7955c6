//! Blocking one-shot RPC client.
//!
//! One call opens one connection, writes one request frame, reads one
//! response frame and closes. There is no timeout; a silent peer blocks
//! the caller until it closes the connection.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use serde::Serialize;

use super::framing::{self, HEADER_LEN};
use super::messages::Response;
use super::{check_socket_path, IpcError};

/// Send `request` to the session socket at `socket_path` and wait for the
/// response.
///
/// The stream is dropped (closing the connection) on every return path.
pub fn round_trip<Req: Serialize>(
    socket_path: &Path,
    request: &Req,
) -> Result<Response, IpcError> {
    check_socket_path(socket_path)?;

    let mut stream = UnixStream::connect(socket_path).map_err(|source| IpcError::Connect {
        path: socket_path.to_path_buf(),
        source,
    })?;

    let frame = framing::encode(request)?;
    log::debug!("[Client] sending {} byte frame to {}", frame.len(), socket_path.display());
    stream.write_all(&frame).map_err(IpcError::Write)?;
    stream.flush().map_err(IpcError::Write)?;

    let payload = read_frame(&mut stream)?;
    framing::decode(&payload)
}

/// Read one length-prefixed frame and return its payload.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, IpcError> {
    let mut header = [0u8; HEADER_LEN];
    read_full(reader, &mut header)?;
    let length = framing::parse_header(header)?;

    let mut payload = vec![0u8; length];
    read_full(reader, &mut payload)?;
    Ok(payload)
}

/// Fill `buf` completely, distinguishing EOF from I/O failure.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), IpcError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(IpcError::ShortRead {
                    expected: buf.len(),
                    received: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(IpcError::Read(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::messages::{ListRequest, Status};
    use std::os::unix::net::UnixListener;

    /// Serve exactly one connection on a background thread with `reply`.
    fn one_shot_server(
        path: &Path,
        reply: impl FnOnce(Vec<u8>, &mut UnixStream) + Send + 'static,
    ) -> std::thread::JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let body = read_frame(&mut stream).unwrap();
            reply(body, &mut stream);
        })
    }

    #[test]
    fn test_round_trip_echoes_correlation_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock = tmp.path().join("tn.sock");
        let server = one_shot_server(&sock, |body, stream| {
            let req: ListRequest = framing::decode(&body).unwrap();
            let resp = Response::ok_with(req.correlation_id, format!("group={}", req.group));
            stream.write_all(&framing::encode(&resp).unwrap()).unwrap();
        });

        let req = ListRequest::new("build");
        let resp = round_trip(&sock, &req).unwrap();
        server.join().unwrap();

        assert_eq!(resp.correlation_id, Some(req.correlation_id));
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.message.as_deref(), Some("group=build"));
    }

    #[test]
    fn test_missing_socket_is_connect_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let socket = tmp.path().join("absent.sock");
        let err = round_trip(&socket, &ListRequest::new("ALL")).unwrap_err();
        assert!(err.is_connect(), "{err}");
    }

    #[test]
    fn test_long_path_is_connect_error() {
        let long = std::path::PathBuf::from(format!("/tmp/{}.sock", "a".repeat(200)));
        let err = round_trip(&long, &ListRequest::new("ALL")).unwrap_err();
        assert!(matches!(err, IpcError::PathTooLong { .. }));
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_peer_closes_mid_payload_is_short_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock = tmp.path().join("tn.sock");
        let server = one_shot_server(&sock, |_, stream| {
            // Declare 100 bytes, deliver 3.
            stream.write_all(&100u32.to_be_bytes()).unwrap();
            stream.write_all(b"{\"s").unwrap();
        });

        let err = round_trip(&sock, &ListRequest::new("ALL")).unwrap_err();
        server.join().unwrap();
        assert!(
            matches!(err, IpcError::ShortRead { expected: 100, received: 3 }),
            "{err:?}"
        );
    }

    #[test]
    fn test_peer_closes_without_reply_is_short_read() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock = tmp.path().join("tn.sock");
        let server = one_shot_server(&sock, |_, _| {});

        let err = round_trip(&sock, &ListRequest::new("ALL")).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, IpcError::ShortRead { expected: 4, received: 0 }), "{err:?}");
    }

    #[test]
    fn test_malformed_reply_is_decode_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sock = tmp.path().join("tn.sock");
        let server = one_shot_server(&sock, |_, stream| {
            stream.write_all(&framing::encode_raw(b"[1,2,3]").unwrap()).unwrap();
        });

        let err = round_trip(&sock, &ListRequest::new("ALL")).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, IpcError::Decode(_)), "{err:?}");
    }

    #[test]
    fn test_read_frame_from_chunked_reader() {
        let frame = framing::encode_raw(b"hello").unwrap();
        // Reader yields one byte per read call.
        struct Trickle(Vec<u8>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0.remove(0);
                Ok(1)
            }
        }
        assert_eq!(read_frame(&mut Trickle(frame)).unwrap(), b"hello");
    }
}
