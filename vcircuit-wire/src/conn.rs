//! Frame I/O on compio TCP streams, shared by the daemon and the bus client.

use crate::codec::{parse_header, HEADER_LEN};
use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use compio::net::TcpStream;
use flume::Receiver;
use std::io;
use tracing::trace;

/// Read one frame. Returns `Ok(None)` on a clean EOF at a frame boundary.
pub(crate) async fn read_frame(stream: &mut TcpStream) -> io::Result<Option<(u8, Bytes)>> {
    let header = [0u8; HEADER_LEN];
    let BufResult(res, header) = stream.read_exact(header).await;
    match res {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let (kind, len) = parse_header(&header).map_err(io::Error::other)?;
    if len == 0 {
        return Ok(Some((kind, Bytes::new())));
    }

    let body = vec![0u8; len];
    let BufResult(res, body) = stream.read_exact(body).await;
    res?;
    Ok(Some((kind, Bytes::from(body))))
}

/// Write every frame from `rx` until the channel closes or a write fails,
/// then shut down the write half.
pub(crate) async fn write_frames(mut stream: TcpStream, rx: Receiver<Bytes>, label: String) {
    while let Ok(frame) = rx.recv_async().await {
        let BufResult(res, _) = stream.write_all(frame.to_vec()).await;
        if let Err(e) = res {
            trace!(label = %label, error = %e, "[CONN] Write failed");
            break;
        }
    }
    let _ = AsyncWrite::shutdown(&mut stream).await;
    trace!(label = %label, "[CONN] Writer stopped");
}
