//! Bidirectional byte relay with an idle bound
//!
//! The relay is blind: bytes are copied verbatim in both directions until
//! either peer closes or nothing moves for the idle duration. Used for
//! CONNECT tunnels and for streaming plain-HTTP responses back.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, trace};

use windlass_common::Result;

/// Bytes moved in each direction by one relay
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

/// Copy bytes both ways until close or idle timeout.
///
/// The client read side is generic so a buffered reader with leftover bytes
/// from request-head parsing can be passed straight in.
pub async fn relay<CR, CW, UR, UW>(
    mut client_read: CR,
    mut client_write: CW,
    mut upstream_read: UR,
    mut upstream_write: UW,
    idle: Duration,
) -> Result<RelayStats>
where
    CR: AsyncRead + Unpin,
    CW: AsyncWrite + Unpin,
    UR: AsyncRead + Unpin,
    UW: AsyncWrite + Unpin,
{
    let mut client_buf = vec![0u8; 16 * 1024];
    let mut upstream_buf = vec![0u8; 16 * 1024];
    let mut stats = RelayStats::default();

    let idle_sleep = tokio::time::sleep(idle);
    tokio::pin!(idle_sleep);

    loop {
        tokio::select! {
            n = client_read.read(&mut client_buf) => {
                let n = n?;
                if n == 0 {
                    trace!("client side closed");
                    break;
                }
                upstream_write.write_all(&client_buf[..n]).await?;
                stats.client_to_upstream += n as u64;
                idle_sleep.as_mut().reset(Instant::now() + idle);
            }
            n = upstream_read.read(&mut upstream_buf) => {
                let n = n?;
                if n == 0 {
                    trace!("upstream side closed");
                    break;
                }
                client_write.write_all(&upstream_buf[..n]).await?;
                stats.upstream_to_client += n as u64;
                idle_sleep.as_mut().reset(Instant::now() + idle);
            }
            _ = &mut idle_sleep => {
                debug!("tunnel idle for {:?}, closing", idle);
                break;
            }
        }
    }

    // Both directions are shut down regardless of which side ended the
    // relay, so neither peer is left holding a half-open socket.
    let _ = client_write.shutdown().await;
    let _ = upstream_write.shutdown().await;

    Ok(stats)
}
