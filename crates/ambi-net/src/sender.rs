use std::borrow::Cow;
use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;

use crate::dns::DnsCache;
use crate::endpoint::Endpoint;

/// Best-effort datagram output shared by every playback engine.
///
/// One socket per process; `try_send_to` is atomic per datagram so no lock
/// is needed around sends. There is no retransmission: a frame that cannot
/// be sent right now is gone, the next one is due in tens of milliseconds
/// anyway.
pub struct UdpSender {
    socket: UdpSocket,
    dns: Arc<DnsCache>,
    skipped: AtomicU64,
    errored_targets: Mutex<HashSet<SocketAddr>>,
}

impl UdpSender {
    /// Bind the shared socket to an ephemeral port.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses a UDP socket.
    pub async fn bind(dns: Arc<DnsCache>) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            dns,
            skipped: AtomicU64::new(0),
            errored_targets: Mutex::new(HashSet::new()),
        })
    }

    /// Resolve an endpoint to a socket address without ever blocking.
    ///
    /// `None` means the hostname has no usable address yet; the caller
    /// skips this frame and asks again on the next one.
    #[must_use]
    pub fn resolve(&self, endpoint: &Endpoint) -> Option<SocketAddr> {
        self.dns
            .lookup(&endpoint.host)
            .map(|ip| SocketAddr::new(ip, endpoint.port))
    }

    /// Fire one datagram at `addr`.
    ///
    /// `WouldBlock` is a skip, not an error. Anything else is logged once
    /// per target and otherwise swallowed — playback must not care.
    pub fn send(&self, payload: &[u8], addr: SocketAddr) {
        match self.socket.try_send_to(payload, addr) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let first = self
                    .errored_targets
                    .lock()
                    .expect("send error set poisoned")
                    .insert(addr);
                if first {
                    tracing::warn!(%addr, "udp send failed (reported once): {e}");
                }
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Datagrams dropped so far (busy socket or send errors).
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// Fit a payload to the device's physical strip length: zero-pad on the
/// right when the stream drives fewer LEDs than the strip has, truncate
/// when it drives more.
#[must_use]
pub fn fit_payload(payload: &[u8], physical_len: usize) -> Cow<'_, [u8]> {
    use std::cmp::Ordering as CmpOrdering;
    match payload.len().cmp(&physical_len) {
        CmpOrdering::Equal => Cow::Borrowed(payload),
        CmpOrdering::Greater => Cow::Borrowed(&payload[..physical_len]),
        CmpOrdering::Less => {
            let mut padded = Vec::with_capacity(physical_len);
            padded.extend_from_slice(payload);
            padded.resize(physical_len, 0);
            Cow::Owned(padded)
        }
    }
}
