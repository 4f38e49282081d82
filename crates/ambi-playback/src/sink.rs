use std::sync::Arc;

use ambi_net::{fit_payload, Endpoint, UdpSender};

/// Where emitted frames go. Production uses [`UdpFrameSink`]; tests swap
/// in a recorder.
pub trait FrameSink: Send + Sync {
    fn send(&self, payload: &[u8]);
}

/// Sends frames to one WLED endpoint through the shared process socket.
///
/// Payloads are fitted to the device's physical strip length (zero-padded
/// or truncated on the right) and the endpoint's hostname goes through the
/// non-blocking DNS cache — an unresolvable host skips frames instead of
/// stalling the engine.
pub struct UdpFrameSink {
    sender: Arc<UdpSender>,
    endpoint: Endpoint,
    physical_len: usize,
}

impl UdpFrameSink {
    #[must_use]
    pub fn new(sender: Arc<UdpSender>, endpoint: Endpoint, physical_len: usize) -> Self {
        Self {
            sender,
            endpoint,
            physical_len,
        }
    }
}

impl FrameSink for UdpFrameSink {
    fn send(&self, payload: &[u8]) {
        let Some(addr) = self.sender.resolve(&self.endpoint) else {
            return;
        };
        self.sender.send(&fit_payload(payload, self.physical_len), addr);
    }
}
