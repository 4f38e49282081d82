//! Network output: one shared non-blocking UDP socket for every playback
//! engine, plus cached hostname resolution so a flaky DNS server can never
//! stall a frame send.

mod dns;
mod endpoint;
mod sender;

pub use dns::DnsCache;
pub use endpoint::Endpoint;
pub use sender::{fit_payload, UdpSender};
