pub mod icmp;
pub mod pinger;
pub mod socket;

pub use icmp::*;
pub use pinger::*;
pub use socket::*;

use std::future::Future;
use std::time::Duration;

use crate::state::ProbeResult;

/// One echo-style probe against a target.
///
/// Implementations never fail: every outcome, including resolution and
/// socket errors, is folded into a [`ProbeResult`] status.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, target: &str, timeout: Duration) -> impl Future<Output = ProbeResult> + Send;
}
