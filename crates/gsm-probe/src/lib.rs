//! gsm-probe: the protocol dispatch layer.
//!
//! Every supported game speaks one of ~30 bespoke query protocols. Each
//! protocol is implemented as a [`Strategy`]: given a [`ProbeTarget`]
//! (address, query port, protocol-specific extras) it performs the wire
//! exchange and returns a normalized [`Probe`].
//!
//! Strategies that depend on process-wide shared state (access tokens,
//! master-server snapshots) advertise `pre_query_required()`; the scheduler
//! invokes `pre_query()` at most once per tick for the whole process, and
//! every concurrent probe of that strategy within the tick reads the shared
//! state. Implementations must also tolerate lazy initialisation on a cold
//! start.

pub mod error;
pub mod net;
pub mod probe;
pub mod registry;
pub mod strategies;
pub mod strip;
pub mod target;

mod eos;

pub use error::ProbeError;
pub use probe::{Player, Probe, Tracking};
pub use registry::Registry;
pub use target::ProbeTarget;

use async_trait::async_trait;

/// A probe strategy for one wire protocol.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The registry name, e.g. `"source"`.
    fn name(&self) -> &'static str;

    /// Whether the scheduler must call [`Strategy::pre_query`] once per tick.
    fn pre_query_required(&self) -> bool {
        false
    }

    /// Refresh strategy-shared state (token, directory snapshot).
    ///
    /// Must be idempotent and safe under concurrent invocation; the scheduler
    /// serializes itself to one call per tick.
    async fn pre_query(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    /// Probe one endpoint and normalize the response.
    async fn query(&self, target: &ProbeTarget) -> Result<Probe, ProbeError>;
}
