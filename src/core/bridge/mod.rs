//! Per-call audio bridge.
//!
//! One [`CallBridge`] per call owns the remote speech session and a bounded
//! [`OutputBuffer`]. Three tasks run while the call is active:
//!
//! ```text
//!            inbound pump                       event loop
//! media ─────────────────────▶ session ─────────────────────▶ OutputBuffer
//!   ▲                                                              │
//!   └──────────────────────── outbound pump ◀──────────────────────┘
//! ```
//!
//! [`run_call`] drives the pumps and performs teardown; it is what the
//! registry spawns for every accepted call.

mod buffer;
mod call;
mod call_bridge;
mod events;
mod pumps;
mod state;
mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{DEFAULT_OUTPUT_BUFFER_CAPACITY, OutputBuffer};
pub use call::{CallControl, CallOutcome, CancelReason, run_call};
pub use call_bridge::{BridgeConfig, CallBridge, ConnectError};
pub use events::Termination;
pub use pumps::{PumpExit, inbound_pump, outbound_pump};
pub use state::BridgeState;
pub use stats::{BridgeStats, StatsSnapshot};
