use std::fmt;

/// Lifecycle of a [`CallBridge`](super::CallBridge).
///
/// ```text
/// Idle -> Connecting -> Active -> Disconnecting -> Closed
///              |                        ^
///              +------------------------+  (handshake failure goes straight to Closed)
/// ```
///
/// `Closed` is terminal; a closed bridge is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Idle,
    Connecting,
    Active,
    Disconnecting,
    Closed,
}

impl BridgeState {
    /// True once teardown has started.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Disconnecting | BridgeState::Closed)
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Idle => "idle",
            BridgeState::Connecting => "connecting",
            BridgeState::Active => "active",
            BridgeState::Disconnecting => "disconnecting",
            BridgeState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
