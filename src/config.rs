//! Tracker configuration.

/// Configuration for route reconciliation and shutdown.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "camelCase"))]
pub struct TrackerConfig {
    /// How long shutdown waits for the event source's last known location
    /// before giving up and leaving open routes open.
    /// Default: 2000 ms
    pub finalize_timeout_ms: u64,

    /// Fire the route-finished notification for an end event that closed
    /// nothing (duplicate end, or end before any start).
    /// Default: true (observers treat it as a refresh signal)
    pub notify_on_dangling_end: bool,

    /// Clamp a closing time that is earlier than the route's start time
    /// (clock skew, stale last-known fix) to the start time.
    /// Default: true
    pub clamp_end_to_start: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            finalize_timeout_ms: 2_000,
            notify_on_dangling_end: true,
            clamp_end_to_start: true,
        }
    }
}

impl TrackerConfig {
    pub fn finalize_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.finalize_timeout_ms)
    }
}
