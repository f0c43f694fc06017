//! OTG event types
//!
//! Defines the events broadcast through the event bus.

use serde::{Deserialize, Serialize};

use crate::otg::{OtgState, TransceiverEvent};

/// OTG event enumeration
///
/// Serialized with `serde(tag = "event", content = "data")`:
/// ```json
/// {
///   "event": "otg.state_changed",
///   "data": { "from": "b_idle", "to": "a_wait_vrise" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum OtgEvent {
    /// Controller bound to its hardware resources
    #[serde(rename = "otg.bound")]
    Bound,

    /// Controller released its hardware resources
    #[serde(rename = "otg.unbound")]
    Unbound,

    /// OTG state machine moved
    #[serde(rename = "otg.state_changed")]
    StateChanged { from: OtgState, to: OtgState },

    /// VBUS session requested on or off
    #[serde(rename = "otg.vbus")]
    Vbus { on: bool },

    /// Transceiver notification delivered
    #[serde(rename = "otg.transceiver")]
    Transceiver {
        event: TransceiverEvent,
        handled: bool,
    },

    /// Root-hub status poll requested after resume signalling
    #[serde(rename = "otg.root_hub_poll")]
    RootHubPoll,

    /// Clock gated and context saved
    #[serde(rename = "pm.suspended")]
    Suspended,

    /// Clock restored and context reapplied
    #[serde(rename = "pm.resumed")]
    Resumed,
}
