//! Dual-role USB controller glue
//!
//! Platform layer between a dual-role (host/peripheral) USB controller core
//! and the SoC: OTG session and role handling, transceiver cable events,
//! the idle timer and power-context save/restore around clock gating.
//!
//! Architecture:
//! ```text
//! OtgGlue (bound instance, one lock per controller)
//!     ├── Session      (transition table, VBUS, idle handler)
//!     ├── IdleTimer    (deadline timer on the tokio runtime)
//!     ├── NotifierHandle ── Transceiver (cable/VBUS events)
//!     └── pm           (suspend/resume, register snapshot)
//!             └── RegisterBus / ClockControl / CoreController
//! ```
//!
//! Every entry point (transceiver delivery, timer firing, PM callbacks and
//! requests from the core engine) takes the same per-instance lock, so state
//! transitions for one controller never interleave.

pub mod glue;
pub mod idle;
pub mod platform;
pub mod state;
pub mod transceiver;

mod notify;
mod pm;
mod session;

pub use glue::{BindResources, OtgGlue, OtgStatus};
pub use idle::IdleTimer;
pub use platform::{ClockControl, CoreCall, CoreController, SimClock, SimCore};
pub use state::{ControllerState, OtgState, PortStatus, RegisterSnapshot, Role};
pub use transceiver::{
    NotifyStatus, OtgNotifier, SimTransceiver, Transceiver, TransceiverCall, TransceiverEvent,
};
