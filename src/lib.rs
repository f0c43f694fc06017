//! otg-glue - Dual-role USB OTG controller glue
//!
//! Platform glue for a dual-role USB controller core: OTG session and role
//! state machine, transceiver cable events, idle timer and power-context
//! save/restore around interface clock gating.

pub mod config;
pub mod error;
pub mod events;
pub mod otg;
pub mod regs;
pub mod sim;

pub use error::{OtgError, Result};
