//! Position monitoring: the staged exit plan for open positions.
//!
//! Exit strategy per position:
//! 1. Original stop: full exit if price hits the stop before the first target
//! 2. First target: sell a configured share of the initial quantity, move the
//!    stop to breakeven
//! 3. Trailing stop: once risk:reward clears the activation multiple, trail
//!    below the highest price seen and ratchet upward only

pub mod position;

mod service;

pub use position::{
    ClosedPositionRecord, ExitAction, ExitParams, ManagedPosition, ManagedPositionStatus,
    PartialExit,
};
pub use service::{ExitEvent, MonitorCommand, MonitorHandle, PositionMonitor};
