//! Buy-then-exit trading logic for a single symbol.
//!
//! The machine alternates between holding nothing and holding one bought
//! amount, exiting on a sell-price move beyond the activation threshold or
//! after the maximum hold time.

pub mod config;
pub mod machine;
pub mod position;

pub use config::TraderConfig;
pub use machine::{CycleOutcome, ExitReason, MachineParams, TradingStateMachine};
pub use position::{PositionState, TradingPosition};
