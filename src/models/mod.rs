//! Data models for setups, positions, resizing steps, accounts and configs.

mod account;
mod config_entry;
mod position;
mod setup;
mod step;

pub use account::{Account, AccountChange, AccountChangeType, AccountStats, FeeSchedule};
pub use config_entry::ConfigEntry;
pub use position::{Position, PositionStatus, Side};
pub use setup::{Setup, SetupError};
pub use step::{OrderType, ResizingStep, StepRef};

/// Fresh random identifier for a new entity.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
