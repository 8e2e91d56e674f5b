//! Trading logic: position sizing, edit commands, planner defaults.

mod config;
mod lifecycle;
mod position_sizer;

pub use config::PlannerConfig;
pub use lifecycle::{validate_stop_loss, EditError, PositionEdit, MAX_LEVERAGE};
pub use position_sizer::{apply_plan, margin_estimate, PositionSizer};
