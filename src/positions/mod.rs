pub mod locks;
pub mod store;
pub mod types;

pub use locks::PositionLocks;
pub use store::{calculate_pnl, PositionsStore};
pub use types::{PnlReport, Position, PositionMeta, PositionStatus};
