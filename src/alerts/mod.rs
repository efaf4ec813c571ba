pub mod router;
pub mod types;

pub use router::AlertsRouter;
pub use types::{Alert, AlertFamily, AlertKind};
