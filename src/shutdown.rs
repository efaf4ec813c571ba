use crate::logger::{self, LogTag};
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

static SHUTDOWN_NOTIFY: Lazy<Arc<Notify>> = Lazy::new(|| Arc::new(Notify::new()));
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);

/// Handle used by background tasks and the webserver to observe shutdown.
pub fn shutdown_notify() -> Arc<Notify> {
    Arc::clone(&SHUTDOWN_NOTIFY)
}

pub fn is_shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::SeqCst)
}

/// Flip the shutdown flag and wake every waiter. Idempotent.
pub fn trigger_shutdown() {
    if !SHUTTING_DOWN.swap(true, Ordering::SeqCst) {
        logger::info(LogTag::System, "Shutdown requested, stopping services");
        SHUTDOWN_NOTIFY.notify_waiters();
    }
}

/// Install the Ctrl-C handler. Call once from main.
pub fn install_ctrlc_handler() {
    if let Err(e) = ctrlc::set_handler(trigger_shutdown) {
        logger::warning(
            LogTag::System,
            &format!("Failed to install Ctrl-C handler: {}", e),
        );
    }
}
