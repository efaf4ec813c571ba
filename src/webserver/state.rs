use crate::alerts::AlertsRouter;
use crate::bots::BotsRegistry;
use crate::trend::TrendService;
use crate::volume::VolumeUpService;
use std::sync::Arc;

/// Shared handler state.
pub struct AppState {
    pub router: AlertsRouter,
    pub registry: Arc<BotsRegistry>,
    pub trend: Arc<TrendService>,
    pub volume: Arc<VolumeUpService>,
}

impl AppState {
    pub fn new(
        registry: Arc<BotsRegistry>,
        trend: Arc<TrendService>,
        volume: Arc<VolumeUpService>,
    ) -> Self {
        Self {
            router: AlertsRouter::new(Arc::clone(&registry), Arc::clone(&volume)),
            registry,
            trend,
            volume,
        }
    }
}
