pub mod service;

pub use service::{VolumeUpCloseState, VolumeUpData, VolumeUpService, VolumeUpStats};
