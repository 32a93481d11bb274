//! Matchmaking: device affinity and room placement

pub mod device;
pub mod service;

pub use device::DeviceClass;
pub use service::{spawn_sweeper, RoomManager};
