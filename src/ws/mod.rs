//! WebSocket transport: upgrade handler, wire codec and event types

pub mod codec;
pub mod handler;
pub mod protocol;

pub use handler::ws_handler;
