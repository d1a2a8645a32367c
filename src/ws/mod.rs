//! WebSocket transport: protocol types, room fan-out, connection handling

pub mod handler;
pub mod protocol;
pub mod room;
