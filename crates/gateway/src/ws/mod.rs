//! WebSocket surfaces: the domain-event broadcast sink and the terminal
//! protocol.

pub mod broadcast;
pub mod terminal;
