//! Domain types shared by every layer: requests, canonical results, pending
//! locks, session state and the ports through which the terminal is reached.

pub mod delivery;
pub mod pending;
pub mod ports;
pub mod result;
pub mod session;
pub mod transaction;
