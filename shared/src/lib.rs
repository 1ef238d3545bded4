//! Wire-level types shared by the master server daemon and its clients.

pub mod protocol;
pub mod tags;
pub mod types;
