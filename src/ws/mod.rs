//! Server feed: wire types and the snapshot inbox

pub mod inbox;
pub mod protocol;
