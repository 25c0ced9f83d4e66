//! Ambient infrastructure shared by the queue, pipeline and binary layers

pub mod error_handling;
pub mod logging;
pub mod retry;
pub mod shutdown;
pub mod styles;
pub mod sync;
pub mod time;
pub mod version;
