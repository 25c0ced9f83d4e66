//! Multi-step work pipelines over claim-based queues
//!
//! Items move through a chain of steps connected by queues. Each queue hands
//! an item to one consumer at a time under a visibility timeout, so a crashed
//! or stalled step never loses work: its claim expires and the item is
//! delivered again.

pub mod app;
pub mod core;
pub mod pipeline;
pub mod queue;
