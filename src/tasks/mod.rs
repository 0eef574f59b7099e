//! Background tasks.

mod broadcast;

pub use broadcast::BroadcastTask;
