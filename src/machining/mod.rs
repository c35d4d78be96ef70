// Continuous-machining state tracking
pub mod subscription;
pub mod tracker;

pub use subscription::{MachiningSubscription, SubscriptionConfig};
pub use tracker::{Applied, MachiningTracker, StateUpdate};
