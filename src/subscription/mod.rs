pub mod notifier;
pub mod registry;

pub use notifier::{Notifier, NotifyOutcome, Phase};
pub use registry::{SubscriptionId, SubscriptionRegistry, DEFAULT_DISPATCH_TIMEOUT};
