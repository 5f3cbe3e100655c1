pub mod broadcaster;
pub mod messages;
pub mod registry;
pub mod session;
pub mod updater;

pub use broadcaster::Broadcaster;
pub use messages::{ClientMessage, PriceTick, ServerMessage, SubscriptionKey};
pub use registry::{DeliveryReport, RegistryStats, SubscriptionRegistry};
pub use updater::RealtimeUpdater;
