/// Broker bus host wiring: connection, topology and facades together.
pub mod bus;
/// Settings loading: broker parameters, topology, logging.
pub mod config;
/// Connection lifetime and channel creation.
pub mod connection;
/// Envelope wire format.
pub mod envelope;
/// Structured logging setup (filters, formats, sinks).
pub mod logging;
/// Publisher, subscriber, delivery handlers and events.
pub mod pubsub;
/// Exchange/queue declarations, bootstrapper and topic registry.
pub mod topology;
/// Broker seam and the in-process broker.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use bus::MessageBus;
pub use config::{BrokerSettings, Settings, SettingsError};
pub use connection::{ChannelFactory, ConnectionManager};
pub use courier_error::{CourierResult, ErrorExt, StackError, StatusCode};
pub use envelope::Envelope;
pub use pubsub::{
    handler_fn, DeliveryEvent, DeliveryHandler, DeliveryOutcome, DeliveryStats, HandlerRegistry,
    PublishOptions, Publisher, Subscriber, SubscriberArgs, Subscription, SubscriptionState,
};
pub use topology::{
    ExchangeConfig, ExchangeKind, QueueConfig, TopicRegistry, TopologyBootstrapper,
    TopologyConfig, TopologyReport,
};
pub use transport::{BrokerChannel, BrokerConnection, Connector, MemoryBroker, MemoryConnector};
/// Cancellation signal accepted by every asynchronous operation.
pub use tokio_util::sync::CancellationToken;
