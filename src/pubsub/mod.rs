//! Публикация и подписка поверх брокера.
//!
//! - `publisher`: публикация конвертов в топики.
//! - `subscriber`: подписки, задачи доставки, отписка.
//! - `handler`: обработчики доставок и их реестр.
//! - `events`: события и счётчики обработки доставок.
//! - `cache` (приватный): кэш каналов по топикам.

mod cache;
pub mod events;
pub mod handler;
pub mod publisher;
pub mod subscriber;

pub use events::{DeliveryEvent, DeliveryOutcome, DeliveryStats};
pub use handler::{handler_fn, DeliveryHandler, HandlerError, HandlerRegistration, HandlerRegistry};
pub use publisher::{PublishOptions, Publisher};
pub use subscriber::{Subscriber, SubscriberArgs, Subscription, SubscriptionState};
