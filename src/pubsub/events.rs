use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use courier_error::{EnvelopeDeserializationError, HandlerExecutionError};

/// Чем закончилась обработка одной доставки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Обработчик завершился успешно
    Handled,
    /// Сообщение пустое (`null`), обработчик не вызывался
    Skipped,
    /// Конверт или сообщение не разобраны, доставка подтверждена и отброшена
    DeserializationFailed(EnvelopeDeserializationError),
    /// Обработчик вернул ошибку или запаниковал, доставка всё равно подтверждена
    HandlerFailed(HandlerExecutionError),
}

/// Событие подписчика по каждой доставке.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub topic: Arc<str>,
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub message_id: Option<String>,
    pub redelivered: bool,
    pub outcome: DeliveryOutcome,
}

/// Снимок счётчиков подписчика.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub received: u64,
    pub handled: u64,
    pub skipped: u64,
    pub deserialization_failed: u64,
    pub handler_failed: u64,
    pub acked: u64,
    pub ack_failed: u64,
    /// Возвращены в очередь при отписке
    pub requeued: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DeliveryCounters {
    pub received: AtomicU64,
    pub handled: AtomicU64,
    pub skipped: AtomicU64,
    pub deserialization_failed: AtomicU64,
    pub handler_failed: AtomicU64,
    pub acked: AtomicU64,
    pub ack_failed: AtomicU64,
    pub requeued: AtomicU64,
}

impl DeliveryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::DeserializationFailed(_) | Self::HandlerFailed(_)
        )
    }
}

impl DeliveryCounters {
    pub fn record(
        &self,
        outcome: &DeliveryOutcome,
    ) {
        let counter = match outcome {
            DeliveryOutcome::Handled => &self.handled,
            DeliveryOutcome::Skipped => &self.skipped,
            DeliveryOutcome::DeserializationFailed(_) => &self.deserialization_failed,
            DeliveryOutcome::HandlerFailed(_) => &self.handler_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryStats {
        DeliveryStats {
            received: self.received.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            deserialization_failed: self.deserialization_failed.load(Ordering::Relaxed),
            handler_failed: self.handler_failed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_failed: self.ack_failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let counters = DeliveryCounters::default();
        counters.record(&DeliveryOutcome::Handled);
        counters.record(&DeliveryOutcome::Handled);
        counters.record(&DeliveryOutcome::Skipped);
        counters.record(&DeliveryOutcome::HandlerFailed(
            HandlerExecutionError::failed("t", "c", "boom"),
        ));

        let stats = counters.snapshot();
        assert_eq!(stats.handled, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.handler_failed, 1);
        assert_eq!(stats.deserialization_failed, 0);
    }

    #[test]
    fn test_is_failure() {
        assert!(!DeliveryOutcome::Handled.is_failure());
        assert!(!DeliveryOutcome::Skipped.is_failure());
        assert!(DeliveryOutcome::DeserializationFailed(EnvelopeDeserializationError::new(
            "t", "bad"
        ))
        .is_failure());
    }
}
