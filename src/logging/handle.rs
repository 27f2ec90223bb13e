use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing_appender::non_blocking::WorkerGuard;

/// Счётчики жизненного цикла логирования.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    flush_count: AtomicU64,
    shutdown_in_progress: AtomicBool,
}

/// Снимок [`LoggingMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingStats {
    pub flush_count: u64,
    pub shutdown_in_progress: bool,
    pub file_sink_active: bool,
}

/// Handle подсистемы логирования.
///
/// Держит guard неблокирующего файлового writer. Пока handle жив, фоновый
/// поток пишет события в файл; при `shutdown` буфер сбрасывается.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    metrics: Arc<LoggingMetrics>,
    flush_timeout: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingMetrics {
    fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    fn start_shutdown(&self) {
        self.shutdown_in_progress.store(true, Ordering::Release);
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// Отмечает запрос на flush.
    ///
    /// `tracing-appender` сбрасывает буфер только при drop guard, поэтому
    /// здесь фиксируется только счётчик.
    pub fn flush(&self) {
        self.metrics.record_flush();
        tracing::debug!(
            flush_count = self.metrics.flush_count(),
            "Logging flush requested"
        );
    }

    /// Синхронное завершение: drop guard с ожиданием сброса буфера.
    pub fn shutdown(mut self) {
        self.metrics.start_shutdown();
        tracing::info!(
            flushes = self.metrics.flush_count(),
            timeout_ms = self.flush_timeout.as_millis() as u64,
            "Logging shutdown initiated"
        );

        let start = Instant::now();
        drop(self.file_guard.take());
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: logging shutdown took {}ms (timeout {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    /// Асинхронное завершение: guard сбрасывается в blocking-потоке, ожидание
    /// ограничено `timeout`.
    pub async fn shutdown_async(
        mut self,
        timeout: Duration,
    ) {
        self.metrics.start_shutdown();
        tracing::info!(
            timeout_ms = timeout.as_millis() as u64,
            "Async logging shutdown initiated"
        );

        let guard = self.file_guard.take();
        let flush = tokio::task::spawn_blocking(move || drop(guard));

        match tokio::time::timeout(timeout, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("Logging shutdown task failed: {e}"),
            Err(_) => eprintln!(
                "WARNING: logging shutdown exceeded timeout of {}ms",
                timeout.as_millis()
            ),
        }
    }

    pub fn stats(&self) -> LoggingStats {
        LoggingStats {
            flush_count: self.metrics.flush_count(),
            shutdown_in_progress: self.metrics.is_shutdown_in_progress(),
            file_sink_active: self.file_guard.is_some(),
        }
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.metrics.is_shutdown_in_progress()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() && !self.metrics.is_shutdown_in_progress() {
            eprintln!(
                "WARNING: LoggingHandle dropped without shutdown(); buffered file logs may be lost"
            );
        }
    }
}

impl std::fmt::Debug for LoggingHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LoggingHandle")
            .field("file_sink_active", &self.file_guard.is_some())
            .field("flush_timeout", &self.flush_timeout)
            .field("metrics", &self.metrics)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
