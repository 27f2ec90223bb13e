use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, Resource, StatusCode};

/// Ошибка операции ядра: типизированная причина и цепочка кадров контекста.
///
/// Причина остаётся доступной через `downcast_ref`/`is`, поэтому вызывающий
/// код различает, например, `TopicNotConfiguredError` и `ConnectionError`,
/// сколько бы кадров ни было добавлено сверху. Клонирование не копирует
/// причину: один исход попытки подключения раздаётся всем ожидающим.
#[derive(Clone)]
pub struct StackError {
    cause: Arc<dyn ErrorExt>,
    frames: Arc<[Frame]>,
}

/// Кадр контекста: что делал код и где был добавлен кадр.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message: String,
    pub location: &'static Location<'static>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            cause: Arc::new(err),
            frames: Arc::from(Vec::new()),
        }
    }

    /// Добавляет внешний кадр контекста.
    #[track_caller]
    pub fn context(
        self,
        message: impl Into<String>,
    ) -> Self {
        let mut frames = self.frames.to_vec();
        frames.push(Frame {
            message: message.into(),
            location: Location::caller(),
        });
        Self {
            cause: self.cause,
            frames: Arc::from(frames),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.cause.status_code()
    }

    /// Возвращает сообщение для вызывающего кода.
    pub fn client_message(&self) -> String {
        self.cause.client_message()
    }

    /// Объект брокера, на котором случился сбой, если причина его знает.
    pub fn resource(&self) -> Option<Resource<'_>> {
        self.cause.resource()
    }

    /// Кадры от самого раннего к самому внешнему.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.cause.as_any().downcast_ref::<T>()
    }

    /// Лежит ли в основании ошибка типа `T`.
    pub fn is<T: ErrorExt>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    /// Подсказка вызывающему коду: ядро само ничего не повторяет.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let frames: Vec<String> = self
            .frames
            .iter()
            .map(|frame| {
                format!(
                    "{} at {}:{}",
                    frame.message,
                    frame.location.file(),
                    frame.location.line()
                )
            })
            .collect();

        f.debug_struct("StackError")
            .field("status", &self.status_code())
            .field("cause", &self.cause.to_string())
            .field("resource", &self.resource())
            .field("frames", &frames)
            .finish()
    }
}

/// Внешний кадр идёт первым: `publish to 'orders': open channel: <причина>`.
impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for frame in self.frames.iter().rev() {
            write!(f, "{}: ", frame.message)?;
        }
        write!(f, "{}", self.cause)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
