pub mod ext;
pub mod macros;
pub mod stack;
pub mod status_code;
pub mod types;

// Всё доступно из корня крейта: `courier_error::StackError` и т.д.
pub use ext::*;
pub use macros::*;
pub use stack::*;
pub use status_code::*;
pub use types::*;

pub type CourierResult<T> = Result<T, StackError>;
