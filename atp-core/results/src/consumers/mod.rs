//! 内置结果消费者

mod collecting;
mod logging;

pub use collecting::{CollectedEvent, CollectingConsumer};
pub use logging::LogConsumer;
