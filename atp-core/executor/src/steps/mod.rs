//! 内置步骤
//!
//! - [`SequenceStep`]: 顺序执行子步骤
//! - [`ParallelStep`]: 并行执行子步骤
//! - [`RepeatStep`]: 重复执行子步骤
//! - [`DelayStep`]: 可取消的等待
//! - [`VerdictStep`]: 直接给出判定

mod delay;
mod flow;
mod verdict;

pub use delay::DelayStep;
pub use flow::{ParallelStep, RepeatStep, SequenceStep};
pub use verdict::VerdictStep;
