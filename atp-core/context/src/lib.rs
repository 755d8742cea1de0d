//! ATP 执行上下文
//!
//! 每个并发工作单元都运行在一个执行上下文中：
//! - 上下文最多只有一个父上下文，取消只向下传播，不影响兄弟和祖先；
//! - 上下文值分为继承 (分支时复制) 和非继承 (新分支总是为空) 两种；
//! - 层级完成回调在工作单元及其所有后代都结束后才触发。

pub mod context;
pub mod handle;
pub mod hierarchy;
pub mod values;

pub use context::{ContextId, ExecutionContext};
pub use handle::ContextHandle;
pub use hierarchy::Completion;
pub use values::{ContextKey, Inheritance};

use thiserror::Error;

/// 执行上下文错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("执行上下文已取消: {0}")]
    Cancelled(String),

    #[error("工作单元发生 panic: {0}")]
    Panicked(String),

    #[error("等待工作单元失败: {0}")]
    JoinFailed(String),
}

impl ContextError {
    /// 是否由取消引起
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
