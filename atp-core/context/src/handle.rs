//! 工作单元句柄

use std::any::Any;

use tokio::task::JoinHandle;

use crate::context::ExecutionContext;
use crate::{ContextError, Result};

/// 派生工作单元的句柄
///
/// 丢弃句柄不会取消工作单元。
pub struct ContextHandle<T> {
    context: ExecutionContext,
    join: JoinHandle<T>,
}

impl<T> ContextHandle<T> {
    pub(crate) fn new(context: ExecutionContext, join: JoinHandle<T>) -> Self {
        Self { context, join }
    }

    /// 工作单元所在的上下文
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// 取消工作单元及其后代
    pub fn abort(&self) {
        self.context.abort();
    }

    /// 工作单元主体是否已结束 (不含后代)
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 注册层级完成回调，在工作单元及其全部后代结束后调用
    pub fn on_hierarchy_completed<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.context.completion().on_complete(callback);
    }

    /// 等待工作单元及其全部后代结束
    pub async fn wait_hierarchy(&self) {
        self.context.completion().wait().await
    }

    /// 等待工作单元主体结束并取回结果
    ///
    /// 工作单元内的 panic 以 [`ContextError::Panicked`] 返回给等待者。
    pub async fn join(self) -> Result<T> {
        match self.join.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => Err(ContextError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(ContextError::JoinFailed(e.to_string())),
        }
    }
}

/// 提取 panic 负载中的消息
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知 panic".to_string()
    }
}
