//! ATP 资源管理
//!
//! 负责测试计划所用的共享有状态资源 (仪器、被测设备等)：
//! 从步骤引用的资源出发构建依赖图，检测依赖环与缺失依赖，
//! 并按照急切 (eager) 或惰性 (lazy) 策略打开与关闭资源。

pub mod graph;
pub mod lifecycle;
pub mod resource;
pub mod state;

pub use graph::{DependencyEdge, ResourceGraph, ResourceNode};
pub use lifecycle::{
    strategy_for, CloseReport, EagerStrategy, LazyStrategy, LifecycleManager, LifecycleStrategy,
    ResourceStrategy,
};
pub use resource::{OpenMode, Resource, ResourceField, ResourceKey, ResourceRef};
pub use state::ResourceState;

use thiserror::Error;

/// 资源管理错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("资源 {resource} 缺少必需的依赖: {field}")]
    MissingDependency { resource: String, field: String },

    #[error("检测到资源依赖环: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("打开资源 {resource} 失败: {message}")]
    OpenFailed { resource: String, message: String },

    #[error("资源 {resource} 的依赖 {dependency} 未能打开")]
    DependencyFailed { resource: String, dependency: String },

    #[error("关闭资源 {resource} 失败: {message}")]
    CloseFailed { resource: String, message: String },

    #[error("资源等待被取消: {0}")]
    Cancelled(String),
}

impl ResourceError {
    /// 是否由取消引起
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// 是否为依赖图解析错误 (环或缺失依赖)
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency { .. } | Self::DependencyCycle { .. }
        )
    }
}

impl From<atp_context::ContextError> for ResourceError {
    fn from(err: atp_context::ContextError) -> Self {
        match err {
            atp_context::ContextError::Cancelled(name) => Self::Cancelled(name),
            other => Self::OpenFailed {
                resource: "<context>".to_string(),
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;
