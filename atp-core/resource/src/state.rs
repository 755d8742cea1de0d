//! 资源状态

use serde::{Deserialize, Serialize};

/// 资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// 未打开
    #[default]
    Closed,
    /// 打开中
    Opening,
    /// 已打开
    Open,
    /// 打开失败
    Failed,
    /// 关闭中
    Closing,
}

impl ResourceState {
    /// 是否已打开 (可供步骤使用)
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// 获取中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Closed => "未打开",
            Self::Opening => "打开中",
            Self::Open => "已打开",
            Self::Failed => "打开失败",
            Self::Closing => "关闭中",
        }
    }
}
