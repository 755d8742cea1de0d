//! ATP 通用类型定义
//!
//! 此 crate 包含执行上下文、资源管理、结果管道和执行器之间共享的类型：
//! 判定结果 (Verdict) 及其格 (lattice) 运算、步骤/运行标识符。

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// 测试步骤 ID
pub type StepId = uuid::Uuid;

/// 运行记录 ID (计划运行与步骤运行共用)
pub type RunId = uuid::Uuid;

/// 判定结果
///
/// 全序格：`NotSet < Pass < Inconclusive < Fail < Aborted < Error`。
/// 一次运行中判定结果只能升级，聚合取最大值。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Verdict {
    /// 未设置
    #[default]
    NotSet = 0,
    /// 通过
    Pass = 1,
    /// 不确定
    Inconclusive = 2,
    /// 失败
    Fail = 3,
    /// 已中止
    Aborted = 4,
    /// 错误
    Error = 5,
}

impl Verdict {
    /// 全部判定结果，按格顺序排列
    pub const ALL: [Verdict; 6] = [
        Verdict::NotSet,
        Verdict::Pass,
        Verdict::Inconclusive,
        Verdict::Fail,
        Verdict::Aborted,
        Verdict::Error,
    ];

    /// 取两个判定结果中较高的一个
    pub fn max(self, other: Verdict) -> Verdict {
        std::cmp::max(self, other)
    }

    /// 是否属于失败类判定 (Fail 及以上)
    pub fn is_failure(&self) -> bool {
        *self >= Verdict::Fail
    }

    /// 是否已设置
    pub fn is_set(&self) -> bool {
        *self != Verdict::NotSet
    }

    /// 前端使用的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotSet | Self::Pass => 0,
            Self::Inconclusive => 20,
            Self::Fail => 30,
            Self::Aborted => 40,
            Self::Error => 50,
        }
    }

    /// 英文名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSet => "NotSet",
            Self::Pass => "Pass",
            Self::Inconclusive => "Inconclusive",
            Self::Fail => "Fail",
            Self::Aborted => "Aborted",
            Self::Error => "Error",
        }
    }

    /// 获取中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::NotSet => "未设置",
            Self::Pass => "通过",
            Self::Inconclusive => "不确定",
            Self::Fail => "失败",
            Self::Aborted => "已中止",
            Self::Error => "错误",
        }
    }

    fn from_repr(value: u8) -> Verdict {
        match value {
            1 => Self::Pass,
            2 => Self::Inconclusive,
            3 => Self::Fail,
            4 => Self::Aborted,
            5 => Self::Error,
            _ => Self::NotSet,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verdict::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("未知的判定结果: {}", s))
    }
}

/// 可并发升级的判定结果
///
/// 基于 `AtomicU8::fetch_max`，多个任务同时升级时不会丢失较高的判定。
#[derive(Debug, Default)]
pub struct AtomicVerdict(AtomicU8);

impl AtomicVerdict {
    pub fn new(verdict: Verdict) -> Self {
        Self(AtomicU8::new(verdict as u8))
    }

    /// 读取当前判定
    pub fn load(&self) -> Verdict {
        Verdict::from_repr(self.0.load(Ordering::Acquire))
    }

    /// 升级判定，返回升级后的值
    pub fn upgrade(&self, verdict: Verdict) -> Verdict {
        let previous = self.0.fetch_max(verdict as u8, Ordering::AcqRel);
        Verdict::from_repr(previous).max(verdict)
    }

    /// 重置为 NotSet (仅在两次运行之间由引擎调用)
    pub fn reset(&self) {
        self.0.store(Verdict::NotSet as u8, Ordering::Release);
    }
}
