//! 中断条件与重试判定
//!
//! 中断条件是按判定类型 (Error/Fail/Inconclusive/Pass) 组织的标志集合。
//! 步骤自身为某类判定设置的标志优先；未设置且带 `INHERIT` 时，
//! 从最近的祖先开始查找该类判定的标志，最后回落到引擎默认值。

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use atp_common::Verdict;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 中断条件标志集合
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BreakCondition(u16);

impl BreakCondition {
    pub const NONE: Self = Self(0);
    pub const INHERIT: Self = Self(1 << 0);
    pub const BREAK_ON_ERROR: Self = Self(1 << 1);
    pub const BREAK_ON_FAIL: Self = Self(1 << 2);
    pub const BREAK_ON_INCONCLUSIVE: Self = Self(1 << 3);
    pub const BREAK_ON_PASS: Self = Self(1 << 4);
    pub const RETRY_ON_ERROR: Self = Self(1 << 5);
    pub const RETRY_ON_FAIL: Self = Self(1 << 6);
    pub const RETRY_ON_INCONCLUSIVE: Self = Self(1 << 7);

    const NAMED: [(Self, &'static str); 8] = [
        (Self::INHERIT, "inherit"),
        (Self::BREAK_ON_ERROR, "break_on_error"),
        (Self::BREAK_ON_FAIL, "break_on_fail"),
        (Self::BREAK_ON_INCONCLUSIVE, "break_on_inconclusive"),
        (Self::BREAK_ON_PASS, "break_on_pass"),
        (Self::RETRY_ON_ERROR, "retry_on_error"),
        (Self::RETRY_ON_FAIL, "retry_on_fail"),
        (Self::RETRY_ON_INCONCLUSIVE, "retry_on_inconclusive"),
    ];

    pub const fn bits(&self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// 某类判定相关的全部标志
    fn kind_mask(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Error => Self::BREAK_ON_ERROR.union(Self::RETRY_ON_ERROR),
            Verdict::Fail => Self::BREAK_ON_FAIL.union(Self::RETRY_ON_FAIL),
            Verdict::Inconclusive => Self::BREAK_ON_INCONCLUSIVE.union(Self::RETRY_ON_INCONCLUSIVE),
            Verdict::Pass => Self::BREAK_ON_PASS,
            Verdict::NotSet | Verdict::Aborted => Self::NONE,
        }
    }

    /// 标志名称列表
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::NAMED
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(flag, _)| *flag)
    }

    /// 解析某步骤的有效中断条件
    ///
    /// `ancestors` 按从近到远排列，最后一项通常是计划级条件。
    pub fn resolve(self, ancestors: &[BreakCondition], default: BreakCondition) -> BreakCondition {
        [Verdict::Error, Verdict::Fail, Verdict::Inconclusive, Verdict::Pass]
            .into_iter()
            .fold(Self::NONE, |acc, verdict| {
                acc.union(self.resolve_kind(Self::kind_mask(verdict), ancestors, default))
            })
    }

    fn resolve_kind(
        self,
        mask: BreakCondition,
        ancestors: &[BreakCondition],
        default: BreakCondition,
    ) -> BreakCondition {
        let own = self.intersection(mask);
        if !own.is_empty() || !self.contains(Self::INHERIT) {
            return own;
        }

        for ancestor in ancestors {
            let bits = ancestor.intersection(mask);
            if !bits.is_empty() || !ancestor.contains(Self::INHERIT) {
                return bits;
            }
        }

        default.intersection(mask)
    }

    /// 根据 (已解析的) 中断条件决定一次执行之后的动作
    pub fn decide(self, verdict: Verdict, attempt: u32, max_attempts: u32) -> StepAction {
        let (retry, stop) = match verdict {
            Verdict::NotSet => return StepAction::Continue,
            Verdict::Aborted => return StepAction::Break,
            Verdict::Pass => (Self::NONE, Self::BREAK_ON_PASS),
            Verdict::Inconclusive => (Self::RETRY_ON_INCONCLUSIVE, Self::BREAK_ON_INCONCLUSIVE),
            Verdict::Fail => (Self::RETRY_ON_FAIL, Self::BREAK_ON_FAIL),
            Verdict::Error => (Self::RETRY_ON_ERROR, Self::BREAK_ON_ERROR),
        };

        if !retry.is_empty() && self.contains(retry) {
            // 重试次数用尽后按中断处理
            if attempt < max_attempts {
                StepAction::Retry
            } else {
                StepAction::Break
            }
        } else if self.contains(stop) {
            StepAction::Break
        } else {
            StepAction::Continue
        }
    }
}

impl BitOr for BreakCondition {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for BreakCondition {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for BreakCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BreakCondition({})", self)
    }
}

impl fmt::Display for BreakCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&self.names().join("|"))
        }
    }
}

impl std::str::FromStr for BreakCondition {
    type Err = String;

    /// 解析以 `|` 或 `,` 分隔的标志名
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(&['|', ','][..])
            .map(str::trim)
            .filter(|part| !part.is_empty() && *part != "none")
            .try_fold(Self::NONE, |acc, part| {
                Self::from_name(part)
                    .map(|flag| acc | flag)
                    .ok_or_else(|| format!("未知的中断条件: {}", part))
            })
    }
}

impl Serialize for BreakCondition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.names())
    }
}

impl<'de> Deserialize<'de> for BreakCondition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        names.iter().try_fold(Self::NONE, |acc, name| {
            Self::from_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| D::Error::custom(format!("未知的中断条件: {}", name)))
        })
    }
}

/// 一次执行之后的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// 继续分发后续兄弟步骤
    Continue,
    /// 原地重新执行本步骤
    Retry,
    /// 停止分发后续兄弟步骤
    Break,
}

/// 引擎默认中断策略的只读视图
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakPolicy {
    default_condition: BreakCondition,
    default_max_attempts: u32,
}

impl BreakPolicy {
    pub fn new(default_condition: BreakCondition, default_max_attempts: u32) -> Self {
        Self {
            default_condition,
            default_max_attempts: default_max_attempts.max(1),
        }
    }

    pub fn default_condition(&self) -> BreakCondition {
        self.default_condition
    }

    /// 解析步骤的有效中断条件
    pub fn resolve(&self, own: BreakCondition, ancestors: &[BreakCondition]) -> BreakCondition {
        own.resolve(ancestors, self.default_condition)
    }

    /// 步骤的最大执行次数 (含首次)
    pub fn max_attempts(&self, step_override: Option<u32>) -> u32 {
        step_override.unwrap_or(self.default_max_attempts).max(1)
    }
}

impl Default for BreakPolicy {
    fn default() -> Self {
        Self::new(BreakCondition::BREAK_ON_ERROR, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INHERIT: BreakCondition = BreakCondition::INHERIT;

    #[test]
    fn test_inherit_falls_back_to_default() {
        let effective = INHERIT.resolve(&[INHERIT, INHERIT], BreakCondition::BREAK_ON_ERROR);
        assert_eq!(effective, BreakCondition::BREAK_ON_ERROR);
    }

    #[test]
    fn test_explicit_bits_win_per_kind() {
        // 自身只设置了 Fail 类，Error 类仍从默认值继承
        let own = INHERIT | BreakCondition::RETRY_ON_FAIL;
        let effective = own.resolve(&[], BreakCondition::BREAK_ON_ERROR | BreakCondition::BREAK_ON_FAIL);

        assert!(effective.contains(BreakCondition::RETRY_ON_FAIL));
        assert!(!effective.contains(BreakCondition::BREAK_ON_FAIL));
        assert!(effective.contains(BreakCondition::BREAK_ON_ERROR));
    }

    #[test]
    fn test_nearest_ancestor_wins() {
        let parent = INHERIT | BreakCondition::BREAK_ON_FAIL;
        let grandparent = BreakCondition::RETRY_ON_FAIL | BreakCondition::BREAK_ON_ERROR;

        let effective = INHERIT.resolve(&[parent, grandparent], BreakCondition::NONE);
        assert!(effective.contains(BreakCondition::BREAK_ON_FAIL));
        assert!(!effective.contains(BreakCondition::RETRY_ON_FAIL));
        // Error 类来自祖父
        assert!(effective.contains(BreakCondition::BREAK_ON_ERROR));
    }

    #[test]
    fn test_non_inheriting_ancestor_stops_lookup() {
        let parent = BreakCondition::BREAK_ON_FAIL;
        let effective = INHERIT.resolve(&[parent], BreakCondition::BREAK_ON_ERROR);
        assert_eq!(effective, BreakCondition::BREAK_ON_FAIL);
    }

    #[test]
    fn test_without_inherit_nothing_is_pulled() {
        let effective = BreakCondition::NONE.resolve(&[], BreakCondition::BREAK_ON_ERROR);
        assert!(effective.is_empty());
    }

    #[test]
    fn test_decide_table() {
        let cond = BreakCondition::BREAK_ON_ERROR | BreakCondition::RETRY_ON_FAIL;

        assert_eq!(cond.decide(Verdict::Pass, 1, 3), StepAction::Continue);
        assert_eq!(cond.decide(Verdict::Error, 1, 3), StepAction::Break);
        assert_eq!(cond.decide(Verdict::Fail, 1, 3), StepAction::Retry);
        assert_eq!(cond.decide(Verdict::Fail, 3, 3), StepAction::Break);
        assert_eq!(cond.decide(Verdict::Inconclusive, 1, 3), StepAction::Continue);
        assert_eq!(BreakCondition::NONE.decide(Verdict::Aborted, 1, 3), StepAction::Break);
        assert_eq!(
            BreakCondition::BREAK_ON_PASS.decide(Verdict::Pass, 1, 1),
            StepAction::Break
        );
    }

    #[test]
    fn test_parse_and_serde() {
        let cond: BreakCondition = "break_on_error | retry_on_fail".parse().unwrap();
        assert_eq!(cond, BreakCondition::BREAK_ON_ERROR | BreakCondition::RETRY_ON_FAIL);
        assert!("break_on_lunch".parse::<BreakCondition>().is_err());

        let json = serde_json::to_string(&cond).unwrap();
        assert_eq!(json, r#"["break_on_error","retry_on_fail"]"#);
        let back: BreakCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cond);
    }

    #[test]
    fn test_policy_max_attempts() {
        let policy = BreakPolicy::new(BreakCondition::BREAK_ON_ERROR, 0);
        assert_eq!(policy.max_attempts(None), 1);
        assert_eq!(policy.max_attempts(Some(5)), 5);
    }
}
