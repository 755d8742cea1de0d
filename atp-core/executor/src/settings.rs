//! 引擎配置
//!
//! 支持从多个源加载引擎配置:
//! - 环境变量 (优先级最高)
//! - 配置文件 (TOML/JSON)
//! - 默认值 (优先级最低)
//!
//! 配置文件搜索路径 (按优先级):
//! 1. `ATP_ENGINE_CONFIG` 环境变量指定的路径
//! 2. `./engine.toml` (当前目录)
//! 3. `./config/engine.toml`
//! 4. `~/.config/atp/engine.toml` (用户配置目录)

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use atp_resource::ResourceStrategy;
use atp_results::PipelineConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::break_condition::{BreakCondition, BreakPolicy};

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 默认中断条件 (步骤和计划均为 Inherit 时使用)
    #[serde(default = "default_break_condition")]
    pub default_break_condition: BreakCondition,

    /// 默认最大执行次数 (含首次)
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// 资源生命周期策略
    #[serde(default)]
    pub resource_strategy: ResourceStrategy,

    /// 结果管道配置
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

fn default_break_condition() -> BreakCondition {
    BreakCondition::BREAK_ON_ERROR
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_break_condition: default_break_condition(),
            default_max_attempts: default_max_attempts(),
            resource_strategy: ResourceStrategy::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl EngineSettings {
    /// 从多个源加载配置 (优先级: 环境变量 > 配置文件 > 默认值)
    pub fn load() -> Result<Self> {
        let mut settings = match Self::find_config_file() {
            Some(path) => {
                debug!("加载引擎配置: {:?}", path);
                Self::load_from_file(&path)?
            }
            None => {
                debug!("未找到引擎配置文件, 使用默认值");
                Self::default()
            }
        };

        settings.apply_env_vars()?;
        settings.validate()?;
        Ok(settings)
    }

    /// 从指定文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取引擎配置文件失败: {:?}", path))?;

        let settings = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("解析 TOML 配置失败: {:?}", path))?,
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("解析 JSON 配置失败: {:?}", path))?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        Ok(settings)
    }

    /// 查找配置文件 (按优先级搜索)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("ATP_ENGINE_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        let local = [
            PathBuf::from("./engine.toml"),
            PathBuf::from("./engine.json"),
            PathBuf::from("./config/engine.toml"),
        ];
        if let Some(path) = local.iter().find(|p| p.exists()) {
            return Some(path.clone());
        }

        dirs::home_dir()
            .map(|home| home.join(".config/atp/engine.toml"))
            .filter(|p| p.exists())
    }

    /// 从环境变量覆盖配置
    fn apply_env_vars(&mut self) -> Result<()> {
        if let Ok(strategy) = env::var("ATP_RESOURCE_STRATEGY") {
            self.resource_strategy = strategy
                .parse()
                .map_err(anyhow::Error::msg)
                .context("ATP_RESOURCE_STRATEGY 取值无效")?;
        }
        if let Ok(attempts) = env::var("ATP_MAX_ATTEMPTS") {
            self.default_max_attempts = attempts
                .trim()
                .parse()
                .context("ATP_MAX_ATTEMPTS 取值无效")?;
        }
        if let Ok(capacity) = env::var("ATP_RESULT_QUEUE_CAPACITY") {
            self.pipeline.max_in_flight = capacity
                .trim()
                .parse()
                .context("ATP_RESULT_QUEUE_CAPACITY 取值无效")?;
        }
        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.default_max_attempts == 0 {
            anyhow::bail!("default_max_attempts 必须大于 0");
        }
        self.pipeline
            .validate()
            .map_err(|e| anyhow::anyhow!("pipeline: {}", e))?;
        if self
            .default_break_condition
            .contains(BreakCondition::INHERIT)
        {
            anyhow::bail!("default_break_condition 不能包含 inherit");
        }
        Ok(())
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建目录失败: {:?}", parent))?;
        }

        let content = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self).context("序列化 TOML 失败")?,
            Some("json") => serde_json::to_string_pretty(self).context("序列化 JSON 失败")?,
            _ => anyhow::bail!("不支持的配置文件格式: {:?}", path),
        };

        fs::write(path, content).with_context(|| format!("写入配置文件失败: {:?}", path))?;
        Ok(())
    }

    /// 中断策略的只读视图
    pub fn policy(&self) -> BreakPolicy {
        BreakPolicy::new(self.default_break_condition, self.default_max_attempts)
    }

    pub fn with_resource_strategy(mut self, strategy: ResourceStrategy) -> Self {
        self.resource_strategy = strategy;
        self
    }

    pub fn with_default_break_condition(mut self, condition: BreakCondition) -> Self {
        self.default_break_condition = condition;
        self
    }

    pub fn with_default_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert_eq!(settings.default_break_condition, BreakCondition::BREAK_ON_ERROR);
        assert_eq!(settings.default_max_attempts, 3);
        assert_eq!(settings.resource_strategy, ResourceStrategy::Eager);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: EngineSettings = toml::from_str(
            r#"
            resource_strategy = "lazy"

            [pipeline]
            max_in_flight = 16
            "#,
        )
        .unwrap();

        assert_eq!(settings.resource_strategy, ResourceStrategy::Lazy);
        assert_eq!(settings.pipeline.max_in_flight, 16);
        assert!(settings.pipeline.merge_results);
        assert_eq!(settings.default_max_attempts, 3);
    }

    #[test]
    fn test_validation() {
        let mut settings = EngineSettings::default();
        settings.default_break_condition = BreakCondition::INHERIT;
        assert!(settings.validate().is_err());

        let settings = EngineSettings::default().with_default_max_attempts(0);
        assert!(settings.validate().is_err());

        let mut settings = EngineSettings::default();
        settings.pipeline.max_in_flight = usize::MAX;
        assert!(settings.validate().is_err());
        settings.pipeline.max_in_flight = atp_results::MAX_IN_FLIGHT_LIMIT;
        assert!(settings.validate().is_ok());
    }
}
