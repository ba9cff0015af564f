//! # Config 模块
//!
//! 引擎配置。
//!
//! ## 配置优先级
//!
//! 1. 宿主在代码中显式构造的配置（最高）
//! 2. 配置文件（JSON）
//! 3. 默认值（最低）

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `:enter` 查询使用的类名前缀
    #[serde(default = "default_enter_class_name")]
    pub enter_class_name: String,

    /// `:leave` 查询使用的类名前缀
    #[serde(default = "default_leave_class_name")]
    pub leave_class_name: String,

    /// 注册触发器时是否通过驱动校验样式属性名
    #[serde(default = "default_validate_styles")]
    pub validate_styles: bool,

    /// 全局禁用动画：所有过渡都生成零时长的 noop 播放器
    #[serde(default)]
    pub noop: bool,
}

fn default_enter_class_name() -> String {
    "ng-enter".to_string()
}

fn default_leave_class_name() -> String {
    "ng-leave".to_string()
}

fn default_validate_styles() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enter_class_name: default_enter_class_name(),
            leave_class_name: default_leave_class_name(),
            validate_styles: default_validate_styles(),
            noop: false,
        }
    }
}

impl EngineConfig {
    /// 加载配置文件
    ///
    /// 文件不存在或解析失败时返回默认配置并记录警告。
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            warn!(path = %path.display(), "配置文件不存在，使用默认配置");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match Self::from_json(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "配置文件加载成功");
                    config
                }
                Err(e) => {
                    warn!(error = %e, "配置文件解析失败，使用默认配置");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(error = %e, "配置文件读取失败，使用默认配置");
                Self::default()
            }
        }
    }

    /// 从 JSON 字符串解析
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// 保存配置到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))?;
        fs::write(path, json).map_err(|e| ConfigError::Io(e.to_string()))
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("enter_class_name", &self.enter_class_name),
            ("leave_class_name", &self.leave_class_name),
        ] {
            if value.is_empty() {
                return Err(ConfigError::ValidationFailed(format!("{} 不能为空", field)));
            }
            if value.chars().any(char::is_whitespace) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} 不能包含空白字符: '{}'",
                    field, value
                )));
            }
        }
        if self.enter_class_name == self.leave_class_name {
            return Err(ConfigError::ValidationFailed(
                "enter_class_name 与 leave_class_name 不能相同".to_string(),
            ));
        }
        Ok(())
    }
}

/// 配置错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// 解析失败
    #[error("配置解析失败: {0}")]
    ParseFailed(String),
    /// 序列化失败
    #[error("配置序列化失败: {0}")]
    SerializationFailed(String),
    /// IO 错误
    #[error("配置 IO 错误: {0}")]
    Io(String),
    /// 验证失败
    #[error("配置验证失败: {0}")]
    ValidationFailed(String),
}
