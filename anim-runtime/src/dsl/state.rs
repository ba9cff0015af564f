//! 触发器状态值

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::params::AnimationParams;
use crate::style::format_number;
use crate::timing::parse_float_prefix;

/// 元素不存在时的状态
pub const VOID_VALUE: &str = "void";

/// 通配状态
pub const ANY_STATE: &str = "*";

/// 触发器绑定表达式的值
///
/// 布尔值单独保留，以便与 `true`/`1`、`false`/`0` 状态名互相匹配。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Text(String),
}

impl StateValue {
    pub fn void() -> Self {
        Self::Text(VOID_VALUE.to_string())
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Text(s) if s == VOID_VALUE)
    }

    /// 查找状态样式时使用的键
    pub fn as_key(&self) -> String {
        self.to_string()
    }

    /// 按 `parseFloat` 规则转为数字，失败为 NaN
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Bool(_) => f64::NAN,
            Self::Text(s) => {
                let s = s.trim_start();
                let (sign, body) = match s.strip_prefix('-') {
                    Some(rest) => (-1.0, rest),
                    None => (1.0, s.strip_prefix('+').unwrap_or(s)),
                };
                let len = body
                    .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                    .unwrap_or(body.len());
                parse_float_prefix(&body[..len])
                    .map(|n| sign * n)
                    .unwrap_or(f64::NAN)
            }
        }
    }
}

impl Default for StateValue {
    fn default() -> Self {
        Self::void()
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        Self::Text(format_number(value))
    }
}

/// 写入触发器属性的值，可附带参数
///
/// 未显式给出参数时，引擎会沿用上一个值的参数。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerValue {
    pub value: StateValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<AnimationParams>,
}

impl TriggerValue {
    pub fn new(value: impl Into<StateValue>) -> Self {
        Self {
            value: value.into(),
            params: None,
        }
    }

    pub fn with_params(value: impl Into<StateValue>, params: AnimationParams) -> Self {
        Self {
            value: value.into(),
            params: Some(params),
        }
    }

    pub fn void() -> Self {
        Self::new(StateValue::void())
    }
}

impl From<StateValue> for TriggerValue {
    fn from(value: StateValue) -> Self {
        Self::new(value)
    }
}

impl From<&str> for TriggerValue {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TriggerValue {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<bool> for TriggerValue {
    fn from(value: bool) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(StateValue::from(true).as_key(), "true");
        assert_eq!(StateValue::from(3_i64).as_key(), "3");
        assert_eq!(StateValue::from(2.0).as_key(), "2");
        assert!(StateValue::default().is_void());
    }

    #[test]
    fn test_as_number() {
        assert_eq!(StateValue::from("12px").as_number(), 12.0);
        assert_eq!(StateValue::from("-1.5").as_number(), -1.5);
        assert!(StateValue::from("abc").as_number().is_nan());
        assert!(StateValue::from(true).as_number().is_nan());
    }
}
