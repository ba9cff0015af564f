//! # Timing 模块
//!
//! 时间表达式解析。
//!
//! ## 语法
//!
//! ```text
//! <duration>(ms|s) [<delay>(ms|s)] [<easing>]
//! ```
//!
//! 例如 `"1s"`、`"300ms 100ms"`、`"0.5s 0s ease-in-out"`、
//! `"1s cubic-bezier(0.1, 0.7, 1.0, 0.1)"`。
//! 解析失败不会中断流程：记录一条错误并返回零时长。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AnimationError;

/// 时间值：数字（毫秒）或表达式字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimingValue {
    Millis(f64),
    Expr(String),
}

impl TimingValue {
    /// 是否包含 `{{param}}` 插值（需要在构建时才能解析）
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::Millis(_) => false,
            Self::Expr(s) => s
                .split_whitespace()
                .any(|token| token.starts_with("{{")),
        }
    }
}

impl fmt::Display for TimingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{}", ms),
            Self::Expr(s) => f.write_str(s),
        }
    }
}

impl From<f64> for TimingValue {
    fn from(value: f64) -> Self {
        Self::Millis(value)
    }
}

impl From<i32> for TimingValue {
    fn from(value: i32) -> Self {
        Self::Millis(value as f64)
    }
}

impl From<&str> for TimingValue {
    fn from(value: &str) -> Self {
        Self::Expr(value.to_string())
    }
}

impl From<String> for TimingValue {
    fn from(value: String) -> Self {
        Self::Expr(value)
    }
}

/// 解析后的时间
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Timing {
    pub duration: f64,
    pub delay: f64,
    pub easing: Option<String>,
}

impl Timing {
    pub fn new(duration: f64, delay: f64, easing: Option<&str>) -> Self {
        Self {
            duration,
            delay,
            easing: easing.map(str::to_string),
        }
    }
}

/// 解析结果：时间与本次解析产生的错误
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimingParse {
    pub timing: Timing,
    pub errors: Vec<AnimationError>,
}

/// 解析时间表达式
///
/// 数字直接作为时长；字符串按语法解析，失败时返回零时长并附带错误。
/// 负值不在此处检查，见 [`resolve_timing`]。
pub fn parse_timing_expression(value: &TimingValue) -> TimingParse {
    let mut errors = Vec::new();
    let timing = parse_timing(value, &mut errors, false);
    TimingParse { timing, errors }
}

/// 解析并校验时间
///
/// `allow_negative` 仅用于 stagger（允许反向延迟）。
pub fn resolve_timing(
    value: &TimingValue,
    errors: &mut Vec<AnimationError>,
    allow_negative: bool,
) -> Timing {
    let start = errors.len();
    let timing = parse_timing(value, errors, allow_negative);
    if errors.len() > start || allow_negative {
        return timing;
    }

    let mut negative = Vec::new();
    if timing.duration < 0.0 {
        negative.push(AnimationError::NegativeStep);
    }
    if timing.delay < 0.0 {
        negative.push(AnimationError::NegativeDelay);
    }
    if !negative.is_empty() {
        errors.push(AnimationError::InvalidTiming {
            value: value.to_string(),
        });
        errors.extend(negative);
    }
    timing
}

fn parse_timing(
    value: &TimingValue,
    errors: &mut Vec<AnimationError>,
    allow_negative: bool,
) -> Timing {
    match value {
        TimingValue::Millis(ms) => Timing::new(*ms, 0.0, None),
        TimingValue::Expr(expr) => match parse_timing_str(expr, allow_negative) {
            Some(timing) => timing,
            None => {
                errors.push(AnimationError::InvalidTiming {
                    value: expr.clone(),
                });
                Timing::default()
            }
        },
    }
}

fn parse_timing_str(input: &str, allow_negative: bool) -> Option<Timing> {
    let (duration, rest) = parse_time_token(input, allow_negative)?;
    let mut timing = Timing::new(duration, 0.0, None);
    if rest.is_empty() {
        return Some(timing);
    }

    let rest = after_whitespace(rest)?;
    let rest = match parse_time_token(rest, allow_negative) {
        Some((delay, tail)) => {
            timing.delay = delay;
            if tail.is_empty() {
                return Some(timing);
            }
            after_whitespace(tail)?
        }
        None => rest,
    };

    timing.easing = Some(parse_easing(rest)?.to_string());
    Some(timing)
}

/// 跳过至少一个空白字符，且之后必须还有内容
fn after_whitespace(input: &str) -> Option<&str> {
    let trimmed = input.trim_start();
    if trimmed.len() == input.len() || trimmed.is_empty() {
        return None;
    }
    Some(trimmed)
}

/// `[\.\d]+(m?s)`，返回毫秒值（向下取整）与剩余输入
fn parse_time_token(input: &str, allow_negative: bool) -> Option<(f64, &str)> {
    let (sign, body) = match input.strip_prefix('-') {
        Some(body) if allow_negative => (-1.0, body),
        _ => (1.0, input),
    };

    let digits_len = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(body.len());
    if digits_len == 0 {
        return None;
    }
    let number = parse_float_prefix(&body[..digits_len])?;
    let tail = &body[digits_len..];

    let (multiplier, tail) = if let Some(tail) = tail.strip_prefix("ms") {
        (1.0, tail)
    } else if let Some(tail) = tail.strip_prefix('s') {
        (1000.0, tail)
    } else {
        return None;
    };

    Some(((sign * number * multiplier).floor(), tail))
}

/// 与 `parseFloat` 一致：只取第一个合法的数字前缀（`1.2.3` -> `1.2`）
pub(crate) fn parse_float_prefix(digits: &str) -> Option<f64> {
    let end = digits
        .char_indices()
        .filter(|(_, c)| *c == '.')
        .nth(1)
        .map(|(i, _)| i)
        .unwrap_or(digits.len());
    digits[..end].parse::<f64>().ok()
}

/// `[-a-z]+(\(.+?\))?$`
fn parse_easing(input: &str) -> Option<&str> {
    let name_len = input
        .find(|c: char| !(c.is_ascii_lowercase() || c == '-'))
        .unwrap_or(input.len());
    if name_len == 0 {
        return None;
    }
    let args = &input[name_len..];
    if args.is_empty() || (args.len() >= 3 && args.starts_with('(') && args.ends_with(')')) {
        Some(input)
    } else {
        None
    }
}

/// 宽松地解析单个时间值（用于 `delay`/`duration` 选项）
///
/// 只识别开头的 `-?[\.\d]+(m?s)`，其余情况视为 0。
pub fn resolve_timing_value(value: &TimingValue) -> f64 {
    match value {
        TimingValue::Millis(ms) => *ms,
        TimingValue::Expr(expr) => parse_time_token(expr, true)
            .map(|(ms, _)| ms)
            .unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> TimingParse {
        parse_timing_expression(&TimingValue::from(s))
    }

    #[test]
    fn test_units() {
        assert_eq!(parse("300ms").timing, Timing::new(300.0, 0.0, None));
        assert_eq!(parse("1s").timing, Timing::new(1000.0, 0.0, None));
        assert_eq!(parse("1.5s").timing, Timing::new(1500.0, 0.0, None));
        assert_eq!(parse(".5s").timing.duration, 500.0);
    }

    #[test]
    fn test_duration_delay_easing() {
        let parsed = parse("1s 200ms ease-in");
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.timing, Timing::new(1000.0, 200.0, Some("ease-in")));

        let parsed = parse("500ms ease-out");
        assert_eq!(parsed.timing, Timing::new(500.0, 0.0, Some("ease-out")));

        let parsed = parse("1s 0s cubic-bezier(0.1, 0.7, 1.0, 0.1)");
        assert!(parsed.errors.is_empty());
        assert_eq!(
            parsed.timing.easing.as_deref(),
            Some("cubic-bezier(0.1, 0.7, 1.0, 0.1)")
        );
    }

    #[test]
    fn test_floors_values() {
        assert_eq!(parse("1.2345s").timing.duration, 1234.0);
        assert_eq!(parse("10.9ms").timing.duration, 10.0);
    }

    #[test]
    fn test_invalid_strings_yield_zero_and_error() {
        for bad in ["", "1", "abc", "1sec", "1s ", "-1s", "1s 2", "1s ease-in(", "1s EASE"] {
            let parsed = parse(bad);
            assert_eq!(parsed.timing.duration, 0.0, "input: {bad:?}");
            assert_eq!(parsed.errors.len(), 1, "input: {bad:?}");
        }
    }

    #[test]
    fn test_numeric_input() {
        let parsed = parse_timing_expression(&TimingValue::Millis(250.0));
        assert_eq!(parsed.timing, Timing::new(250.0, 0.0, None));
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_negative_values_are_validated_by_caller() {
        let mut errors = vec![];
        resolve_timing(&TimingValue::Millis(-10.0), &mut errors, false);
        assert_eq!(
            errors,
            vec![
                AnimationError::InvalidTiming {
                    value: "-10".to_string()
                },
                AnimationError::NegativeStep
            ]
        );

        let mut errors = vec![];
        let timing = resolve_timing(&TimingValue::from("-100ms"), &mut errors, true);
        assert!(errors.is_empty());
        assert_eq!(timing.duration, -100.0);
    }

    #[test]
    fn test_dynamic_detection() {
        assert!(TimingValue::from("{{ time }} ease").is_dynamic());
        assert!(!TimingValue::from("1s").is_dynamic());
    }

    #[test]
    fn test_resolve_timing_value() {
        assert_eq!(resolve_timing_value(&TimingValue::from("2s")), 2000.0);
        assert_eq!(resolve_timing_value(&TimingValue::from("-50ms")), -50.0);
        assert_eq!(resolve_timing_value(&TimingValue::from("soon")), 0.0);
        assert_eq!(resolve_timing_value(&TimingValue::Millis(12.0)), 12.0);
    }
}
