//! `{{param}}` 插值

use std::collections::BTreeMap;

use crate::error::AnimationError;
use crate::style::StyleValue;

/// 动画参数表
pub type AnimationParams = BTreeMap<String, StyleValue>;

const SUBSTITUTION_START: &str = "{{";
const SUBSTITUTION_END: &str = "}}";

/// 遍历字符串中的占位符，回调参数为 (占位符起止字节区间, 参数名)
fn for_each_placeholder(text: &str, mut f: impl FnMut(std::ops::Range<usize>, &str)) {
    let mut cursor = 0;
    while let Some(open) = text[cursor..].find(SUBSTITUTION_START) {
        let start = cursor + open;
        let inner_start = start + SUBSTITUTION_START.len();
        let Some(close) = text[inner_start..].find(SUBSTITUTION_END) else {
            break;
        };
        let end = inner_start + close + SUBSTITUTION_END.len();
        f(start..end, text[inner_start..inner_start + close].trim());
        cursor = end;
    }
}

/// 字符串是否包含占位符
pub fn contains_params(value: &StyleValue) -> bool {
    match value {
        StyleValue::Text(s) => s.contains(SUBSTITUTION_START),
        StyleValue::Number(_) => false,
    }
}

/// 提取值中引用的参数名
pub fn extract_style_params(value: &StyleValue) -> Vec<String> {
    let mut names = Vec::new();
    if let StyleValue::Text(text) = value {
        for_each_placeholder(text, |_, name| names.push(name.to_string()));
    }
    names
}

/// 用参数表替换值中的占位符
///
/// 缺失的参数记录错误并替换为空字符串；没有占位符时原样返回（数字保持为数字）。
pub fn interpolate_params(
    value: &StyleValue,
    params: &AnimationParams,
    errors: &mut Vec<AnimationError>,
) -> StyleValue {
    let StyleValue::Text(text) = value else {
        return value.clone();
    };

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for_each_placeholder(text, |range, name| {
        out.push_str(&text[last..range.start]);
        match params.get(name) {
            Some(param) => out.push_str(&param.to_string()),
            None => errors.push(AnimationError::MissingParam {
                name: name.to_string(),
            }),
        }
        last = range.end;
    });

    if last == 0 {
        return value.clone();
    }
    out.push_str(&text[last..]);
    StyleValue::Text(out)
}

/// 以 `defaults` 补齐 `params` 中缺失的键
pub fn apply_param_defaults(params: &AnimationParams, defaults: &AnimationParams) -> AnimationParams {
    let mut result = params.clone();
    for (key, value) in defaults {
        result.entry(key.clone()).or_insert_with(|| value.clone());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, StyleValue)]) -> AnimationParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_interpolates_placeholders() {
        let p = params(&[("w", StyleValue::from(100)), ("unit", StyleValue::from("px"))]);
        let mut errors = vec![];
        let value = interpolate_params(&StyleValue::from("{{ w }}{{unit}}"), &p, &mut errors);
        assert_eq!(value, StyleValue::from("100px"));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_missing_param_records_error() {
        let mut errors = vec![];
        let value = interpolate_params(
            &StyleValue::from("{{ color }} solid"),
            &AnimationParams::new(),
            &mut errors,
        );
        assert_eq!(value, StyleValue::from(" solid"));
        assert_eq!(
            errors,
            vec![AnimationError::MissingParam {
                name: "color".to_string()
            }]
        );
    }

    #[test]
    fn test_values_without_placeholders_pass_through() {
        let mut errors = vec![];
        let p = AnimationParams::new();
        assert_eq!(
            interpolate_params(&StyleValue::from(3), &p, &mut errors),
            StyleValue::from(3)
        );
        assert_eq!(
            interpolate_params(&StyleValue::from("10px"), &p, &mut errors),
            StyleValue::from("10px")
        );
    }

    #[test]
    fn test_extract_and_defaults() {
        let names = extract_style_params(&StyleValue::from("{{a}} and {{ b }}"));
        assert_eq!(names, vec!["a", "b"]);

        let user = params(&[("a", StyleValue::from(1))]);
        let defaults = params(&[("a", StyleValue::from(9)), ("b", StyleValue::from(2))]);
        let merged = apply_param_defaults(&user, &defaults);
        assert_eq!(merged.get("a"), Some(&StyleValue::from(1)));
        assert_eq!(merged.get("b"), Some(&StyleValue::from(2)));
    }
}
