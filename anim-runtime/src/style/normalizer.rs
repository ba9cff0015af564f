//! 样式属性名与属性值的归一化

use crate::error::AnimationError;

use super::{StyleValue, dash_case_to_camel_case};

/// 样式归一化器
///
/// 在状态样式构建与关键帧归一化时调用。
pub trait StyleNormalizer {
    fn normalize_property_name(&self, property: &str, errors: &mut Vec<AnimationError>) -> String;

    fn normalize_style_value(
        &self,
        user_property: &str,
        normalized_property: &str,
        value: &StyleValue,
        errors: &mut Vec<AnimationError>,
    ) -> StyleValue;
}

/// 原样返回
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStyleNormalizer;

impl StyleNormalizer for NoopStyleNormalizer {
    fn normalize_property_name(&self, property: &str, _errors: &mut Vec<AnimationError>) -> String {
        property.to_string()
    }

    fn normalize_style_value(
        &self,
        _user_property: &str,
        _normalized_property: &str,
        value: &StyleValue,
        _errors: &mut Vec<AnimationError>,
    ) -> StyleValue {
        value.clone()
    }
}

const DIMENSIONAL_PROPS: &[&str] = &[
    "width",
    "height",
    "minWidth",
    "minHeight",
    "maxWidth",
    "maxHeight",
    "left",
    "top",
    "bottom",
    "right",
    "fontSize",
    "outlineWidth",
    "outlineOffset",
    "paddingTop",
    "paddingLeft",
    "paddingBottom",
    "paddingRight",
    "marginTop",
    "marginLeft",
    "marginBottom",
    "marginRight",
    "borderRadius",
    "borderWidth",
    "borderTopWidth",
    "borderLeftWidth",
    "borderRightWidth",
    "borderBottomWidth",
    "textIndent",
    "perspective",
];

/// 为尺寸类属性补全 `px` 单位
///
/// 数值统一转为字符串；尺寸属性的非零纯数字字符串视为缺少单位。
#[derive(Debug, Clone, Copy, Default)]
pub struct DimensionalStyleNormalizer;

impl StyleNormalizer for DimensionalStyleNormalizer {
    fn normalize_property_name(&self, property: &str, _errors: &mut Vec<AnimationError>) -> String {
        dash_case_to_camel_case(property)
    }

    fn normalize_style_value(
        &self,
        user_property: &str,
        normalized_property: &str,
        value: &StyleValue,
        errors: &mut Vec<AnimationError>,
    ) -> StyleValue {
        let text = value.to_string();
        let text = text.trim();
        let is_zero = matches!(value, StyleValue::Number(n) if *n == 0.0) || text == "0";
        let mut unit = "";

        if DIMENSIONAL_PROPS.contains(&normalized_property) && !is_zero {
            match value {
                StyleValue::Number(_) => unit = "px",
                StyleValue::Text(_) => {
                    if is_unitless_number(text) {
                        errors.push(AnimationError::MissingCssUnit {
                            property: user_property.to_string(),
                            value: text.to_string(),
                        });
                    }
                }
            }
        }

        StyleValue::Text(format!("{}{}", text, unit))
    }
}

/// `^[+-]?[\d.]+$`
fn is_unitless_number(text: &str) -> bool {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    !body.is_empty() && body.chars().all(|c| c.is_ascii_digit() || c == '.')
}
