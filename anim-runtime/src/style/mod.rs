//! # Style 模块
//!
//! 样式值与有序样式表，以及动画编译/播放共用的样式工具函数。
//!
//! ## 占位符
//!
//! - [`AUTO_STYLE`] (`*`)：动画结束后再从元素上计算的值（post-style）
//! - [`PRE_STYLE`] (`!`)：动画开始前从元素上计算的值（pre-style）

mod normalizer;
mod special_cased;

pub use normalizer::{DimensionalStyleNormalizer, NoopStyleNormalizer, StyleNormalizer};
pub use special_cased::{SpecialCasedStyles, SpecialCasedStylesRegistry};

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::driver::{ElementId, RenderSurface};
use crate::error::AnimationError;

/// 自动样式占位符
pub const AUTO_STYLE: &str = "*";

/// 前置样式占位符
pub const PRE_STYLE: &str = "!";

/// 关键帧偏移所使用的保留属性名
pub const OFFSET_PROP: &str = "offset";

/// 关键帧缓动所使用的保留属性名
pub const EASING_PROP: &str = "easing";

/// 样式值
///
/// 数值与字符串分开保存，字符串中可能包含 `{{param}}` 插值占位符。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StyleValue {
    Number(f64),
    Text(String),
}

impl StyleValue {
    /// `*` 占位符
    pub fn auto() -> Self {
        Self::Text(AUTO_STYLE.to_string())
    }

    /// `!` 占位符
    pub fn pre() -> Self {
        Self::Text(PRE_STYLE.to_string())
    }

    pub fn is_auto(&self) -> bool {
        matches!(self, Self::Text(s) if s == AUTO_STYLE)
    }

    pub fn is_pre(&self) -> bool {
        matches!(self, Self::Text(s) if s == PRE_STYLE)
    }

    /// 空值（`0`、空字符串）
    pub fn is_empty_value(&self) -> bool {
        match self {
            Self::Number(n) => *n == 0.0,
            Self::Text(s) => s.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl Default for StyleValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// 以 JavaScript 的习惯格式化数字：整数不带小数点
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for StyleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for StyleValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for StyleValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for StyleValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for StyleValue {
    fn from(value: i32) -> Self {
        Self::Number(value as f64)
    }
}

/// 有序样式表
///
/// 保持插入顺序；键在写入前从 dash-case 归一化为 camelCase，
/// 覆盖已有键时保留其原位置。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StyleMap {
    entries: Vec<(String, StyleValue)>,
}

impl StyleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式插入，便于构建字面量样式表
    pub fn with(mut self, prop: &str, value: impl Into<StyleValue>) -> Self {
        self.insert(prop, value);
        self
    }

    /// 插入或覆盖属性
    pub fn insert(&mut self, prop: &str, value: impl Into<StyleValue>) {
        let key = dash_case_to_camel_case(prop);
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, prop: &str) -> Option<&StyleValue> {
        let key = dash_case_to_camel_case(prop);
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, prop: &str) -> bool {
        self.get(prop).is_some()
    }

    pub fn remove(&mut self, prop: &str) -> Option<StyleValue> {
        let key = dash_case_to_camel_case(prop);
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StyleValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// 将 `other` 中的所有属性写入自身（后者覆盖前者）
    pub fn merge(&mut self, other: &StyleMap) {
        for (prop, value) in other.iter() {
            self.insert(prop, value.clone());
        }
    }

    /// 关键帧偏移
    pub fn offset(&self) -> Option<f64> {
        self.get(OFFSET_PROP).and_then(StyleValue::as_number)
    }
}

impl<K: AsRef<str>, V: Into<StyleValue>> FromIterator<(K, V)> for StyleMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = StyleMap::new();
        for (k, v) in iter {
            map.insert(k.as_ref(), v);
        }
        map
    }
}

impl IntoIterator for StyleMap {
    type Item = (String, StyleValue);
    type IntoIter = std::vec::IntoIter<(String, StyleValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Serialize for StyleMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StyleMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StyleMapVisitor;

        impl<'de> Visitor<'de> for StyleMapVisitor {
            type Value = StyleMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("样式对象 {property: value}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<StyleMap, A::Error> {
                let mut map = StyleMap::new();
                while let Some((key, value)) = access.next_entry::<String, StyleValue>()? {
                    map.insert(&key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(StyleMapVisitor)
    }
}

/// `background-color` -> `backgroundColor`
///
/// 自定义属性（`--foo`）保持原样。
pub fn dash_case_to_camel_case(input: &str) -> String {
    if input.starts_with("--") || !input.contains('-') {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '-' {
            while chars.peek() == Some(&'-') {
                chars.next();
            }
            match chars.peek() {
                Some(next) if next.is_ascii_lowercase() || next.is_ascii_digit() => {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                }
                _ => out.push('-'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// `backgroundColor` -> `background-color`
pub fn camel_case_to_dash_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower = false;
    for c in input.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('-');
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// 前一个播放器的快照能否并入新播放器的起始样式
///
/// 只有当新动画无时长或无延迟时才合并，否则延迟期间会出现错误的中间态。
pub fn allow_previous_player_styles_merge(duration: f64, delay: f64) -> bool {
    duration == 0.0 || delay == 0.0
}

/// 把样式写到元素上；空字符串表示移除
pub fn set_styles<S: RenderSurface + ?Sized>(surface: &S, element: ElementId, styles: &StyleMap) {
    for (prop, value) in styles.iter() {
        if matches!(value, StyleValue::Text(s) if s.is_empty()) {
            surface.remove_style(element, prop);
        } else {
            surface.set_style(element, prop, value);
        }
    }
}

/// 写样式，同时把尚未备份过的原值记录到 `former`
pub fn set_styles_with_backup<S: RenderSurface + ?Sized>(
    surface: &S,
    element: ElementId,
    styles: &StyleMap,
    former: &mut StyleMap,
) {
    for (prop, _) in styles.iter() {
        if !former.contains(prop) {
            let previous = surface.get_style(element, prop).unwrap_or_default();
            former.insert(prop, previous);
        }
    }
    set_styles(surface, element, styles);
}

/// 从元素上移除样式表中出现的属性
pub fn erase_styles<S: RenderSurface + ?Sized>(surface: &S, element: ElementId, styles: &StyleMap) {
    for prop in styles.keys() {
        surface.remove_style(element, prop);
    }
}

/// 将关键帧中的占位符替换为计算值，并通过归一化器规整属性名与值
///
/// 偏移相同的相邻关键帧会合并为一帧。
pub fn normalize_keyframes(
    normalizer: &dyn StyleNormalizer,
    keyframes: &[StyleMap],
    pre_styles: Option<&StyleMap>,
    post_styles: Option<&StyleMap>,
    errors: &mut Vec<AnimationError>,
) -> Vec<StyleMap> {
    let mut normalized: Vec<StyleMap> = Vec::with_capacity(keyframes.len());
    let mut previous_offset: Option<f64> = None;

    for keyframe in keyframes {
        let offset = keyframe.offset();
        let same_offset = !normalized.is_empty() && offset == previous_offset;
        let mut frame = if same_offset {
            normalized.pop().unwrap_or_default()
        } else {
            StyleMap::new()
        };

        for (prop, value) in keyframe.iter() {
            if prop == OFFSET_PROP {
                frame.insert(prop, value.clone());
                continue;
            }
            let normalized_prop = normalizer.normalize_property_name(prop, errors);
            let value = if value.is_pre() {
                pre_styles
                    .and_then(|s| s.get(prop))
                    .cloned()
                    .unwrap_or_else(|| value.clone())
            } else if value.is_auto() {
                post_styles
                    .and_then(|s| s.get(prop))
                    .cloned()
                    .unwrap_or_else(|| value.clone())
            } else {
                normalizer.normalize_style_value(prop, &normalized_prop, value, errors)
            };
            frame.insert(&normalized_prop, value);
        }

        normalized.push(frame);
        previous_offset = offset;
    }

    normalized
}
