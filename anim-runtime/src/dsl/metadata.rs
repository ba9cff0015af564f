//! 声明式动画元数据
//!
//! 既可以用构造函数（[`trigger`]、[`state`]、[`transition`]、[`animate`]……）
//! 在代码里编写，也可以从 JSON 反序列化：
//!
//! ```json
//! {
//!   "name": "openClose",
//!   "definitions": [
//!     { "type": "state", "name": "open", "styles": { "type": "style", "styles": { "height": "200px" } } },
//!     { "type": "transition", "expr": "open <=> closed", "animation": { "type": "animate", "timings": "1s" } }
//!   ]
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};

use crate::params::AnimationParams;
use crate::style::{AUTO_STYLE, StyleMap};
use crate::timing::TimingValue;

use super::transition_expr::TransitionExpr;

/// 通用动画选项
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<TimingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<TimingValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<AnimationParams>,
}

impl AnimationOptions {
    pub fn with_params(params: AnimationParams) -> Self {
        Self {
            params: Some(params),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: impl Into<TimingValue>) -> Self {
        self.delay = Some(delay.into());
        self
    }

    pub fn with_duration(mut self, duration: impl Into<TimingValue>) -> Self {
        self.duration = Some(duration.into());
        self
    }
}

/// query() 选项
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(flatten)]
    pub base: AnimationOptions,
    /// 没有匹配时不报错
    #[serde(default)]
    pub optional: bool,
    /// 正数取前 N 个，负数取后 N 个，0 不限制
    #[serde(default)]
    pub limit: i64,
}

/// 样式令牌：`*` 或样式表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStyleToken", into = "RawStyleToken")]
pub enum StyleToken {
    Auto,
    Map(StyleMap),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawStyleToken {
    Text(String),
    Map(StyleMap),
}

impl TryFrom<RawStyleToken> for StyleToken {
    type Error = String;

    fn try_from(raw: RawStyleToken) -> Result<Self, Self::Error> {
        match raw {
            RawStyleToken::Text(text) if text == AUTO_STYLE => Ok(Self::Auto),
            RawStyleToken::Text(text) => Err(format!("无效的样式值 '{}'，只允许 \"*\" 或样式对象", text)),
            RawStyleToken::Map(map) => Ok(Self::Map(map)),
        }
    }
}

impl From<StyleToken> for RawStyleToken {
    fn from(token: StyleToken) -> Self {
        match token {
            StyleToken::Auto => RawStyleToken::Text(AUTO_STYLE.to_string()),
            StyleToken::Map(map) => RawStyleToken::Map(map),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

/// 数组形式的动画步骤视为 sequence
fn animation_entry<'de, D>(deserializer: D) -> Result<Box<AnimationMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Box::new(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(steps) => sequence(steps),
        OneOrMany::One(step) => step,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleMetadata {
    #[serde(deserialize_with = "one_or_many")]
    pub styles: Vec<StyleToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframesMetadata {
    pub steps: Vec<StyleMetadata>,
}

/// animate() 的目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnimateTarget {
    Style(StyleMetadata),
    Keyframes(KeyframesMetadata),
}

impl From<StyleMetadata> for AnimateTarget {
    fn from(style: StyleMetadata) -> Self {
        Self::Style(style)
    }
}

impl From<KeyframesMetadata> for AnimateTarget {
    fn from(keyframes: KeyframesMetadata) -> Self {
        Self::Keyframes(keyframes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimateMetadata {
    pub timings: TimingValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<AnimateTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetadata {
    pub steps: Vec<AnimationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub steps: Vec<AnimationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

/// 可复用动画，见 [`animation`] 与 [`use_animation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceMetadata {
    #[serde(deserialize_with = "animation_entry")]
    pub animation: Box<AnimationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnimateChildMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimateRefMetadata {
    pub animation: ReferenceMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    pub selector: String,
    #[serde(deserialize_with = "animation_entry")]
    pub animation: Box<AnimationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<QueryOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaggerMetadata {
    pub timings: TimingValue,
    #[serde(deserialize_with = "animation_entry")]
    pub animation: Box<AnimationMetadata>,
}

/// 动画步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnimationMetadata {
    Sequence(SequenceMetadata),
    Group(GroupMetadata),
    Animate(AnimateMetadata),
    Keyframes(KeyframesMetadata),
    Style(StyleMetadata),
    Reference(ReferenceMetadata),
    AnimateChild(AnimateChildMetadata),
    AnimateRef(AnimateRefMetadata),
    Query(QueryMetadata),
    Stagger(StaggerMetadata),
}

impl From<StyleMetadata> for AnimationMetadata {
    fn from(style: StyleMetadata) -> Self {
        Self::Style(style)
    }
}

impl From<KeyframesMetadata> for AnimationMetadata {
    fn from(keyframes: KeyframesMetadata) -> Self {
        Self::Keyframes(keyframes)
    }
}

impl From<ReferenceMetadata> for AnimationMetadata {
    fn from(reference: ReferenceMetadata) -> Self {
        Self::Reference(reference)
    }
}

impl From<Vec<AnimationMetadata>> for AnimationMetadata {
    fn from(steps: Vec<AnimationMetadata>) -> Self {
        sequence(steps)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    /// 逗号分隔可同时声明多个状态
    pub name: String,
    pub styles: StyleMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionMetadata {
    pub expr: TransitionExpr,
    #[serde(deserialize_with = "animation_entry")]
    pub animation: Box<AnimationMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TriggerDefinition {
    State(StateMetadata),
    Transition(TransitionMetadata),
}

/// 触发器定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMetadata {
    pub name: String,
    pub definitions: Vec<TriggerDefinition>,
}

pub fn trigger(name: &str, definitions: Vec<TriggerDefinition>) -> TriggerMetadata {
    TriggerMetadata {
        name: name.to_string(),
        definitions,
    }
}

pub fn state(name: &str, styles: StyleMetadata) -> TriggerDefinition {
    TriggerDefinition::State(StateMetadata {
        name: name.to_string(),
        styles,
        options: None,
    })
}

/// 带默认参数的状态
pub fn state_with_params(name: &str, styles: StyleMetadata, params: AnimationParams) -> TriggerDefinition {
    TriggerDefinition::State(StateMetadata {
        name: name.to_string(),
        styles,
        options: Some(AnimationOptions::with_params(params)),
    })
}

pub fn transition(expr: impl Into<TransitionExpr>, animation: impl Into<AnimationMetadata>) -> TriggerDefinition {
    transition_with(expr, animation, None)
}

pub fn transition_with(
    expr: impl Into<TransitionExpr>,
    animation: impl Into<AnimationMetadata>,
    options: Option<AnimationOptions>,
) -> TriggerDefinition {
    TriggerDefinition::Transition(TransitionMetadata {
        expr: expr.into(),
        animation: Box::new(animation.into()),
        options,
    })
}

pub fn sequence(steps: Vec<AnimationMetadata>) -> AnimationMetadata {
    AnimationMetadata::Sequence(SequenceMetadata {
        steps,
        options: None,
    })
}

pub fn sequence_with(steps: Vec<AnimationMetadata>, options: AnimationOptions) -> AnimationMetadata {
    AnimationMetadata::Sequence(SequenceMetadata {
        steps,
        options: Some(options),
    })
}

pub fn group(steps: Vec<AnimationMetadata>) -> AnimationMetadata {
    AnimationMetadata::Group(GroupMetadata {
        steps,
        options: None,
    })
}

pub fn group_with(steps: Vec<AnimationMetadata>, options: AnimationOptions) -> AnimationMetadata {
    AnimationMetadata::Group(GroupMetadata {
        steps,
        options: Some(options),
    })
}

pub fn animate(timings: impl Into<TimingValue>, target: impl Into<AnimateTarget>) -> AnimationMetadata {
    AnimationMetadata::Animate(AnimateMetadata {
        timings: timings.into(),
        styles: Some(target.into()),
    })
}

/// 只有时间、没有目标样式的 animate()，动画到目标状态的样式
pub fn animate_timing(timings: impl Into<TimingValue>) -> AnimationMetadata {
    AnimationMetadata::Animate(AnimateMetadata {
        timings: timings.into(),
        styles: None,
    })
}

pub fn keyframes(steps: Vec<StyleMetadata>) -> KeyframesMetadata {
    KeyframesMetadata { steps }
}

pub fn style(styles: StyleMap) -> StyleMetadata {
    StyleMetadata {
        styles: vec![StyleToken::Map(styles)],
        offset: None,
    }
}

/// `style('*')`
pub fn style_auto() -> StyleMetadata {
    StyleMetadata {
        styles: vec![StyleToken::Auto],
        offset: None,
    }
}

pub fn style_tokens(styles: Vec<StyleToken>) -> StyleMetadata {
    StyleMetadata {
        styles,
        offset: None,
    }
}

pub fn query(selector: &str, animation: impl Into<AnimationMetadata>) -> AnimationMetadata {
    AnimationMetadata::Query(QueryMetadata {
        selector: selector.to_string(),
        animation: Box::new(animation.into()),
        options: None,
    })
}

pub fn query_with(
    selector: &str,
    animation: impl Into<AnimationMetadata>,
    options: QueryOptions,
) -> AnimationMetadata {
    AnimationMetadata::Query(QueryMetadata {
        selector: selector.to_string(),
        animation: Box::new(animation.into()),
        options: Some(options),
    })
}

pub fn stagger(timings: impl Into<TimingValue>, animation: impl Into<AnimationMetadata>) -> AnimationMetadata {
    AnimationMetadata::Stagger(StaggerMetadata {
        timings: timings.into(),
        animation: Box::new(animation.into()),
    })
}

/// 声明一个可复用动画
pub fn animation(steps: impl Into<AnimationMetadata>, options: Option<AnimationOptions>) -> ReferenceMetadata {
    ReferenceMetadata {
        animation: Box::new(steps.into()),
        options,
    }
}

/// 使用可复用动画
pub fn use_animation(reference: ReferenceMetadata, options: Option<AnimationOptions>) -> AnimationMetadata {
    AnimationMetadata::AnimateRef(AnimateRefMetadata {
        animation: reference,
        options,
    })
}

pub fn animate_child() -> AnimationMetadata {
    AnimationMetadata::AnimateChild(AnimateChildMetadata::default())
}

pub fn animate_child_with(options: AnimationOptions) -> AnimationMetadata {
    AnimationMetadata::AnimateChild(AnimateChildMetadata {
        options: Some(options),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_from_json() {
        let json = r#"{
            "name": "fade",
            "definitions": [
                { "type": "state", "name": "in", "styles": { "type": "style", "styles": { "opacity": 1 } } },
                { "type": "state", "name": "out", "styles": { "type": "style", "styles": ["*", { "opacity": 0 }] } },
                { "type": "transition", "expr": "in <=> out", "animation": [
                    { "type": "style", "styles": { "color": "red" } },
                    { "type": "animate", "timings": "1s ease-in", "styles": { "type": "keyframes", "steps": [
                        { "styles": { "opacity": 0 }, "offset": 0 },
                        { "styles": { "opacity": 1 }, "offset": 1 }
                    ] } }
                ] }
            ]
        }"#;

        let meta: TriggerMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.name, "fade");
        assert_eq!(meta.definitions.len(), 3);

        let TriggerDefinition::State(out) = &meta.definitions[1] else {
            panic!("expected state");
        };
        assert_eq!(out.styles.styles[0], StyleToken::Auto);

        let TriggerDefinition::Transition(t) = &meta.definitions[2] else {
            panic!("expected transition");
        };
        let AnimationMetadata::Sequence(seq) = t.animation.as_ref() else {
            panic!("array should become a sequence");
        };
        assert_eq!(seq.steps.len(), 2);
    }

    #[test]
    fn test_invalid_style_token_rejected() {
        let json = r#"{ "styles": "red" }"#;
        assert!(serde_json::from_str::<StyleMetadata>(json).is_err());
    }

    #[test]
    fn test_query_options_flatten() {
        let json = r#"{ "optional": true, "limit": -2, "delay": "100ms" }"#;
        let options: QueryOptions = serde_json::from_str(json).unwrap();
        assert!(options.optional);
        assert_eq!(options.limit, -2);
        assert_eq!(options.base.delay, Some(TimingValue::from("100ms")));
    }
}
