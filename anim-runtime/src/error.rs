//! # Error 模块
//!
//! 定义 anim-runtime 中使用的错误类型。
//!
//! - [`AnimationError`]：编译期问题（时间表达式、过渡表达式、关键帧等），
//!   累积到调用方提供的列表中，不会中断整个编译流程
//! - [`EngineError`]：引擎边界上的前置条件违背，通过 `Result` 返回

use std::fmt;

use thiserror::Error;

/// 动画编译错误
///
/// 解析/编译阶段发现的问题都以此类型累积，随后替换为安全的默认值继续编译。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnimationError {
    /// 无效的时间表达式
    #[error("无效的时间值 '{value}'：格式应为 \"<duration>(ms|s) [<delay>(ms|s)] [<easing>]\"")]
    InvalidTiming { value: String },

    /// 动画时长为负数
    #[error("动画时长不能为负数")]
    NegativeStep,

    /// 动画延迟为负数
    #[error("动画延迟不能为负数")]
    NegativeDelay,

    /// 无效的过渡表达式
    #[error("无效的过渡表达式 '{expr}'：格式应为 \"a => b\"、\"a <=> b\" 或 \":enter\" 等别名")]
    InvalidTransitionExpr { expr: String },

    /// 未知的过渡别名
    #[error("未知的过渡别名 '{alias}'")]
    UnknownTransitionAlias { alias: String },

    /// 触发器名称非法
    #[error("触发器名称 '{name}' 不能以 '@' 开头")]
    InvalidTriggerName { name: String },

    /// keyframes() 不在 animate() 内
    #[error("keyframes() 必须位于 animate() 之内")]
    KeyframesOutsideAnimate,

    /// 关键帧偏移越界
    #[error("关键帧偏移必须位于 0 到 1 之间")]
    KeyframeOffsetOutOfRange,

    /// 关键帧偏移乱序
    #[error("关键帧偏移必须单调不减")]
    KeyframeOffsetsOutOfOrder,

    /// 部分关键帧缺少偏移
    #[error("部分关键帧缺少偏移：要么全部提供，要么全部省略")]
    KeyframesMissingOffsets,

    /// query() 没有匹配到元素
    #[error("query(\"{selector}\") 没有匹配到任何元素（如允许为空请设置 optional）")]
    InvalidQuery { selector: String },

    /// stagger() 不在 query() 内
    #[error("stagger() 只能在 query() 内部使用")]
    StaggerOutsideQuery,

    /// 缺少参数值
    #[error("缺少参数 '{name}' 的值")]
    MissingParam { name: String },

    /// 状态样式引用了没有默认值的参数
    #[error("状态 '{state}' 的样式引用了没有默认值的参数：{}", .params.join(", "))]
    StateParamsWithoutDefaults { state: String, params: Vec<String> },

    /// 不支持的样式属性（作为警告收集）
    #[error("不支持的样式属性 '{property}'")]
    UnsupportedStyleProperty { property: String },

    /// 尺寸类属性缺少单位
    #[error("属性 '{property}' 的值 '{value}' 缺少 CSS 单位")]
    MissingCssUnit { property: String, value: String },
}

/// 一组累积的编译错误
///
/// 仅用于在 [`EngineError`] 中携带多个错误并逐行展示。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnimationErrors(pub Vec<AnimationError>);

impl AnimationErrors {
    /// 错误数量
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 遍历错误
    pub fn iter(&self) -> std::slice::Iter<'_, AnimationError> {
        self.0.iter()
    }
}

impl From<Vec<AnimationError>> for AnimationErrors {
    fn from(errors: Vec<AnimationError>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for AnimationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

/// 引擎错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// 命名空间未注册
    #[error("命名空间 '{id}' 未注册")]
    MissingNamespace { id: String },

    /// 触发器未注册
    #[error("触发器 '{name}' 未在当前命名空间注册")]
    MissingTrigger { name: String },

    /// 监听时缺少事件阶段
    #[error("监听触发器 '{name}' 时缺少事件阶段（start/done）")]
    MissingEventPhase { name: String },

    /// 不支持的事件阶段
    #[error("触发器 '{name}' 不支持事件阶段 '{phase}'，仅支持 start 与 done")]
    UnsupportedEventPhase { name: String, phase: String },

    /// 触发器构建失败
    #[error("触发器 '{name}' 构建失败:\n{errors}")]
    TriggerBuildFailed { name: String, errors: AnimationErrors },

    /// flush 过程中动画过渡失败
    #[error("动画过渡失败:\n{0}")]
    TransitionsFailed(AnimationErrors),

    /// 时间轴动画注册失败
    #[error("时间轴动画 '{id}' 注册失败:\n{errors}")]
    TimelineRegisterFailed { id: String, errors: AnimationErrors },

    /// 时间轴动画创建失败
    #[error("时间轴动画 '{id}' 创建失败:\n{errors}")]
    TimelineCreateFailed { id: String, errors: AnimationErrors },

    /// 时间轴播放器不存在
    #[error("时间轴动画 '{id}' 不存在或已销毁")]
    MissingTimelinePlayer { id: String },
}

/// Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_animation_errors_display() {
        let errors = AnimationErrors::from(vec![
            AnimationError::NegativeStep,
            AnimationError::InvalidTiming {
                value: "abc".to_string(),
            },
        ]);
        let text = errors.to_string();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("abc"));
    }

    #[test]
    fn test_state_params_message_lists_params() {
        let error = AnimationError::StateParamsWithoutDefaults {
            state: "open".to_string(),
            params: vec!["width".to_string(), "color".to_string()],
        };
        assert!(error.to_string().contains("width, color"));
    }
}
