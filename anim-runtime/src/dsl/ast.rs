//! 校验后的动画 AST
//!
//! 由 [`super::ast_builder::build_animation_ast`] 从元数据生成，
//! 时间已解析、样式已拆出 easing/offset、选择器已规范化。

use std::fmt;

use crate::params::AnimationParams;
use crate::style::StyleMap;
use crate::timing::Timing;

use super::metadata::AnimationOptions;
use super::transition_expr::TransitionMatcherFn;

/// 节点种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstKind {
    Sequence,
    Group,
    Animate,
    Style,
    Keyframes,
    Reference,
    AnimateChild,
    AnimateRef,
    Query,
    Stagger,
}

#[derive(Debug, Clone)]
pub enum Ast {
    Sequence(SequenceAst),
    Group(GroupAst),
    Animate(AnimateAst),
    Style(StyleAst),
    Keyframes(KeyframesAst),
    Reference(ReferenceAst),
    AnimateChild(AnimateChildAst),
    AnimateRef(AnimateRefAst),
    Query(QueryAst),
    Stagger(StaggerAst),
}

impl Ast {
    pub fn kind(&self) -> AstKind {
        match self {
            Ast::Sequence(_) => AstKind::Sequence,
            Ast::Group(_) => AstKind::Group,
            Ast::Animate(_) => AstKind::Animate,
            Ast::Style(_) => AstKind::Style,
            Ast::Keyframes(_) => AstKind::Keyframes,
            Ast::Reference(_) => AstKind::Reference,
            Ast::AnimateChild(_) => AstKind::AnimateChild,
            Ast::AnimateRef(_) => AstKind::AnimateRef,
            Ast::Query(_) => AstKind::Query,
            Ast::Stagger(_) => AstKind::Stagger,
        }
    }
}

/// 样式令牌（校验后）
#[derive(Debug, Clone, PartialEq)]
pub enum StyleEntry {
    Auto,
    Map(StyleMap),
}

#[derive(Debug, Clone)]
pub struct SequenceAst {
    pub steps: Vec<Ast>,
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone)]
pub struct GroupAst {
    pub steps: Vec<Ast>,
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone)]
pub struct StyleAst {
    pub styles: Vec<StyleEntry>,
    pub easing: Option<String>,
    pub offset: Option<f64>,
    pub contains_dynamic_styles: bool,
    /// animate() 没有目标样式时生成的空步骤
    pub is_empty_step: bool,
}

#[derive(Debug, Clone)]
pub struct KeyframesAst {
    pub styles: Vec<StyleAst>,
}

#[derive(Debug, Clone)]
pub enum AnimateStyleAst {
    Style(StyleAst),
    Keyframes(KeyframesAst),
}

/// 时间：静态或包含参数、需要在构建时解析
#[derive(Debug, Clone, PartialEq)]
pub enum TimingAst {
    Static(Timing),
    Dynamic(String),
}

#[derive(Debug, Clone)]
pub struct AnimateAst {
    pub timings: TimingAst,
    pub style: AnimateStyleAst,
}

#[derive(Debug, Clone)]
pub struct ReferenceAst {
    pub animation: Box<Ast>,
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone)]
pub struct AnimateChildAst {
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone)]
pub struct AnimateRefAst {
    pub animation: ReferenceAst,
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone)]
pub struct QueryAst {
    /// 规范化后的选择器
    pub selector: String,
    /// 用户书写的原始选择器（用于报错）
    pub original_selector: String,
    pub limit: i64,
    pub optional: bool,
    pub include_self: bool,
    pub animation: Box<Ast>,
    pub options: Option<AnimationOptions>,
}

#[derive(Debug, Clone)]
pub struct StaggerAst {
    pub timings: Timing,
    /// `"full"`：按上一轮的累计时间错开
    pub full: bool,
    pub animation: Box<Ast>,
}

#[derive(Debug, Clone)]
pub struct StateAst {
    pub name: String,
    pub style: StyleAst,
    pub default_params: AnimationParams,
}

#[derive(Clone)]
pub struct TransitionAst {
    pub matchers: Vec<TransitionMatcherFn>,
    pub animation: Ast,
    pub options: Option<AnimationOptions>,
    pub query_count: usize,
    pub dep_count: usize,
}

impl fmt::Debug for TransitionAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitionAst")
            .field("matchers", &self.matchers.len())
            .field("animation", &self.animation)
            .field("options", &self.options)
            .field("query_count", &self.query_count)
            .field("dep_count", &self.dep_count)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TriggerAst {
    pub name: String,
    pub states: Vec<StateAst>,
    pub transitions: Vec<TransitionAst>,
    pub query_count: usize,
    pub dep_count: usize,
}
