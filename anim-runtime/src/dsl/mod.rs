//! # DSL 模块
//!
//! 动画的声明式描述与校验。
//!
//! - [`metadata`]：用户编写的元数据与构造函数
//! - [`state`]：触发器状态值
//! - [`transition_expr`]：过渡表达式解析
//! - [`ast_builder`]：元数据 → 校验后的 [`Ast`]

mod ast;
mod ast_builder;
mod metadata;
mod state;
mod transition_expr;

pub use ast::*;
pub use ast_builder::{build_animation_ast, build_trigger_ast, normalize_selector};
pub use metadata::*;
pub use state::{ANY_STATE, StateValue, TriggerValue, VOID_VALUE};
pub use transition_expr::{TransitionExpr, TransitionMatcherFn, matcher, parse_transition_expr};
