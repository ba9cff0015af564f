//! # Timeline 模块
//!
//! 把校验后的 AST 编译成驱动可直接执行的 [`TimelineInstruction`] 列表。
//!
//! - [`build_animation_timelines`]：编译入口
//! - [`ElementInstructionMap`]：同一次编译中，子元素已生成的时间轴缓存，
//!   供父动画的 `animateChild()` 取用
//! - [`Animation`]：独立于触发器的可复用动画

mod animation;
mod builder;
mod visitor;

use std::cell::RefCell;
use std::collections::HashMap;

use serde::Serialize;

use crate::driver::ElementId;
use crate::style::StyleMap;

pub use animation::Animation;
pub use visitor::{TimelineBuildOptions, build_animation_timelines};

/// 单条时间轴指令
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineInstruction {
    pub element: ElementId,
    /// 每一帧都带有 `offset`（0 到 1）
    pub keyframes: Vec<StyleMap>,
    /// 值为 `!` 的属性，播放前需要计算起始值
    pub pre_style_props: Vec<String>,
    /// 值为 `*` 的属性，播放前需要计算目标值
    pub post_style_props: Vec<String>,
    pub duration: f64,
    pub delay: f64,
    pub total_time: f64,
    pub easing: Option<String>,
    /// 由 animateChild() 并入父动画的子时间轴
    pub sub_timeline: bool,
    /// 作为子时间轴时，把延迟折算为拉伸的首帧
    pub stretch_starting_keyframe: bool,
}

impl TimelineInstruction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        element: ElementId,
        keyframes: Vec<StyleMap>,
        pre_style_props: Vec<String>,
        post_style_props: Vec<String>,
        duration: f64,
        delay: f64,
        easing: Option<String>,
        sub_timeline: bool,
    ) -> Self {
        Self {
            element,
            keyframes,
            pre_style_props,
            post_style_props,
            duration,
            delay,
            total_time: duration + delay,
            easing,
            sub_timeline,
            stretch_starting_keyframe: false,
        }
    }
}

/// 元素 → 已编译时间轴
///
/// 只在一次 flush 内追加；被 `animateChild()` 取走的元素不再独立播放。
#[derive(Debug, Default)]
pub struct ElementInstructionMap {
    map: RefCell<HashMap<ElementId, Vec<TimelineInstruction>>>,
}

impl ElementInstructionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, element: ElementId) -> Vec<TimelineInstruction> {
        self.map.borrow().get(&element).cloned().unwrap_or_default()
    }

    pub fn append(&self, element: ElementId, instructions: &[TimelineInstruction]) {
        self.map
            .borrow_mut()
            .entry(element)
            .or_default()
            .extend_from_slice(instructions);
    }

    pub fn has(&self, element: ElementId) -> bool {
        self.map.borrow().contains_key(&element)
    }

    /// 取走元素的时间轴
    pub fn consume(&self, element: ElementId) -> Option<Vec<TimelineInstruction>> {
        self.map.borrow_mut().remove(&element)
    }

    pub fn clear(&self) {
        self.map.borrow_mut().clear();
    }
}
