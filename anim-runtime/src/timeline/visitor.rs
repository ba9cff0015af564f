//! AST → 时间轴
//!
//! 遍历过程中维护一个「上下文」栈：group/query/keyframes 等节点会派生子上下文，
//! 每个子上下文从父时间轴的当前时刻分叉出一条新时间轴。所有时间轴按创建顺序
//! 保存在 [`TimelineBuildState`] 中，最后过滤掉没有实际动画的部分。

use std::cell::Cell;
use std::rc::Rc;

use crate::dsl::{
    AnimateAst, AnimateChildAst, AnimateRefAst, AnimateStyleAst, AnimationOptions, Ast, GroupAst,
    KeyframesAst, QueryAst, ReferenceAst, SequenceAst, StaggerAst, StyleAst, StyleEntry, TimingAst,
};
use crate::driver::{AnimationDriver, ElementId};
use crate::error::AnimationError;
use crate::params::{AnimationParams, interpolate_params};
use crate::style::{StyleMap, StyleValue};
use crate::timing::{Timing, TimingValue, resolve_timing, resolve_timing_value};

use super::builder::{StylesLookup, SubTimelineBuilder, TimelineBuilder};
use super::{ElementInstructionMap, TimelineInstruction};

const ENTER_TOKEN: &str = ":enter";
const LEAVE_TOKEN: &str = ":leave";

/// 编译一次动画所需的外部输入
#[derive(Debug, Clone, Copy)]
pub struct TimelineBuildOptions<'a> {
    /// `:enter` 替换成的类名
    pub enter_class_name: &'a str,
    /// `:leave` 替换成的类名
    pub leave_class_name: &'a str,
    pub starting_styles: &'a StyleMap,
    pub final_styles: &'a StyleMap,
    pub params: Option<&'a AnimationParams>,
    pub delay: Option<&'a TimingValue>,
}

/// 把 AST 编译成时间轴指令
///
/// 没有任何动画时返回根元素上的一条空指令。
pub fn build_animation_timelines(
    driver: &dyn AnimationDriver,
    root_element: ElementId,
    ast: &Ast,
    options: TimelineBuildOptions<'_>,
    sub_instructions: Option<&ElementInstructionMap>,
    errors: &mut Vec<AnimationError>,
) -> Vec<TimelineInstruction> {
    let fallback = ElementInstructionMap::new();
    let sub_instructions = sub_instructions.unwrap_or(&fallback);
    let mut state = TimelineBuildState {
        driver,
        sub_instructions,
        enter_class_name: options.enter_class_name,
        leave_class_name: options.leave_class_name,
        errors,
        builders: Vec::new(),
        slots: Vec::new(),
        lookup: StylesLookup::new(),
    };

    let delay = options.delay.map(resolve_timing_value).unwrap_or(0.0);
    let mut context = state.root_context(root_element);
    context.options = ContextOptions {
        params: options.params.cloned(),
        delay: Some(delay),
        duration: None,
    };

    let root = context.timeline;
    state.builders[root].delay_next_step(delay);
    state.builders[root].set_styles(
        &[StyleEntry::Map(options.starting_styles.clone())],
        None,
        state.errors,
        context.options.params.as_ref(),
    );

    state.visit(ast, &mut context);

    let live: Vec<usize> = (0..state.slots.len())
        .filter(|&i| state.slot_contains_animation(i))
        .collect();

    // 目标状态样式只写到最后一条属于根元素的时间轴上
    if !live.is_empty() && !options.final_styles.is_empty() {
        let last_root = live
            .iter()
            .rev()
            .find(|&&i| state.slot_element(i) == root_element)
            .copied();
        if let Some(Slot::Builder(index)) = last_root.map(|i| &state.slots[i])
            && !state.builders[*index].allow_only_timeline_styles()
        {
            let index = *index;
            state.builders[index].set_styles(
                &[StyleEntry::Map(options.final_styles.clone())],
                None,
                state.errors,
                context.options.params.as_ref(),
            );
        }
    }

    if live.is_empty() {
        return vec![TimelineInstruction::new(
            root_element,
            Vec::new(),
            Vec::new(),
            Vec::new(),
            0.0,
            delay,
            None,
            false,
        )];
    }

    live.into_iter().map(|i| state.build_slot(i)).collect()
}

#[derive(Debug)]
enum Slot {
    Builder(usize),
    Sub(SubTimelineBuilder),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviousNode {
    Noop,
    Style,
    Other,
}

#[derive(Debug, Clone, Default)]
struct ContextOptions {
    duration: Option<f64>,
    delay: Option<f64>,
    params: Option<AnimationParams>,
}

#[derive(Debug, Clone)]
struct ParentLink {
    stagger_time: Rc<Cell<f64>>,
    timeline: usize,
}

#[derive(Debug)]
struct TimelineContext {
    element: ElementId,
    timeline: usize,
    current_animate_timings: Option<Timing>,
    previous_node: PreviousNode,
    sub_context_count: usize,
    options: ContextOptions,
    query_index: usize,
    query_total: usize,
    stagger_time: Rc<Cell<f64>>,
    parent: Option<ParentLink>,
}

struct TimelineBuildState<'a> {
    driver: &'a dyn AnimationDriver,
    sub_instructions: &'a ElementInstructionMap,
    enter_class_name: &'a str,
    leave_class_name: &'a str,
    errors: &'a mut Vec<AnimationError>,
    builders: Vec<TimelineBuilder>,
    /// 按创建顺序排列的全部时间轴
    slots: Vec<Slot>,
    lookup: StylesLookup,
}

impl TimelineBuildState<'_> {
    fn root_context(&mut self, element: ElementId) -> TimelineContext {
        let timeline = self.push_builder(element, 0.0);
        TimelineContext {
            element,
            timeline,
            current_animate_timings: None,
            previous_node: PreviousNode::Noop,
            sub_context_count: 0,
            options: ContextOptions::default(),
            query_index: 0,
            query_total: 0,
            stagger_time: Rc::new(Cell::new(0.0)),
            parent: None,
        }
    }

    fn push_builder(&mut self, element: ElementId, start_time: f64) -> usize {
        let builder = TimelineBuilder::new(element, start_time, &mut self.lookup);
        self.builders.push(builder);
        let index = self.builders.len() - 1;
        self.slots.push(Slot::Builder(index));
        index
    }

    fn slot_contains_animation(&self, slot: usize) -> bool {
        match &self.slots[slot] {
            Slot::Builder(index) => self.builders[*index].contains_animation(),
            Slot::Sub(sub) => sub.contains_animation(),
        }
    }

    fn slot_element(&self, slot: usize) -> ElementId {
        match &self.slots[slot] {
            Slot::Builder(index) => self.builders[*index].element,
            Slot::Sub(sub) => sub.element,
        }
    }

    fn build_slot(&mut self, slot: usize) -> TimelineInstruction {
        match &self.slots[slot] {
            Slot::Builder(index) => {
                let index = *index;
                self.builders[index].build_keyframes()
            }
            Slot::Sub(sub) => sub.build_keyframes(),
        }
    }

    /// 从 `from` 的当前时刻（或 `new_time`）分叉出一条新时间轴
    fn fork(&mut self, from: usize, element: ElementId, new_time: Option<f64>) -> usize {
        self.builders[from].apply_styles_to_keyframe();
        let start = match new_time {
            Some(time) if time != 0.0 => time,
            _ => self.builders[from].current_time(),
        };
        self.push_builder(element, start)
    }

    fn merge_collected_styles(&mut self, into: usize, from: usize) {
        if into == from {
            return;
        }
        let (target, source) = if into < from {
            let (left, right) = self.builders.split_at_mut(from);
            (&mut left[into], &right[0])
        } else {
            let (left, right) = self.builders.split_at_mut(into);
            (&mut right[0], &left[from])
        };
        target.merge_timeline_collected_styles(source);
    }

    fn update_options(
        &mut self,
        context: &mut TimelineContext,
        options: Option<&AnimationOptions>,
        skip_if_exists: bool,
    ) {
        let Some(options) = options else {
            return;
        };
        if let Some(duration) = &options.duration {
            context.options.duration = Some(resolve_timing_value(duration));
        }
        if let Some(delay) = &options.delay {
            context.options.delay = Some(resolve_timing_value(delay));
        }
        if let Some(new_params) = &options.params {
            let params = context.options.params.get_or_insert_with(AnimationParams::new);
            for (name, value) in new_params {
                if skip_if_exists && params.contains_key(name) {
                    continue;
                }
                let value = interpolate_params(value, params, self.errors);
                params.insert(name.clone(), value);
            }
        }
    }

    fn create_sub_context(
        &mut self,
        context: &mut TimelineContext,
        options: Option<&AnimationOptions>,
        element: Option<ElementId>,
    ) -> TimelineContext {
        let target = element.unwrap_or(context.element);
        let timeline = self.fork(context.timeline, target, None);
        let mut sub = TimelineContext {
            element: target,
            timeline,
            current_animate_timings: context.current_animate_timings.clone(),
            previous_node: context.previous_node,
            sub_context_count: 0,
            options: ContextOptions {
                params: context.options.params.clone(),
                ..Default::default()
            },
            query_index: context.query_index,
            query_total: context.query_total,
            stagger_time: Rc::new(Cell::new(0.0)),
            parent: Some(ParentLink {
                stagger_time: context.stagger_time.clone(),
                timeline: context.timeline,
            }),
        };
        self.update_options(&mut sub, options, false);
        context.sub_context_count += 1;
        sub
    }

    fn transform_into_new_timeline(&mut self, context: &mut TimelineContext, new_time: Option<f64>) {
        context.previous_node = PreviousNode::Noop;
        context.timeline = self.fork(context.timeline, context.element, new_time);
    }

    fn append_instruction_to_timeline(
        &mut self,
        context: &TimelineContext,
        instruction: &TimelineInstruction,
        duration: Option<f64>,
        delay: Option<f64>,
    ) -> Timing {
        let timings = Timing {
            duration: duration.unwrap_or(instruction.duration),
            delay: self.builders[context.timeline].current_time() + delay.unwrap_or(0.0) + instruction.delay,
            easing: None,
        };
        self.slots
            .push(Slot::Sub(SubTimelineBuilder::new(instruction, timings.clone())));
        timings
    }

    fn increment_time(&mut self, context: &TimelineContext, time: f64) {
        let builder = &mut self.builders[context.timeline];
        let target = builder.duration + time;
        builder.forward_time(target);
    }

    fn delay_next_step(&mut self, context: &TimelineContext, delay: f64) {
        if delay > 0.0 {
            self.builders[context.timeline].delay_next_step(delay);
        }
    }

    fn invoke_query(&mut self, context: &TimelineContext, ast: &QueryAst) -> Vec<ElementId> {
        let mut results = Vec::new();
        if ast.include_self {
            results.push(context.element);
        }
        // 只有 `:self` 时选择器为空
        if !ast.selector.is_empty() {
            let selector = ast
                .selector
                .replace(ENTER_TOKEN, &format!(".{}", self.enter_class_name))
                .replace(LEAVE_TOKEN, &format!(".{}", self.leave_class_name));
            let multi = ast.limit != 1;
            let mut elements = self.driver.query(context.element, &selector, multi);
            if ast.limit != 0 {
                let limit = ast.limit.unsigned_abs() as usize;
                elements = if ast.limit < 0 {
                    let start = elements.len().saturating_sub(limit);
                    elements.split_off(start)
                } else {
                    elements.into_iter().take(limit).collect()
                };
            }
            results.extend(elements);
        }
        if !ast.optional && results.is_empty() {
            self.errors.push(AnimationError::InvalidQuery {
                selector: ast.original_selector.clone(),
            });
        }
        results
    }

    fn visit(&mut self, ast: &Ast, context: &mut TimelineContext) {
        match ast {
            Ast::Sequence(ast) => self.visit_sequence(ast, context),
            Ast::Group(ast) => self.visit_group(ast, context),
            Ast::Animate(ast) => self.visit_animate(ast, context),
            Ast::Style(ast) => self.visit_style(ast, context),
            Ast::Keyframes(ast) => self.visit_keyframes(ast, context),
            Ast::Reference(ast) => self.visit_reference(ast, context),
            Ast::AnimateChild(ast) => self.visit_animate_child(ast, context),
            Ast::AnimateRef(ast) => self.visit_animate_ref(ast, context),
            Ast::Query(ast) => self.visit_query(ast, context),
            Ast::Stagger(ast) => self.visit_stagger(ast, context),
        }
    }

    fn visit_animate_child(&mut self, ast: &AnimateChildAst, context: &mut TimelineContext) {
        if let Some(instructions) = self.sub_instructions.consume(context.element) {
            let mut inner = self.create_sub_context(context, ast.options.as_ref(), None);
            let start_time = self.builders[context.timeline].current_time();
            let end_time = self.visit_sub_instructions(&instructions, &mut inner);
            if start_time != end_time {
                self.transform_into_new_timeline(context, Some(end_time));
            }
        }
        context.previous_node = PreviousNode::Other;
    }

    fn visit_sub_instructions(
        &mut self,
        instructions: &[TimelineInstruction],
        context: &mut TimelineContext,
    ) -> f64 {
        let start_time = self.builders[context.timeline].current_time();
        let mut furthest_time = start_time;
        let duration = context.options.duration;
        let delay = context.options.delay;
        // duration 为 0 表示跳过子动画
        if duration != Some(0.0) {
            for instruction in instructions {
                let timings = self.append_instruction_to_timeline(context, instruction, duration, delay);
                furthest_time = furthest_time.max(timings.duration + timings.delay);
            }
        }
        furthest_time
    }

    fn visit_animate_ref(&mut self, ast: &AnimateRefAst, context: &mut TimelineContext) {
        let mut inner = self.create_sub_context(context, ast.options.as_ref(), None);
        self.transform_into_new_timeline(&mut inner, None);
        for options in [ast.options.as_ref(), ast.animation.options.as_ref()]
            .into_iter()
            .flatten()
        {
            let Some(delay) = &options.delay else {
                continue;
            };
            let delay = match delay {
                TimingValue::Millis(ms) => *ms,
                TimingValue::Expr(expr) => {
                    let empty = AnimationParams::new();
                    let params = options.params.as_ref().unwrap_or(&empty);
                    let value = interpolate_params(&StyleValue::from(expr.as_str()), params, self.errors);
                    resolve_timing_value(&TimingValue::Expr(value.to_string()))
                }
            };
            self.delay_next_step(&inner, delay);
        }
        self.visit_reference(&ast.animation, &mut inner);
        let end_time = self.builders[inner.timeline].current_time();
        self.transform_into_new_timeline(context, Some(end_time));
        context.previous_node = PreviousNode::Other;
    }

    fn visit_reference(&mut self, ast: &ReferenceAst, context: &mut TimelineContext) {
        self.update_options(context, ast.options.as_ref(), true);
        self.visit(&ast.animation, context);
        context.previous_node = PreviousNode::Other;
    }

    fn visit_sequence(&mut self, ast: &SequenceAst, context: &mut TimelineContext) {
        let sub_context_count = context.sub_context_count;
        let options = ast
            .options
            .as_ref()
            .filter(|o| o.params.is_some() || o.delay.is_some());

        let mut sub;
        let target: &mut TimelineContext = match options {
            Some(options) => {
                sub = self.create_sub_context(context, Some(options), None);
                self.transform_into_new_timeline(&mut sub, None);
                if let Some(delay) = &options.delay {
                    if sub.previous_node == PreviousNode::Style {
                        self.builders[sub.timeline].snapshot_current_styles();
                        sub.previous_node = PreviousNode::Noop;
                    }
                    self.delay_next_step(&sub, resolve_timing_value(delay));
                }
                &mut sub
            }
            None => &mut *context,
        };

        if !ast.steps.is_empty() {
            for step in &ast.steps {
                self.visit(step, target);
            }
            // 序列可能以 style() 结尾
            self.builders[target.timeline].apply_styles_to_keyframe();
            // 内部派生过子时间轴时，当前时间轴不能再与序列内容重叠
            if target.sub_context_count > sub_context_count {
                self.transform_into_new_timeline(target, None);
            }
        }
        context.previous_node = PreviousNode::Other;
    }

    fn visit_group(&mut self, ast: &GroupAst, context: &mut TimelineContext) {
        let mut inner_timelines = Vec::with_capacity(ast.steps.len());
        let mut furthest_time = self.builders[context.timeline].current_time();
        let delay = ast
            .options
            .as_ref()
            .and_then(|o| o.delay.as_ref())
            .map(resolve_timing_value)
            .unwrap_or(0.0);

        for step in &ast.steps {
            let mut inner = self.create_sub_context(context, ast.options.as_ref(), None);
            if delay != 0.0 {
                self.delay_next_step(&inner, delay);
            }
            self.visit(step, &mut inner);
            furthest_time = furthest_time.max(self.builders[inner.timeline].current_time());
            inner_timelines.push(inner.timeline);
        }

        // 全部子步骤完成后再合并，避免影响仍在分叉的兄弟时间轴
        for timeline in inner_timelines {
            self.merge_collected_styles(context.timeline, timeline);
        }
        self.transform_into_new_timeline(context, Some(furthest_time));
        context.previous_node = PreviousNode::Other;
    }

    fn visit_timing(&mut self, ast: &TimingAst, context: &TimelineContext) -> Timing {
        match ast {
            TimingAst::Static(timing) => timing.clone(),
            TimingAst::Dynamic(expr) => {
                let value = match &context.options.params {
                    Some(params) => {
                        interpolate_params(&StyleValue::from(expr.as_str()), params, self.errors).to_string()
                    }
                    None => expr.clone(),
                };
                resolve_timing(&TimingValue::Expr(value), self.errors, false)
            }
        }
    }

    fn visit_animate(&mut self, ast: &AnimateAst, context: &mut TimelineContext) {
        let timings = self.visit_timing(&ast.timings, context);
        context.current_animate_timings = Some(timings.clone());
        let timeline = context.timeline;

        if timings.delay != 0.0 {
            self.increment_time(context, timings.delay);
            self.builders[timeline].snapshot_current_styles();
        }

        match &ast.style {
            AnimateStyleAst::Keyframes(keyframes) => self.visit_keyframes(keyframes, context),
            AnimateStyleAst::Style(style) => {
                self.increment_time(context, timings.duration);
                self.visit_style(style, context);
                self.builders[timeline].apply_styles_to_keyframe();
            }
        }

        context.current_animate_timings = None;
        context.previous_node = PreviousNode::Other;
    }

    fn visit_style(&mut self, ast: &StyleAst, context: &mut TimelineContext) {
        let builder = &mut self.builders[context.timeline];
        let timings = context.current_animate_timings.as_ref();

        // 紧跟在 animate() 之后（而非其内部）的 style()
        if timings.is_none() && builder.has_current_style_properties() {
            builder.forward_frame();
        }

        let easing = timings
            .and_then(|t| t.easing.as_deref())
            .filter(|e| !e.is_empty())
            .or(ast.easing.as_deref());

        if ast.is_empty_step {
            builder.apply_empty_step(easing);
        } else {
            builder.set_styles(&ast.styles, easing, self.errors, context.options.params.as_ref());
        }
        context.previous_node = PreviousNode::Style;
    }

    fn visit_keyframes(&mut self, ast: &KeyframesAst, context: &mut TimelineContext) {
        let timings = context.current_animate_timings.clone().unwrap_or_default();
        let start_time = self.builders[context.timeline].duration;
        let duration = timings.duration;

        let inner = self.create_sub_context(context, None, None);
        let inner_timeline = &mut self.builders[inner.timeline];
        inner_timeline.easing = timings.easing.clone();

        for step in &ast.styles {
            let offset = step.offset.unwrap_or(0.0);
            inner_timeline.forward_time(offset * duration);
            inner_timeline.set_styles(
                &step.styles,
                step.easing.as_deref(),
                self.errors,
                context.options.params.as_ref(),
            );
            inner_timeline.apply_styles_to_keyframe();
        }

        // 即使之后不使用这条新时间轴，父时间轴也要拿到子时间轴的样式
        self.merge_collected_styles(context.timeline, inner.timeline);
        self.transform_into_new_timeline(context, Some(start_time + duration));
        context.previous_node = PreviousNode::Other;
    }

    fn visit_query(&mut self, ast: &QueryAst, context: &mut TimelineContext) {
        let start_time = self.builders[context.timeline].current_time();
        let delay = ast
            .options
            .as_ref()
            .and_then(|o| o.delay.as_ref())
            .map(resolve_timing_value)
            .unwrap_or(0.0);

        // 前一步是 style() 时，先把样式落到关键帧上再处理子元素
        if delay != 0.0
            && (context.previous_node == PreviousNode::Style
                || (start_time == 0.0 && self.builders[context.timeline].has_current_style_properties()))
        {
            self.builders[context.timeline].snapshot_current_styles();
            context.previous_node = PreviousNode::Noop;
        }

        let mut furthest_time = start_time;
        let elements = self.invoke_query(context, ast);
        context.query_total = elements.len();
        let mut same_element_timeline = None;

        for (i, element) in elements.into_iter().enumerate() {
            context.query_index = i;
            let mut inner = self.create_sub_context(context, ast.options.as_ref(), Some(element));
            if delay != 0.0 {
                self.delay_next_step(&inner, delay);
            }
            if element == context.element {
                same_element_timeline = Some(inner.timeline);
            }
            self.visit(&ast.animation, &mut inner);
            let inner_timeline = &mut self.builders[inner.timeline];
            inner_timeline.apply_styles_to_keyframe();
            furthest_time = furthest_time.max(inner_timeline.current_time());
        }

        context.query_index = 0;
        context.query_total = 0;
        self.transform_into_new_timeline(context, Some(furthest_time));

        if let Some(timeline) = same_element_timeline {
            self.merge_collected_styles(context.timeline, timeline);
            self.builders[context.timeline].snapshot_current_styles();
        }
        context.previous_node = PreviousNode::Other;
    }

    fn visit_stagger(&mut self, ast: &StaggerAst, context: &mut TimelineContext) {
        let Some(parent) = context.parent.clone() else {
            self.visit(&ast.animation, context);
            return;
        };
        let timeline = context.timeline;
        let timings = &ast.timings;
        let duration = timings.duration.abs();
        let max_time = duration * (context.query_total as f64 - 1.0);
        let mut delay = duration * context.query_index as f64;

        if timings.duration < 0.0 {
            delay = max_time - delay;
        } else if ast.full {
            delay = parent.stagger_time.get();
        }

        if delay != 0.0 {
            self.builders[timeline].delay_next_step(delay);
        }
        let starting_time = self.builders[timeline].current_time();
        self.visit(&ast.animation, context);
        context.previous_node = PreviousNode::Other;

        // 内层时间轴可能带延迟，也可能被拉伸了首帧，两部分都要算上
        let builder = &self.builders[timeline];
        let elapsed = (builder.current_time() - starting_time)
            + (builder.start_time - self.builders[parent.timeline].start_time);
        parent.stagger_time.set(elapsed);
    }
}
