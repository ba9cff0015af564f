//! 单个元素的时间轴累积器
//!
//! 关键帧以「相对开始时间的毫秒数」为键累积，最后按总时长折算为 offset。
//! 同一元素的所有时间轴共享一份「全局样式」，以便后续时间轴知道前面写过哪些属性。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dsl::StyleEntry;
use crate::driver::ElementId;
use crate::error::AnimationError;
use crate::params::{AnimationParams, interpolate_params};
use crate::style::{EASING_PROP, OFFSET_PROP, StyleMap, StyleValue};
use crate::timing::Timing;

use super::TimelineInstruction;

const ONE_FRAME_IN_MILLISECONDS: f64 = 1.0;

pub(crate) type SharedStyles = Rc<RefCell<StyleMap>>;

/// 每个元素的全局样式
pub(crate) type StylesLookup = HashMap<ElementId, SharedStyles>;

#[derive(Debug, Clone)]
struct StyleAtTime {
    time: f64,
    value: StyleValue,
}

#[derive(Debug)]
pub(crate) struct TimelineBuilder {
    pub element: ElementId,
    pub start_time: f64,
    pub duration: f64,
    pub easing: Option<String>,
    /// `None` 表示尚未落到任何关键帧上
    previous_keyframe: Option<usize>,
    current_keyframe: usize,
    keyframes: Vec<(f64, StyleMap)>,
    style_summary: Vec<(String, StyleAtTime)>,
    local_styles: SharedStyles,
    global_styles: SharedStyles,
    pending_styles: StyleMap,
    back_fill: StyleMap,
    empty_step_keyframe: Option<usize>,
}

impl TimelineBuilder {
    pub fn new(element: ElementId, start_time: f64, lookup: &mut StylesLookup) -> Self {
        let local_styles: SharedStyles = Rc::default();
        let global_styles = lookup
            .entry(element)
            .or_insert_with(|| local_styles.clone())
            .clone();

        let mut builder = Self {
            element,
            start_time,
            duration: 0.0,
            easing: None,
            previous_keyframe: None,
            current_keyframe: 0,
            keyframes: Vec::new(),
            style_summary: Vec::new(),
            local_styles,
            global_styles,
            pending_styles: StyleMap::new(),
            back_fill: StyleMap::new(),
            empty_step_keyframe: None,
        };
        builder.current_keyframe = builder.keyframe_index(0.0);
        builder
    }

    fn keyframe_index(&mut self, time: f64) -> usize {
        match self.keyframes.iter().position(|(t, _)| *t == time) {
            Some(index) => index,
            None => {
                self.keyframes.push((time, StyleMap::new()));
                self.keyframes.len() - 1
            }
        }
    }

    pub fn current_time(&self) -> f64 {
        self.start_time + self.duration
    }

    pub fn contains_animation(&self) -> bool {
        match self.keyframes.len() {
            0 => false,
            1 => self.has_current_style_properties(),
            _ => true,
        }
    }

    pub fn has_current_style_properties(&self) -> bool {
        !self.keyframes[self.current_keyframe].1.is_empty()
    }

    /// 推迟下一步
    ///
    /// 如果时间轴上只有一个 style() 步骤，先把它复制一份，保证延迟期间样式生效。
    pub fn delay_next_step(&mut self, delay: f64) {
        let has_pre_style_step = self.keyframes.len() == 1 && !self.pending_styles.is_empty();
        if self.duration != 0.0 || has_pre_style_step {
            self.forward_time(self.current_time() + delay);
            if has_pre_style_step {
                self.snapshot_current_styles();
            }
        } else {
            self.start_time += delay;
        }
    }

    fn load_keyframe(&mut self) {
        self.previous_keyframe = Some(self.current_keyframe);
        self.current_keyframe = self.keyframe_index(self.duration);
    }

    pub fn forward_frame(&mut self) {
        self.duration += ONE_FRAME_IN_MILLISECONDS;
        self.load_keyframe();
    }

    pub fn forward_time(&mut self, time: f64) {
        self.apply_styles_to_keyframe();
        self.duration = time;
        self.load_keyframe();
    }

    fn update_style(&mut self, prop: &str, value: &StyleValue) {
        self.local_styles.borrow_mut().insert(prop, value.clone());
        if !Rc::ptr_eq(&self.local_styles, &self.global_styles) {
            self.global_styles.borrow_mut().insert(prop, value.clone());
        }
        let entry = StyleAtTime {
            time: self.current_time(),
            value: value.clone(),
        };
        match self.style_summary.iter_mut().find(|(p, _)| p == prop) {
            Some((_, existing)) => *existing = entry,
            None => self.style_summary.push((prop.to_string(), entry)),
        }
    }

    fn set_previous_easing(&mut self, easing: Option<&str>) {
        if let (Some(easing), Some(index)) = (easing, self.previous_keyframe) {
            self.keyframes[index].1.insert(EASING_PROP, easing);
        }
    }

    /// 只有当前帧是空步骤帧时，才允许写入目标状态样式
    pub fn allow_only_timeline_styles(&self) -> bool {
        self.empty_step_keyframe != Some(self.current_keyframe)
    }

    /// `animate(timing)`：所有已知属性以 `*` 填充，之后同帧写入的目标样式会覆盖它们
    pub fn apply_empty_step(&mut self, easing: Option<&str>) {
        self.set_previous_easing(easing);
        let global = self.global_styles.borrow().clone();
        let keyframe = &mut self.keyframes[self.current_keyframe].1;
        for (prop, value) in global.iter() {
            let fill = if value.is_empty_value() {
                StyleValue::auto()
            } else {
                value.clone()
            };
            self.back_fill.insert(prop, fill);
            keyframe.insert(prop, StyleValue::auto());
        }
        self.empty_step_keyframe = Some(self.current_keyframe);
    }

    pub fn set_styles(
        &mut self,
        input: &[StyleEntry],
        easing: Option<&str>,
        errors: &mut Vec<AnimationError>,
        params: Option<&AnimationParams>,
    ) {
        self.set_previous_easing(easing);
        let empty = AnimationParams::new();
        let params = params.unwrap_or(&empty);
        let styles = self.flatten_styles(input);

        for (prop, value) in styles.iter() {
            let value = interpolate_params(value, params, errors);
            self.pending_styles.insert(prop, value.clone());
            if !self.local_styles.borrow().contains(prop) {
                let fill = self
                    .global_styles
                    .borrow()
                    .get(prop)
                    .cloned()
                    .unwrap_or_else(StyleValue::auto);
                self.back_fill.insert(prop, fill);
            }
            self.update_style(prop, &value);
        }
    }

    fn flatten_styles(&self, input: &[StyleEntry]) -> StyleMap {
        let mut styles = StyleMap::new();
        for entry in input {
            match entry {
                StyleEntry::Auto => {
                    for prop in self.global_styles.borrow().keys() {
                        styles.insert(prop, StyleValue::auto());
                    }
                }
                StyleEntry::Map(map) => styles.merge(map),
            }
        }
        styles
    }

    pub fn apply_styles_to_keyframe(&mut self) {
        if self.pending_styles.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_styles);
        let keyframe = &mut self.keyframes[self.current_keyframe].1;
        keyframe.merge(&pending);
        for (prop, value) in self.local_styles.borrow().iter() {
            if !keyframe.contains(prop) {
                keyframe.insert(prop, value.clone());
            }
        }
    }

    pub fn snapshot_current_styles(&mut self) {
        let local = self.local_styles.borrow().clone();
        for (prop, value) in local.iter() {
            self.pending_styles.insert(prop, value.clone());
            self.update_style(prop, value);
        }
    }

    /// 把另一条时间轴上更晚写入的属性同步过来
    pub fn merge_timeline_collected_styles(&mut self, other: &TimelineBuilder) {
        for (prop, details) in &other.style_summary {
            let newer = match self.style_summary.iter().find(|(p, _)| p == prop) {
                Some((_, existing)) => details.time > existing.time,
                None => true,
            };
            if newer {
                self.update_style(prop, &details.value.clone());
            }
        }
    }

    pub fn build_keyframes(&mut self) -> TimelineInstruction {
        self.apply_styles_to_keyframe();
        let mut pre_props: Vec<String> = Vec::new();
        let mut post_props: Vec<String> = Vec::new();
        let is_empty = self.keyframes.len() == 1 && self.duration == 0.0;

        let mut final_keyframes: Vec<StyleMap> = Vec::with_capacity(self.keyframes.len().max(2));
        for (time, keyframe) in &self.keyframes {
            let mut frame = self.back_fill.clone();
            frame.merge(keyframe);
            for (prop, value) in frame.iter() {
                let bucket = if value.is_pre() {
                    &mut pre_props
                } else if value.is_auto() {
                    &mut post_props
                } else {
                    continue;
                };
                if !bucket.iter().any(|p| p == prop) {
                    bucket.push(prop.to_string());
                }
            }
            if !is_empty {
                frame.insert(OFFSET_PROP, time / self.duration);
            }
            final_keyframes.push(frame);
        }

        // 零时长动画只是把样式放上屏幕：复制为 0 与 1 两帧
        if is_empty && let Some(mut first) = final_keyframes.pop() {
            let mut last = first.clone();
            first.insert(OFFSET_PROP, 0.0);
            last.insert(OFFSET_PROP, 1.0);
            final_keyframes = vec![first, last];
        }

        TimelineInstruction::new(
            self.element,
            final_keyframes,
            pre_props,
            post_props,
            self.duration,
            self.start_time,
            self.easing.clone(),
            false,
        )
    }
}

/// 由 animateChild() 并入的现成时间轴
#[derive(Debug)]
pub(crate) struct SubTimelineBuilder {
    pub element: ElementId,
    keyframes: Vec<StyleMap>,
    pre_style_props: Vec<String>,
    post_style_props: Vec<String>,
    timings: Timing,
    stretch_starting_keyframe: bool,
}

impl SubTimelineBuilder {
    pub fn new(instruction: &TimelineInstruction, timings: Timing) -> Self {
        Self {
            element: instruction.element,
            keyframes: instruction.keyframes.clone(),
            pre_style_props: instruction.pre_style_props.clone(),
            post_style_props: instruction.post_style_props.clone(),
            timings,
            stretch_starting_keyframe: instruction.stretch_starting_keyframe,
        }
    }

    pub fn contains_animation(&self) -> bool {
        self.keyframes.len() > 1
    }

    /// 拉伸首帧：延迟被并入时长，首帧样式在延迟期间保持不动，
    /// 其余帧的 offset 按新的总时长重新折算。
    ///
    /// ```text
    /// delay=1000, duration=1000, offsets = 0 .5 1
    /// → delay=0, duration=2000, offsets = 0 .5 .75 1
    /// ```
    pub fn build_keyframes(&self) -> TimelineInstruction {
        let Timing {
            mut duration,
            mut delay,
            mut easing,
        } = self.timings.clone();
        let mut keyframes = self.keyframes.clone();

        if self.stretch_starting_keyframe && delay != 0.0 && !keyframes.is_empty() {
            let total_time = duration + delay;
            let starting_gap = delay / total_time;
            let mut stretched = Vec::with_capacity(keyframes.len() + 1);

            let mut new_first = keyframes[0].clone();
            new_first.insert(OFFSET_PROP, 0.0);
            stretched.push(new_first);

            let mut old_first = keyframes[0].clone();
            old_first.insert(OFFSET_PROP, round_offset(starting_gap));
            stretched.push(old_first);

            for keyframe in &keyframes[1..] {
                let mut frame = keyframe.clone();
                let old_offset = frame.offset().unwrap_or(0.0);
                let time_at_keyframe = delay + old_offset * duration;
                frame.insert(OFFSET_PROP, round_offset(time_at_keyframe / total_time));
                stretched.push(frame);
            }

            duration = total_time;
            delay = 0.0;
            easing = None;
            keyframes = stretched;
        }

        TimelineInstruction::new(
            self.element,
            keyframes,
            self.pre_style_props.clone(),
            self.post_style_props.clone(),
            duration,
            delay,
            easing,
            true,
        )
    }
}

/// 保留两位小数
fn round_offset(offset: f64) -> f64 {
    (offset * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> StyleEntry {
        StyleEntry::Map(pairs.iter().copied().collect())
    }

    #[test]
    fn test_zero_duration_produces_two_keyframes() {
        let mut lookup = StylesLookup::new();
        let mut builder = TimelineBuilder::new(ElementId(1), 0.0, &mut lookup);
        let mut errors = vec![];
        builder.set_styles(&[map(&[("opacity", "0")])], None, &mut errors, None);

        let instruction = builder.build_keyframes();
        assert_eq!(instruction.keyframes.len(), 2);
        assert_eq!(instruction.keyframes[0].offset(), Some(0.0));
        assert_eq!(instruction.keyframes[1].offset(), Some(1.0));
        assert_eq!(instruction.keyframes[1].get("opacity"), Some(&StyleValue::from("0")));
    }

    #[test]
    fn test_back_fill_uses_auto_for_new_properties() {
        let mut lookup = StylesLookup::new();
        let mut builder = TimelineBuilder::new(ElementId(1), 0.0, &mut lookup);
        let mut errors = vec![];
        builder.forward_time(500.0);
        builder.set_styles(&[map(&[("width", "10px")])], None, &mut errors, None);

        let instruction = builder.build_keyframes();
        assert_eq!(instruction.duration, 500.0);
        assert_eq!(instruction.keyframes[0].get("width"), Some(&StyleValue::auto()));
        assert_eq!(instruction.keyframes[0].offset(), Some(0.0));
        assert_eq!(instruction.keyframes[1].offset(), Some(1.0));
        assert_eq!(instruction.post_style_props, vec!["width".to_string()]);
    }

    #[test]
    fn test_delay_before_any_step_moves_start_time() {
        let mut lookup = StylesLookup::new();
        let mut builder = TimelineBuilder::new(ElementId(1), 0.0, &mut lookup);
        builder.delay_next_step(200.0);
        assert_eq!(builder.start_time, 200.0);
        assert_eq!(builder.duration, 0.0);
    }

    #[test]
    fn test_sub_timeline_stretch() {
        let keyframes = vec![
            StyleMap::new().with("opacity", 0).with("offset", 0),
            StyleMap::new().with("opacity", 0.5).with("offset", 0.5),
            StyleMap::new().with("opacity", 1).with("offset", 1),
        ];
        let mut instruction =
            TimelineInstruction::new(ElementId(2), keyframes, vec![], vec![], 1000.0, 0.0, None, false);
        instruction.stretch_starting_keyframe = true;

        let sub = SubTimelineBuilder::new(&instruction, Timing::new(1000.0, 1000.0, None));
        let built = sub.build_keyframes();
        let offsets: Vec<_> = built.keyframes.iter().map(|k| k.offset()).collect();
        assert_eq!(offsets, vec![Some(0.0), Some(0.5), Some(0.75), Some(1.0)]);
        assert_eq!(built.duration, 2000.0);
        assert_eq!(built.delay, 0.0);
        assert!(built.sub_timeline);
    }
}
