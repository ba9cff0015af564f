//! # Trigger 模块
//!
//! 触发器 = 状态样式表 + 有序的过渡工厂列表。
//!
//! 过渡匹配是线性扫描：按声明顺序返回第一个匹配的工厂，
//! 都不匹配时返回触发器自带的兜底过渡（`* => *`，空动画）。

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::driver::{AnimationDriver, ElementId};
use crate::dsl::{
    Ast, SequenceAst, StateValue, StyleAst, StyleEntry, TransitionAst, TriggerAst, matcher,
};
use crate::error::AnimationError;
use crate::params::{AnimationParams, apply_param_defaults, interpolate_params};
use crate::style::{StyleMap, StyleNormalizer};
use crate::timeline::{
    ElementInstructionMap, TimelineBuildOptions, TimelineInstruction, build_animation_timelines,
};

/// 元素 → 需要在播放前计算的属性集合
pub type ElementStyleProps = BTreeMap<ElementId, BTreeSet<String>>;

/// 一次状态切换编译出的全部内容
#[derive(Debug, Clone)]
pub struct TransitionInstruction {
    pub element: ElementId,
    pub trigger_name: String,
    pub is_removal_transition: bool,
    pub from_state: StateValue,
    pub from_styles: StyleMap,
    pub to_state: StateValue,
    pub to_styles: StyleMap,
    pub timelines: Vec<TimelineInstruction>,
    /// 时间轴涉及的、根元素以外的元素
    pub queried_elements: Vec<ElementId>,
    pub pre_style_props: ElementStyleProps,
    pub post_style_props: ElementStyleProps,
    pub total_time: f64,
    pub errors: Vec<AnimationError>,
}

/// 某个状态的样式（可含参数）
pub struct AnimationStateStyles {
    style: StyleAst,
    default_params: AnimationParams,
    normalizer: Rc<dyn StyleNormalizer>,
}

impl AnimationStateStyles {
    pub fn new(style: StyleAst, default_params: AnimationParams, normalizer: Rc<dyn StyleNormalizer>) -> Self {
        Self {
            style,
            default_params,
            normalizer,
        }
    }

    /// 以给定参数（缺省取状态默认参数）生成样式表
    pub fn build_styles(&self, params: &AnimationParams, errors: &mut Vec<AnimationError>) -> StyleMap {
        let mut styles = StyleMap::new();
        let combined = apply_param_defaults(params, &self.default_params);
        for entry in &self.style.styles {
            let StyleEntry::Map(map) = entry else {
                continue;
            };
            for (prop, value) in map.iter() {
                let value = if value.is_empty_value() {
                    value.clone()
                } else {
                    interpolate_params(value, &combined, errors)
                };
                let normalized_prop = self.normalizer.normalize_property_name(prop, errors);
                let value = self
                    .normalizer
                    .normalize_style_value(prop, &normalized_prop, &value, errors);
                styles.insert(prop, value);
            }
        }
        styles
    }
}

pub type StateStylesMap = BTreeMap<String, Rc<AnimationStateStyles>>;

/// 过渡工厂：匹配一对状态，并为匹配结果编译时间轴
pub struct AnimationTransitionFactory {
    trigger_name: String,
    ast: Rc<TransitionAst>,
    states: Rc<StateStylesMap>,
    fallback: bool,
}

impl AnimationTransitionFactory {
    pub fn new(trigger_name: &str, ast: Rc<TransitionAst>, states: Rc<StateStylesMap>) -> Self {
        Self {
            trigger_name: trigger_name.to_string(),
            ast,
            states,
            fallback: false,
        }
    }

    pub fn ast(&self) -> &TransitionAst {
        &self.ast
    }

    /// 是否为兜底过渡
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn matches(
        &self,
        from: &StateValue,
        to: &StateValue,
        element: ElementId,
        params: &AnimationParams,
    ) -> bool {
        self.ast.matchers.iter().any(|m| m(from, to, element, params))
    }

    /// 查状态样式；未声明的状态为空
    pub fn build_styles(
        &self,
        state: &StateValue,
        params: &AnimationParams,
        errors: &mut Vec<AnimationError>,
    ) -> StyleMap {
        match self.states.get(&state.as_key()) {
            Some(styles) => styles.build_styles(params, errors),
            None => StyleMap::new(),
        }
    }

    /// 编译这次切换
    ///
    /// 出现任何错误时，返回的指令不带时间轴，错误记录在 `errors` 字段中。
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        driver: &dyn AnimationDriver,
        element: ElementId,
        from: &StateValue,
        to: &StateValue,
        enter_class_name: &str,
        leave_class_name: &str,
        from_params: Option<&AnimationParams>,
        to_params: Option<&AnimationParams>,
        sub_instructions: Option<&ElementInstructionMap>,
        skip_ast_build: bool,
    ) -> TransitionInstruction {
        let mut errors = Vec::new();
        let empty = AnimationParams::new();
        let transition_params = self
            .ast
            .options
            .as_ref()
            .and_then(|o| o.params.as_ref())
            .unwrap_or(&empty);
        let from_params = from_params.unwrap_or(&empty);
        let to_params = to_params.unwrap_or(&empty);

        let from_styles = self.build_styles(from, from_params, &mut errors);
        let to_styles = self.build_styles(to, to_params, &mut errors);

        let params = apply_param_defaults(to_params, transition_params);
        let delay = self.ast.options.as_ref().and_then(|o| o.delay.as_ref());

        let timelines = if skip_ast_build {
            Vec::new()
        } else {
            let options = TimelineBuildOptions {
                enter_class_name,
                leave_class_name,
                starting_styles: &from_styles,
                final_styles: &to_styles,
                params: Some(&params),
                delay,
            };
            build_animation_timelines(
                driver,
                element,
                &self.ast.animation,
                options,
                sub_instructions,
                &mut errors,
            )
        };

        let total_time = timelines
            .iter()
            .map(|t| t.duration + t.delay)
            .fold(0.0, f64::max);

        let mut instruction = TransitionInstruction {
            element,
            trigger_name: self.trigger_name.clone(),
            is_removal_transition: to.is_void(),
            from_state: from.clone(),
            from_styles,
            to_state: to.clone(),
            to_styles,
            timelines: Vec::new(),
            queried_elements: Vec::new(),
            pre_style_props: ElementStyleProps::new(),
            post_style_props: ElementStyleProps::new(),
            total_time,
            errors: Vec::new(),
        };

        if !errors.is_empty() {
            instruction.errors = errors;
            return instruction;
        }

        for timeline in &timelines {
            let el = timeline.element;
            instruction
                .pre_style_props
                .entry(el)
                .or_default()
                .extend(timeline.pre_style_props.iter().cloned());
            instruction
                .post_style_props
                .entry(el)
                .or_default()
                .extend(timeline.post_style_props.iter().cloned());
            if el != element && !instruction.queried_elements.contains(&el) {
                instruction.queried_elements.push(el);
            }
        }
        instruction.timelines = timelines;
        instruction
    }
}

/// 编译好的触发器
pub struct AnimationTrigger {
    name: String,
    ast: TriggerAst,
    states: Rc<StateStylesMap>,
    transition_factories: Vec<Rc<AnimationTransitionFactory>>,
    fallback: Rc<AnimationTransitionFactory>,
}

impl AnimationTrigger {
    pub fn new(name: &str, ast: TriggerAst, normalizer: Rc<dyn StyleNormalizer>) -> Self {
        let mut states = StateStylesMap::new();
        for state in &ast.states {
            states.insert(
                state.name.clone(),
                Rc::new(AnimationStateStyles::new(
                    state.style.clone(),
                    state.default_params.clone(),
                    normalizer.clone(),
                )),
            );
        }
        balance_properties(&mut states, "true", "1");
        balance_properties(&mut states, "false", "0");
        let states = Rc::new(states);

        let transition_factories = ast
            .transitions
            .iter()
            .map(|t| Rc::new(AnimationTransitionFactory::new(name, Rc::new(t.clone()), states.clone())))
            .collect();
        let fallback = Rc::new(create_fallback_transition(name, states.clone()));

        Self {
            name: name.to_string(),
            ast,
            states,
            transition_factories,
            fallback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ast(&self) -> &TriggerAst {
        &self.ast
    }

    /// 过渡中是否用到 query()
    pub fn contains_queries(&self) -> bool {
        self.ast.query_count > 0
    }

    pub fn states(&self) -> &StateStylesMap {
        &self.states
    }

    pub fn state_styles(&self, state: &str) -> Option<&Rc<AnimationStateStyles>> {
        self.states.get(state)
    }

    pub fn transition_factories(&self) -> &[Rc<AnimationTransitionFactory>] {
        &self.transition_factories
    }

    pub fn fallback(&self) -> &Rc<AnimationTransitionFactory> {
        &self.fallback
    }

    /// 按声明顺序返回第一个匹配的过渡；都不匹配时返回兜底过渡
    pub fn match_transition(
        &self,
        from: &StateValue,
        to: &StateValue,
        element: ElementId,
        params: &AnimationParams,
    ) -> &Rc<AnimationTransitionFactory> {
        self.transition_factories
            .iter()
            .find(|f| f.matches(from, to, element, params))
            .unwrap_or(&self.fallback)
    }

    /// 直接取某个状态的样式（不播放动画时使用）
    pub fn match_styles(
        &self,
        state: &StateValue,
        params: &AnimationParams,
        errors: &mut Vec<AnimationError>,
    ) -> StyleMap {
        self.fallback.build_styles(state, params, errors)
    }
}

/// 编译触发器
pub fn build_trigger(name: &str, ast: TriggerAst, normalizer: Rc<dyn StyleNormalizer>) -> AnimationTrigger {
    AnimationTrigger::new(name, ast, normalizer)
}

fn create_fallback_transition(trigger_name: &str, states: Rc<StateStylesMap>) -> AnimationTransitionFactory {
    let ast = TransitionAst {
        matchers: vec![matcher(|_, _, _, _| true)],
        animation: Ast::Sequence(SequenceAst {
            steps: Vec::new(),
            options: None,
        }),
        options: None,
        query_count: 0,
        dep_count: 0,
    };
    AnimationTransitionFactory {
        trigger_name: trigger_name.to_string(),
        ast: Rc::new(ast),
        states,
        fallback: true,
    }
}

/// `true`/`1`、`false`/`0` 只声明一个时，补齐另一个
fn balance_properties(states: &mut StateStylesMap, key1: &str, key2: &str) {
    if let Some(value) = states.get(key1).cloned() {
        states.entry(key2.to_string()).or_insert(value);
    } else if let Some(value) = states.get(key2).cloned() {
        states.insert(key1.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::*;
    use crate::style::{DimensionalStyleNormalizer, NoopStyleNormalizer, StyleValue};
    use crate::testing::{MockAnimationDriver, MockDom};

    fn make_trigger(metadata: TriggerMetadata) -> AnimationTrigger {
        let mut errors = vec![];
        let mut warnings = vec![];
        let ast = build_trigger_ast(None, &metadata, &mut errors, &mut warnings);
        assert!(errors.is_empty(), "{errors:?}");
        build_trigger(&metadata.name, ast, Rc::new(NoopStyleNormalizer))
    }

    #[test]
    fn test_boolean_states_are_balanced() {
        let trigger = make_trigger(trigger(
            "t",
            vec![
                state("true", style(StyleMap::new().with("opacity", 1))),
                state("0", style(StyleMap::new().with("opacity", 0))),
            ],
        ));
        assert!(Rc::ptr_eq(
            trigger.state_styles("true").expect("true"),
            trigger.state_styles("1").expect("1")
        ));
        assert!(trigger.state_styles("false").is_some());

        let mut errors = vec![];
        let styles = trigger.match_styles(&StateValue::from(true), &AnimationParams::new(), &mut errors);
        assert_eq!(styles.get("opacity"), Some(&StyleValue::from(1)));
    }

    #[test]
    fn test_first_declared_transition_wins() {
        let trigger = make_trigger(trigger(
            "t",
            vec![
                transition("a => b", animate_timing(100)),
                transition("* => *", animate_timing(200)),
            ],
        ));
        let params = AnimationParams::new();
        let el = ElementId(1);
        let first = trigger.match_transition(&"a".into(), &"b".into(), el, &params);
        assert!(Rc::ptr_eq(first, &trigger.transition_factories()[0]));
        let second = trigger.match_transition(&"b".into(), &"a".into(), el, &params);
        assert!(Rc::ptr_eq(second, &trigger.transition_factories()[1]));
    }

    #[test]
    fn test_fallback_when_nothing_matches() {
        let trigger = make_trigger(trigger("t", vec![]));
        let dom = Rc::new(MockDom::new());
        let driver = MockAnimationDriver::new(dom.clone());
        let el = dom.create_element("div", dom.body());

        let factory = trigger.match_transition(&"x".into(), &"y".into(), el, &AnimationParams::new());
        assert!(factory.is_fallback());

        let instruction = factory.build(
            &driver,
            el,
            &"x".into(),
            &"y".into(),
            "ng-enter",
            "ng-leave",
            None,
            None,
            None,
            false,
        );
        assert_eq!(instruction.total_time, 0.0);
        assert!(instruction.errors.is_empty());
        assert!(instruction.timelines.iter().all(|t| t.keyframes.is_empty()));
    }

    #[test]
    fn test_state_params_and_normalization() {
        let metadata = trigger(
            "size",
            vec![
                state_with_params(
                    "big",
                    style(StyleMap::new().with("width", "{{ w }}")),
                    [("w".to_string(), StyleValue::from("200px"))].into(),
                ),
                state("narrow", style(StyleMap::new().with("width", 10))),
                transition("* => big", animate_timing(500)),
            ],
        );
        let mut errors = vec![];
        let mut warnings = vec![];
        let ast = build_trigger_ast(None, &metadata, &mut errors, &mut warnings);
        let trigger = build_trigger("size", ast, Rc::new(DimensionalStyleNormalizer));

        let defaults = trigger.match_styles(&"big".into(), &AnimationParams::new(), &mut errors);
        assert_eq!(defaults.get("width"), Some(&StyleValue::from("200px")));

        let params = [("w".to_string(), StyleValue::from("50%"))].into();
        let custom = trigger.match_styles(&"big".into(), &params, &mut errors);
        assert_eq!(custom.get("width"), Some(&StyleValue::from("50%")));

        let narrow = trigger.match_styles(&"narrow".into(), &AnimationParams::new(), &mut errors);
        assert_eq!(narrow.get("width"), Some(&StyleValue::from("10px")));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_build_collects_queried_elements_and_props() {
        let dom = Rc::new(MockDom::new());
        let driver = MockAnimationDriver::new(dom.clone());
        let host = dom.create_element("div", dom.body());
        let child = dom.create_element("span", host);
        dom.add_class_name(child, "inner");

        let trigger = make_trigger(trigger(
            "t",
            vec![transition(
                "* => *",
                group(vec![
                    animate(100, style(StyleMap::new().with("height", "*"))),
                    query(".inner", animate(100, style(StyleMap::new().with("opacity", "!")))),
                ]),
            )],
        ));
        let factory = &trigger.transition_factories()[0];
        let instruction = factory.build(
            &driver,
            host,
            &"a".into(),
            &"b".into(),
            "ng-enter",
            "ng-leave",
            None,
            None,
            None,
            false,
        );
        assert!(instruction.errors.is_empty(), "{:?}", instruction.errors);
        assert_eq!(instruction.queried_elements, vec![child]);
        assert!(instruction.post_style_props[&host].contains("height"));
        assert!(instruction.pre_style_props[&child].contains("opacity"));
        assert_eq!(instruction.total_time, 100.0);
    }
}
