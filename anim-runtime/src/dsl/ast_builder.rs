//! 元数据 → 校验后的 AST
//!
//! 所有问题都累积到 `errors`（致命）或 `warnings`（不支持的样式属性，
//! 会被剔除）中，构建本身总会返回一棵可用的 AST。

use std::collections::BTreeSet;

use crate::driver::{AnimationDriver, NG_ANIMATING_SELECTOR, NG_TRIGGER_SELECTOR};
use crate::error::AnimationError;
use crate::params::extract_style_params;
use crate::style::{EASING_PROP, OFFSET_PROP, StyleValue};
use crate::timing::{Timing, TimingValue, resolve_timing};

use super::ast::*;
use super::metadata::*;
use super::transition_expr::parse_transition_expr;

const SELF_TOKEN: &str = ":self";

struct AstBuilderContext<'a> {
    driver: Option<&'a dyn AnimationDriver>,
    errors: &'a mut Vec<AnimationError>,
    query_count: usize,
    dep_count: usize,
    in_query: bool,
    in_animate: bool,
    unsupported: BTreeSet<String>,
}

impl<'a> AstBuilderContext<'a> {
    fn new(driver: Option<&'a dyn AnimationDriver>, errors: &'a mut Vec<AnimationError>) -> Self {
        Self {
            driver,
            errors,
            query_count: 0,
            dep_count: 0,
            in_query: false,
            in_animate: false,
            unsupported: BTreeSet::new(),
        }
    }

    fn flush_warnings(&mut self, warnings: &mut Vec<AnimationError>) {
        for property in std::mem::take(&mut self.unsupported) {
            warnings.push(AnimationError::UnsupportedStyleProperty { property });
        }
    }
}

/// 构建单个动画的 AST
///
/// `driver` 为 `None` 时跳过样式属性校验。
pub fn build_animation_ast(
    driver: Option<&dyn AnimationDriver>,
    metadata: &AnimationMetadata,
    errors: &mut Vec<AnimationError>,
    warnings: &mut Vec<AnimationError>,
) -> Ast {
    let mut context = AstBuilderContext::new(driver, errors);
    let ast = visit(metadata, &mut context);
    context.flush_warnings(warnings);
    ast
}

/// 构建触发器的 AST
pub fn build_trigger_ast(
    driver: Option<&dyn AnimationDriver>,
    metadata: &TriggerMetadata,
    errors: &mut Vec<AnimationError>,
    warnings: &mut Vec<AnimationError>,
) -> TriggerAst {
    let mut context = AstBuilderContext::new(driver, errors);
    if metadata.name.starts_with('@') {
        context.errors.push(AnimationError::InvalidTriggerName {
            name: metadata.name.clone(),
        });
    }

    let mut states = Vec::new();
    let mut transitions = Vec::new();
    let mut query_count = 0;
    let mut dep_count = 0;

    for definition in &metadata.definitions {
        match definition {
            TriggerDefinition::State(state) => {
                for name in state.name.split(',').map(str::trim) {
                    states.push(visit_state(name, state, &mut context));
                }
            }
            TriggerDefinition::Transition(transition) => {
                context.query_count = 0;
                context.dep_count = 0;
                let ast = visit_transition(transition, &mut context);
                query_count += ast.query_count;
                dep_count += ast.dep_count;
                transitions.push(ast);
            }
        }
    }

    context.flush_warnings(warnings);
    TriggerAst {
        name: metadata.name.clone(),
        states,
        transitions,
        query_count,
        dep_count,
    }
}

fn visit_state(name: &str, metadata: &StateMetadata, context: &mut AstBuilderContext) -> StateAst {
    let style = visit_style(&metadata.styles, context);
    let default_params = metadata
        .options
        .as_ref()
        .and_then(|o| o.params.clone())
        .unwrap_or_default();

    if style.contains_dynamic_styles {
        let mut missing = BTreeSet::new();
        for entry in &style.styles {
            if let StyleEntry::Map(map) = entry {
                for (_, value) in map.iter() {
                    for param in extract_style_params(value) {
                        if !default_params.contains_key(&param) {
                            missing.insert(param);
                        }
                    }
                }
            }
        }
        if !missing.is_empty() {
            context.errors.push(AnimationError::StateParamsWithoutDefaults {
                state: name.to_string(),
                params: missing.into_iter().collect(),
            });
        }
    }

    StateAst {
        name: name.to_string(),
        style,
        default_params,
    }
}

fn visit_transition(metadata: &TransitionMetadata, context: &mut AstBuilderContext) -> TransitionAst {
    let animation = visit(&metadata.animation, context);
    let matchers = parse_transition_expr(&metadata.expr, context.errors);
    TransitionAst {
        matchers,
        animation,
        options: metadata.options.clone(),
        query_count: context.query_count,
        dep_count: context.dep_count,
    }
}

fn visit(metadata: &AnimationMetadata, context: &mut AstBuilderContext) -> Ast {
    match metadata {
        AnimationMetadata::Sequence(m) => Ast::Sequence(SequenceAst {
            steps: m.steps.iter().map(|s| visit(s, context)).collect(),
            options: m.options.clone(),
        }),
        AnimationMetadata::Group(m) => Ast::Group(GroupAst {
            steps: m.steps.iter().map(|s| visit(s, context)).collect(),
            options: m.options.clone(),
        }),
        AnimationMetadata::Animate(m) => Ast::Animate(visit_animate(m, context)),
        AnimationMetadata::Keyframes(m) => Ast::Keyframes(visit_keyframes(m, context)),
        AnimationMetadata::Style(m) => Ast::Style(visit_style(m, context)),
        AnimationMetadata::Reference(m) => Ast::Reference(visit_reference(m, context)),
        AnimationMetadata::AnimateChild(m) => {
            context.dep_count += 1;
            Ast::AnimateChild(AnimateChildAst {
                options: m.options.clone(),
            })
        }
        AnimationMetadata::AnimateRef(m) => Ast::AnimateRef(AnimateRefAst {
            animation: visit_reference(&m.animation, context),
            options: m.options.clone(),
        }),
        AnimationMetadata::Query(m) => Ast::Query(visit_query(m, context)),
        AnimationMetadata::Stagger(m) => Ast::Stagger(visit_stagger(m, context)),
    }
}

fn visit_reference(metadata: &ReferenceMetadata, context: &mut AstBuilderContext) -> ReferenceAst {
    context.dep_count += 1;
    ReferenceAst {
        animation: Box::new(visit(&metadata.animation, context)),
        options: metadata.options.clone(),
    }
}

fn construct_timing_ast(value: &TimingValue, errors: &mut Vec<AnimationError>) -> TimingAst {
    match value {
        TimingValue::Millis(_) => {
            let duration = resolve_timing(value, errors, false).duration;
            TimingAst::Static(Timing::new(duration, 0.0, None))
        }
        TimingValue::Expr(expr) if value.is_dynamic() => TimingAst::Dynamic(expr.clone()),
        TimingValue::Expr(_) => TimingAst::Static(resolve_timing(value, errors, false)),
    }
}

fn visit_animate(metadata: &AnimateMetadata, context: &mut AstBuilderContext) -> AnimateAst {
    let timings = construct_timing_ast(&metadata.timings, context.errors);
    context.in_animate = true;

    let style = match &metadata.styles {
        Some(AnimateTarget::Keyframes(keyframes)) => {
            AnimateStyleAst::Keyframes(visit_keyframes(keyframes, context))
        }
        Some(AnimateTarget::Style(style)) => AnimateStyleAst::Style(visit_style(style, context)),
        None => {
            // 空步骤：只携带 easing，动画到目标状态
            let mut styles = crate::style::StyleMap::new();
            if let TimingAst::Static(Timing {
                easing: Some(easing),
                ..
            }) = &timings
            {
                styles.insert(EASING_PROP, easing.as_str());
            }
            let mut ast = visit_style(&style(styles), context);
            ast.is_empty_step = true;
            AnimateStyleAst::Style(ast)
        }
    };

    context.in_animate = false;
    AnimateAst { timings, style }
}

fn make_style_ast(metadata: &StyleMetadata) -> StyleAst {
    let mut styles = Vec::with_capacity(metadata.styles.len());
    let mut easing = None;
    let mut contains_dynamic_styles = false;

    for token in &metadata.styles {
        match token {
            StyleToken::Auto => styles.push(StyleEntry::Auto),
            StyleToken::Map(map) => {
                let mut map = map.clone();
                if let Some(value) = map.remove(EASING_PROP) {
                    easing = Some(value.to_string());
                }
                contains_dynamic_styles = contains_dynamic_styles
                    || map.iter().any(|(_, v)| crate::params::contains_params(v));
                styles.push(StyleEntry::Map(map));
            }
        }
    }

    StyleAst {
        styles,
        easing,
        offset: metadata.offset,
        contains_dynamic_styles,
        is_empty_step: false,
    }
}

/// 剔除宿主不支持的样式属性
fn validate_style_ast(ast: &mut StyleAst, context: &mut AstBuilderContext) {
    let Some(driver) = context.driver else {
        return;
    };
    for entry in &mut ast.styles {
        if let StyleEntry::Map(map) = entry {
            let invalid: Vec<String> = map
                .keys()
                .filter(|prop| *prop != OFFSET_PROP && !driver.validate_style_property(prop))
                .map(str::to_string)
                .collect();
            for prop in invalid {
                map.remove(&prop);
                context.unsupported.insert(prop);
            }
        }
    }
}

fn visit_style(metadata: &StyleMetadata, context: &mut AstBuilderContext) -> StyleAst {
    let mut ast = make_style_ast(metadata);
    validate_style_ast(&mut ast, context);
    ast
}

/// 取出并移除样式表中的 `offset`
fn consume_offset(ast: &mut StyleAst) -> Option<f64> {
    let mut offset = None;
    for entry in &mut ast.styles {
        if let StyleEntry::Map(map) = entry
            && let Some(value) = map.remove(OFFSET_PROP)
        {
            offset = match value {
                StyleValue::Number(n) => Some(n),
                StyleValue::Text(s) => s.trim().parse::<f64>().ok(),
            };
        }
    }
    offset
}

fn visit_keyframes(metadata: &KeyframesMetadata, context: &mut AstBuilderContext) -> KeyframesAst {
    if !context.in_animate {
        context.errors.push(AnimationError::KeyframesOutsideAnimate);
        return KeyframesAst { styles: Vec::new() };
    }

    let mut with_offsets = 0;
    let mut out_of_range = false;
    let mut out_of_order = false;
    let mut previous_offset = 0.0;
    let mut offsets = Vec::with_capacity(metadata.steps.len());
    let mut keyframes = Vec::with_capacity(metadata.steps.len());

    for step in &metadata.steps {
        let mut style = make_style_ast(step);
        let explicit = match style.offset {
            Some(offset) => {
                consume_offset(&mut style);
                Some(offset)
            }
            None => consume_offset(&mut style),
        };
        let mut offset = 0.0;
        if let Some(value) = explicit {
            with_offsets += 1;
            offset = value;
        }
        out_of_range = out_of_range || !(0.0..=1.0).contains(&offset);
        if offset < previous_offset {
            out_of_order = true;
            offset = previous_offset;
        }
        previous_offset = offset;
        offsets.push(offset);
        keyframes.push(style);
    }

    if out_of_range {
        context.errors.push(AnimationError::KeyframeOffsetOutOfRange);
    }
    if out_of_order {
        context.errors.push(AnimationError::KeyframeOffsetsOutOfOrder);
    }

    let length = metadata.steps.len();
    let generate = with_offsets == 0;
    if with_offsets > 0 && with_offsets < length {
        context.errors.push(AnimationError::KeyframesMissingOffsets);
    }

    let limit = length.saturating_sub(1);
    let mut styles = Vec::with_capacity(length);
    for (i, mut keyframe) in keyframes.into_iter().enumerate() {
        let offset = if generate {
            if i == limit {
                1.0
            } else {
                i as f64 / limit as f64
            }
        } else {
            offsets[i]
        };
        validate_style_ast(&mut keyframe, context);
        keyframe.offset = Some(offset);
        styles.push(keyframe);
    }

    KeyframesAst { styles }
}

fn visit_query(metadata: &QueryMetadata, context: &mut AstBuilderContext) -> QueryAst {
    let options = metadata.options.clone().unwrap_or_default();
    context.query_count += 1;
    let (selector, include_self) = normalize_selector(&metadata.selector);

    let previous = std::mem::replace(&mut context.in_query, true);
    let animation = visit(&metadata.animation, context);
    context.in_query = previous;

    QueryAst {
        selector,
        original_selector: metadata.selector.clone(),
        limit: options.limit,
        optional: options.optional,
        include_self,
        animation: Box::new(animation),
        options: metadata.options.as_ref().map(|o| o.base.clone()),
    }
}

fn visit_stagger(metadata: &StaggerMetadata, context: &mut AstBuilderContext) -> StaggerAst {
    if !context.in_query {
        context.errors.push(AnimationError::StaggerOutsideQuery);
    }
    let full = matches!(&metadata.timings, TimingValue::Expr(s) if s == "full");
    let timings = if full {
        Timing::new(0.0, 0.0, Some("full"))
    } else {
        resolve_timing(&metadata.timings, context.errors, true)
    };
    StaggerAst {
        timings,
        full,
        animation: Box::new(visit(&metadata.animation, context)),
    }
}

/// 规范化选择器，返回 (选择器, 是否包含自身)
///
/// - `:self` 移除并标记包含自身
/// - `@*` → `.ng-trigger`，`@name` → `.ng-trigger-name`
/// - `:animating` → `.ng-animating`
///
/// `:enter` / `:leave` 在构建时间轴时才替换为对应类名。
pub fn normalize_selector(selector: &str) -> (String, bool) {
    let parts: Vec<&str> = selector.split(',').map(str::trim).collect();
    let include_self = parts.contains(&SELF_TOKEN);
    let joined = if include_self {
        parts
            .into_iter()
            .filter(|p| *p != SELF_TOKEN && !p.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        selector.to_string()
    };

    let mut out = String::with_capacity(joined.len() + 16);
    let mut chars = joined.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '@' {
            out.push(c);
            continue;
        }
        if chars.peek().map(|(_, n)| *n) == Some('*') {
            chars.next();
            out.push_str(NG_TRIGGER_SELECTOR);
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, n)) = chars.peek() {
            if n.is_ascii_alphanumeric() || n == '_' {
                name.push(n);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('@');
        } else {
            out.push_str(NG_TRIGGER_SELECTOR);
            out.push('-');
            out.push_str(&name);
        }
    }

    (out.replace(":animating", NG_ANIMATING_SELECTOR), include_self)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::StyleMap;

    fn build(metadata: AnimationMetadata) -> (Ast, Vec<AnimationError>) {
        let mut errors = vec![];
        let mut warnings = vec![];
        let ast = build_animation_ast(None, &metadata, &mut errors, &mut warnings);
        (ast, errors)
    }

    fn keyframe_offsets(ast: &Ast) -> Vec<Option<f64>> {
        let Ast::Animate(animate) = ast else {
            panic!("expected animate");
        };
        let AnimateStyleAst::Keyframes(kf) = &animate.style else {
            panic!("expected keyframes");
        };
        kf.styles.iter().map(|s| s.offset).collect()
    }

    #[test]
    fn test_selector_normalization() {
        assert_eq!(normalize_selector(":self, .item"), (".item".to_string(), true));
        assert_eq!(normalize_selector("@child"), (".ng-trigger-child".to_string(), false));
        assert_eq!(normalize_selector("@*"), (".ng-trigger".to_string(), false));
        assert_eq!(
            normalize_selector(".list :animating"),
            (".list .ng-animating".to_string(), false)
        );
        assert_eq!(normalize_selector(":enter"), (":enter".to_string(), false));
    }

    #[test]
    fn test_keyframe_offsets_are_generated() {
        let (ast, errors) = build(animate(
            "1s",
            keyframes(vec![
                style(StyleMap::new().with("opacity", 0)),
                style(StyleMap::new().with("opacity", 0.5)),
                style(StyleMap::new().with("opacity", 1)),
            ]),
        ));
        assert!(errors.is_empty());
        assert_eq!(keyframe_offsets(&ast), vec![Some(0.0), Some(0.5), Some(1.0)]);
    }

    #[test]
    fn test_out_of_order_offsets_are_clamped() {
        let (ast, errors) = build(animate(
            "1s",
            keyframes(vec![
                style(StyleMap::new().with("opacity", 0).with("offset", 0.6)),
                style(StyleMap::new().with("opacity", 1).with("offset", 0.2)),
                style(StyleMap::new().with("opacity", 1).with("offset", 1)),
            ]),
        ));
        assert_eq!(errors, vec![AnimationError::KeyframeOffsetsOutOfOrder]);
        assert_eq!(keyframe_offsets(&ast), vec![Some(0.6), Some(0.6), Some(1.0)]);
    }

    #[test]
    fn test_partial_and_out_of_range_offsets() {
        let (_, errors) = build(animate(
            "1s",
            keyframes(vec![
                style(StyleMap::new().with("opacity", 0).with("offset", 0)),
                style(StyleMap::new().with("opacity", 1)),
            ]),
        ));
        assert_eq!(errors, vec![AnimationError::KeyframesMissingOffsets]);

        let (_, errors) = build(animate(
            "1s",
            keyframes(vec![style(StyleMap::new().with("opacity", 1).with("offset", 1.5))]),
        ));
        assert_eq!(errors, vec![AnimationError::KeyframeOffsetOutOfRange]);
    }

    #[test]
    fn test_keyframes_outside_animate() {
        let (_, errors) = build(keyframes(vec![style(StyleMap::new().with("opacity", 1))]).into());
        assert_eq!(errors, vec![AnimationError::KeyframesOutsideAnimate]);
    }

    #[test]
    fn test_stagger_requires_query() {
        let (_, errors) = build(stagger(100, animate_timing("1s")));
        assert_eq!(errors, vec![AnimationError::StaggerOutsideQuery]);

        let (_, errors) = build(query(".item", stagger("-100ms", animate_timing("1s"))));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_easing_extracted_and_dynamic_timings_deferred() {
        let (ast, errors) = build(animate(
            "{{ time }}",
            style(StyleMap::new().with("opacity", 1).with("easing", "ease-out")),
        ));
        assert!(errors.is_empty());
        let Ast::Animate(animate) = ast else {
            panic!("expected animate");
        };
        assert_eq!(animate.timings, TimingAst::Dynamic("{{ time }}".to_string()));
        let AnimateStyleAst::Style(style) = animate.style else {
            panic!("expected style");
        };
        assert_eq!(style.easing.as_deref(), Some("ease-out"));
        assert_eq!(style.styles, vec![StyleEntry::Map(StyleMap::new().with("opacity", 1))]);
    }

    #[test]
    fn test_state_params_need_defaults() {
        let meta = trigger(
            "size",
            vec![state("big", style(StyleMap::new().with("width", "{{ w }}px")))],
        );
        let mut errors = vec![];
        let mut warnings = vec![];
        build_trigger_ast(None, &meta, &mut errors, &mut warnings);
        assert_eq!(
            errors,
            vec![AnimationError::StateParamsWithoutDefaults {
                state: "big".to_string(),
                params: vec!["w".to_string()],
            }]
        );
    }

    #[test]
    fn test_dep_and_query_counts() {
        let meta = trigger(
            "parent",
            vec![transition(
                "* => *",
                group(vec![query("@child", animate_child()), query(".a", animate_timing(100))]),
            )],
        );
        let mut errors = vec![];
        let mut warnings = vec![];
        let ast = build_trigger_ast(None, &meta, &mut errors, &mut warnings);
        assert!(errors.is_empty());
        assert_eq!(ast.query_count, 2);
        assert_eq!(ast.dep_count, 1);
    }

    #[test]
    fn test_comma_separated_states() {
        let meta = trigger(
            "t",
            vec![state("a, b", style(StyleMap::new().with("opacity", 1)))],
        );
        let mut errors = vec![];
        let mut warnings = vec![];
        let ast = build_trigger_ast(None, &meta, &mut errors, &mut warnings);
        let names: Vec<_> = ast.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
