//! 触发器编译与过渡匹配

use std::rc::Rc;

use anim_runtime::dsl::{
    StateValue, TriggerMetadata, animate, animate_timing, build_trigger_ast, state, style, transition, trigger,
};
use anim_runtime::style::NoopStyleNormalizer;
use anim_runtime::{
    AnimationError, AnimationParams, AnimationTrigger, ElementId, StyleMap, StyleValue, TimingValue, build_trigger,
    parse_timing_expression,
};

fn compile(metadata: &TriggerMetadata) -> AnimationTrigger {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let ast = build_trigger_ast(None, metadata, &mut errors, &mut warnings);
    assert!(errors.is_empty(), "{:?}", errors);
    build_trigger(&metadata.name, ast, Rc::new(NoopStyleNormalizer))
}

fn compile_errors(metadata: &TriggerMetadata) -> Vec<AnimationError> {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    build_trigger_ast(None, metadata, &mut errors, &mut warnings);
    errors
}

fn transitions(exprs: &[&str]) -> TriggerMetadata {
    trigger(
        "t",
        exprs
            .iter()
            .map(|expr| transition(*expr, animate_timing(100)))
            .collect(),
    )
}

fn is_fallback(compiled: &AnimationTrigger, from: impl Into<StateValue>, to: impl Into<StateValue>) -> bool {
    compiled
        .match_transition(&from.into(), &to.into(), ElementId(1), &AnimationParams::new())
        .is_fallback()
}

#[test]
fn test_bidirectional_expands_to_two_matchers() {
    let compiled = compile(&transitions(&["open <=> closed", "* <=> *"]));
    let ast = compiled.ast();
    assert_eq!(ast.transitions[0].matchers.len(), 2);
    assert_eq!(ast.transitions[1].matchers.len(), 1);

    let pair = compile(&transitions(&["open <=> closed"]));
    assert!(!is_fallback(&pair, "open", "closed"));
    assert!(!is_fallback(&pair, "closed", "open"));
    assert!(is_fallback(&pair, "open", "open"));
}

#[test]
fn test_first_declared_transition_wins() {
    let compiled = compile(&transitions(&["* => open", "closed => open"]));
    let matched = compiled.match_transition(
        &StateValue::from("closed"),
        &StateValue::from("open"),
        ElementId(1),
        &AnimationParams::new(),
    );
    assert!(Rc::ptr_eq(matched, &compiled.transition_factories()[0]));
}

#[test]
fn test_unmatched_change_uses_fallback() {
    let compiled = compile(&transitions(&["a => b"]));
    assert!(is_fallback(&compiled, "x", "y"));
    assert!(Rc::ptr_eq(
        compiled.match_transition(
            &StateValue::from("x"),
            &StateValue::from("y"),
            ElementId(1),
            &AnimationParams::new()
        ),
        compiled.fallback()
    ));
}

#[test]
fn test_wildcard_matches_void() {
    let compiled = compile(&transitions(&["* => *"]));
    assert!(!is_fallback(&compiled, StateValue::void(), "on"));
    assert!(!is_fallback(&compiled, "on", StateValue::void()));
}

#[test]
fn test_enter_leave_aliases() {
    let enter = compile(&transitions(&[":enter"]));
    assert!(!is_fallback(&enter, StateValue::void(), "shown"));
    assert!(is_fallback(&enter, "a", "b"));

    let leave = compile(&transitions(&[":leave"]));
    assert!(!is_fallback(&leave, "shown", StateValue::void()));
    assert!(is_fallback(&leave, StateValue::void(), "shown"));
}

#[test]
fn test_increment_and_decrement_aliases() {
    let compiled = compile(&transitions(&[":increment"]));
    assert!(!is_fallback(&compiled, "1", "2"));
    assert!(is_fallback(&compiled, "2", "1"));

    let compiled = compile(&transitions(&[":decrement"]));
    assert!(!is_fallback(&compiled, "10", "3"));
}

#[test]
fn test_boolean_values_alias_numeric_states() {
    let compiled = compile(&trigger(
        "toggle",
        vec![
            state("1", style(StyleMap::new().with("height", "100px"))),
            transition("1 => 0", animate_timing(100)),
        ],
    ));
    assert!(!is_fallback(&compiled, true, false));
    assert!(!is_fallback(&compiled, "1", "0"));
    assert!(is_fallback(&compiled, false, true));

    let mut errors = Vec::new();
    let styles = compiled.match_styles(&StateValue::from(true), &AnimationParams::new(), &mut errors);
    assert!(errors.is_empty());
    assert_eq!(styles.get("height"), Some(&StyleValue::from("100px")));
}

#[test]
fn test_unknown_alias_is_reported() {
    let errors = compile_errors(&transitions(&[":sideways"]));
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, AnimationError::UnknownTransitionAlias { alias } if alias == ":sideways"))
    );
}

#[test]
fn test_errors_accumulate_across_definitions() {
    let errors = compile_errors(&trigger(
        "@bad",
        vec![
            transition("nope", animate_timing(100)),
            transition("* => *", animate("later", style(StyleMap::new()))),
        ],
    ));
    assert!(errors.len() >= 3, "{:?}", errors);
    assert!(matches!(errors[0], AnimationError::InvalidTriggerName { .. }));
}

#[test]
fn test_bundled_trigger_files_compile() {
    let fade: TriggerMetadata =
        serde_json::from_str(include_str!("../../triggers/fade.json")).expect("fade.json");
    let compiled = compile(&fade);
    assert_eq!(compiled.ast().transitions.len(), 2);
    assert!(compiled.state_styles("visible").is_some());
    assert!(!is_fallback(&compiled, "visible", StateValue::void()));

    let open_close: Vec<TriggerMetadata> =
        serde_json::from_str(include_str!("../../triggers/open-close.json")).expect("open-close.json");
    let compiled = compile(&open_close[0]);
    let mut errors = Vec::new();
    let open = compiled.match_styles(&StateValue::from("open"), &AnimationParams::new(), &mut errors);
    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(open.get("height"), Some(&StyleValue::from("200px")));
}

#[test]
fn test_timing_expression_snapshot() {
    let parsed = parse_timing_expression(&TimingValue::from("1s 250ms ease-out"));
    assert!(parsed.errors.is_empty());
    insta::assert_debug_snapshot!(parsed.timing, @r#"
    Timing {
        duration: 1000.0,
        delay: 250.0,
        easing: Some(
            "ease-out",
        ),
    }
    "#);
}

#[test]
fn test_invalid_timing_expression() {
    let parsed = parse_timing_expression(&TimingValue::from("1 second"));
    assert!(matches!(
        parsed.errors.as_slice(),
        [AnimationError::InvalidTiming { value }] if value == "1 second"
    ));
    assert_eq!(parsed.timing.duration, 0.0);
}
