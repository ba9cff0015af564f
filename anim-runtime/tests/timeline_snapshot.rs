//! 编译出的时间轴快照

use std::rc::Rc;

use anim_runtime::dsl::{animate, sequence, style};
use anim_runtime::testing::{MockAnimationDriver, MockDom};
use anim_runtime::{Animation, StyleMap, TimelineInstruction};

/// 每条时间轴一行摘要，随后每个关键帧一行
fn describe(instructions: &[TimelineInstruction]) -> Vec<String> {
    let mut lines = Vec::new();
    for instruction in instructions {
        lines.push(format!(
            "{}ms delay={}ms easing={}",
            instruction.duration,
            instruction.delay,
            instruction.easing.as_deref().unwrap_or("-")
        ));
        for (i, keyframe) in instruction.keyframes.iter().enumerate() {
            let props: Vec<String> = keyframe.iter().map(|(p, v)| format!("{}={}", p, v)).collect();
            lines.push(format!("{}: {}", i, props.join(" ")));
        }
    }
    lines
}

#[test]
fn test_delayed_step_holds_previous_styles() {
    let dom = Rc::new(MockDom::new());
    let driver = Rc::new(MockAnimationDriver::new(dom.clone()));
    let el = dom.create_element("div", dom.body());

    let metadata = sequence(vec![
        style(StyleMap::new().with("opacity", "0")).into(),
        animate("300ms 100ms ease-out", style(StyleMap::new().with("opacity", "1"))),
    ]);
    let animation = Animation::new(driver, &metadata).expect("valid animation");
    let instructions = animation
        .build_timelines(el, &StyleMap::new(), &StyleMap::new(), None, None, None)
        .expect("build");

    assert_eq!(instructions.len(), 1);
    assert_eq!(instructions[0].element, el);
    insta::assert_debug_snapshot!(describe(&instructions), @r#"
    [
        "400ms delay=0ms easing=-",
        "0: opacity=0 offset=0",
        "1: opacity=0 easing=ease-out offset=0.25",
        "2: opacity=1 offset=1",
    ]
    "#);
}
