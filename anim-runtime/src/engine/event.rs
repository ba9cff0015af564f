//! 派发给监听者的动画事件

use std::rc::Rc;

use serde::Serialize;

use crate::driver::ElementId;
use crate::dsl::StateValue;
use crate::player::PlayerPhase;

/// 动画事件
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnimationEvent {
    pub element: ElementId,
    pub trigger_name: String,
    pub from_state: StateValue,
    pub to_state: StateValue,
    /// `start` / `done`
    pub phase_name: String,
    pub total_time: f64,
    /// 动画被禁用时仍会派发事件，此时为 `true`
    pub disabled: bool,
    /// 事件所属 flush 的微任务编号
    #[serde(skip)]
    pub microtask_id: Option<i64>,
}

impl AnimationEvent {
    pub fn new(element: ElementId, trigger_name: &str, from_state: StateValue, to_state: StateValue) -> Self {
        Self {
            element,
            trigger_name: trigger_name.to_string(),
            from_state,
            to_state,
            phase_name: String::new(),
            total_time: 0.0,
            disabled: false,
            microtask_id: None,
        }
    }

    /// 以播放器当前的时长与禁用状态生成某一阶段的事件
    pub(crate) fn for_phase(&self, phase: PlayerPhase, total_time: f64, disabled: bool) -> Self {
        Self {
            phase_name: phase.as_str().to_string(),
            total_time,
            disabled,
            ..self.clone()
        }
    }
}

/// 事件回调
pub type EventCallback = Rc<dyn Fn(AnimationEvent)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_event_copies_identity() {
        let base = AnimationEvent::new(ElementId(4), "fade", "a".into(), "b".into());
        let done = base.for_phase(PlayerPhase::Done, 300.0, true);
        assert_eq!(done.phase_name, "done");
        assert_eq!(done.total_time, 300.0);
        assert!(done.disabled);
        assert_eq!(done.trigger_name, "fade");
        assert_eq!(done.to_state, StateValue::from("b"));
    }
}
