use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::driver::{AnimationDriver, ElementId, RenderSurface};
use crate::player::AnimationPlayer;
use crate::style::{SpecialCasedStyles, SpecialCasedStylesRegistry, StyleMap, StyleValue};

use super::{MockAnimationPlayer, MockDom};

/// 驱动创建过的播放器（按创建顺序）
///
/// 由测试持有并注入驱动，不同测试之间互不干扰。
#[derive(Clone, Default)]
pub struct AnimationLog {
    players: Rc<RefCell<Vec<Rc<MockAnimationPlayer>>>>,
}

impl AnimationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, player: Rc<MockAnimationPlayer>) {
        self.players.borrow_mut().push(player);
    }

    pub fn players(&self) -> Vec<Rc<MockAnimationPlayer>> {
        self.players.borrow().clone()
    }

    pub fn last(&self) -> Option<Rc<MockAnimationPlayer>> {
        self.players.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.players.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.borrow().is_empty()
    }

    /// 取出全部记录并清空
    pub fn drain(&self) -> Vec<Rc<MockAnimationPlayer>> {
        std::mem::take(&mut *self.players.borrow_mut())
    }
}

/// 基于 [`MockDom`] 的驱动实现
pub struct MockAnimationDriver {
    dom: Rc<MockDom>,
    log: AnimationLog,
    registry: SpecialCasedStylesRegistry,
    rejected_properties: RefCell<BTreeSet<String>>,
}

impl MockAnimationDriver {
    pub fn new(dom: Rc<MockDom>) -> Self {
        Self::with_log(dom, AnimationLog::new())
    }

    pub fn with_log(dom: Rc<MockDom>, log: AnimationLog) -> Self {
        Self {
            dom,
            log,
            registry: SpecialCasedStylesRegistry::new(),
            rejected_properties: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn dom(&self) -> &Rc<MockDom> {
        &self.dom
    }

    pub fn log(&self) -> &AnimationLog {
        &self.log
    }

    pub fn registry(&self) -> &SpecialCasedStylesRegistry {
        &self.registry
    }

    /// 让 `validate_style_property` 拒绝某个属性
    pub fn reject_property(&self, property: &str) {
        self.rejected_properties.borrow_mut().insert(property.to_string());
    }
}

impl RenderSurface for MockAnimationDriver {
    fn get_style(&self, element: ElementId, property: &str) -> Option<StyleValue> {
        self.dom.get_style(element, property)
    }

    fn set_style(&self, element: ElementId, property: &str, value: &StyleValue) {
        self.dom.set_style(element, property, value);
    }

    fn remove_style(&self, element: ElementId, property: &str) {
        self.dom.remove_style(element, property);
    }

    fn add_class(&self, element: ElementId, class_name: &str) {
        self.dom.add_class_name(element, class_name);
    }

    fn remove_class(&self, element: ElementId, class_name: &str) {
        self.dom.remove_class_name(element, class_name);
    }

    fn has_class(&self, element: ElementId, class_name: &str) -> bool {
        self.dom.has_class_name(element, class_name)
    }
}

impl AnimationDriver for MockAnimationDriver {
    fn validate_style_property(&self, property: &str) -> bool {
        !self.rejected_properties.borrow().contains(property)
    }

    fn contains_element(&self, ancestor: ElementId, descendant: ElementId) -> bool {
        self.dom.contains(ancestor, descendant)
    }

    fn get_parent_element(&self, element: ElementId) -> Option<ElementId> {
        self.dom.parent(element)
    }

    fn is_connected(&self, element: ElementId) -> bool {
        self.dom.is_connected(element)
    }

    fn query(&self, element: ElementId, selector: &str, multi: bool) -> Vec<ElementId> {
        let mut results = self.dom.query_selector_all(element, selector);
        if !multi {
            results.truncate(1);
        }
        results
    }

    /// 内联样式，其次是给定的默认值，都没有时为空字符串
    fn compute_style(&self, element: ElementId, property: &str, default_value: Option<&StyleValue>) -> StyleValue {
        self.dom
            .get_style(element, property)
            .or_else(|| default_value.cloned())
            .unwrap_or_default()
    }

    fn animate(
        &self,
        element: ElementId,
        keyframes: Vec<StyleMap>,
        duration: f64,
        delay: f64,
        easing: Option<&str>,
        previous_players: &[Rc<dyn AnimationPlayer>],
    ) -> Rc<dyn AnimationPlayer> {
        let special = SpecialCasedStyles::package(element, &keyframes, &self.registry, self.dom.clone());
        let player = Rc::new(MockAnimationPlayer::new(
            element,
            keyframes,
            duration,
            delay,
            easing,
            previous_players,
            special,
        ));
        self.log.push(player.clone());
        player
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_owned_by_the_test() {
        let dom = Rc::new(MockDom::new());
        let log = AnimationLog::new();
        let driver = MockAnimationDriver::with_log(dom.clone(), log.clone());
        let other = MockAnimationDriver::new(dom.clone());
        let el = dom.create_element("div", dom.body());

        driver.animate(el, vec![], 100.0, 0.0, Some("ease"), &[]);
        assert_eq!(log.len(), 1);
        assert!(other.log().is_empty());

        let player = log.last().expect("logged");
        assert_eq!(player.element, el);
        assert_eq!(player.easing.as_deref(), Some("ease"));
        assert_eq!(log.drain().len(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_compute_style_fallbacks() {
        let dom = Rc::new(MockDom::new());
        let driver = MockAnimationDriver::new(dom.clone());
        let el = dom.create_element("div", dom.body());
        assert_eq!(driver.compute_style(el, "width", None), StyleValue::default());
        assert_eq!(
            driver.compute_style(el, "width", Some(&StyleValue::from("10px"))),
            StyleValue::from("10px")
        );
        dom.set_style(el, "width", &StyleValue::from("20px"));
        assert_eq!(driver.compute_style(el, "width", None), StyleValue::from("20px"));
    }

    #[test]
    fn test_special_cased_styles_follow_player() {
        let dom = Rc::new(MockDom::new());
        let driver = MockAnimationDriver::new(dom.clone());
        let el = dom.create_element("div", dom.body());
        let frames = vec![
            StyleMap::new().with("display", "none").with("offset", 0),
            StyleMap::new().with("display", "block").with("offset", 1),
        ];
        let player = driver.animate(el, frames, 100.0, 0.0, None, &[]);
        player.play();
        assert_eq!(dom.get_style(el, "display"), Some(StyleValue::from("none")));
        player.finish();
        assert_eq!(dom.get_style(el, "display"), Some(StyleValue::from("block")));
        player.destroy();
        assert_eq!(dom.get_style(el, "display"), None);
        assert!(driver.registry().is_empty());
    }
}
