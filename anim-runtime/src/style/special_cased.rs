//! 不可动画样式的特殊处理
//!
//! `display`、`position` 无法插值，只能在播放开始/结束时直接写到元素上。
//! 同一元素上的多个动画共享一份“初始样式”备份，存放在
//! [`SpecialCasedStylesRegistry`] 中，最后一个销毁的动画负责恢复。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::driver::{ElementId, RenderSurface};

use super::{StyleMap, erase_styles, set_styles, set_styles_with_backup};

const NON_ANIMATABLE_PROPS: &[&str] = &["display", "position"];

/// 是否为不可动画属性
pub fn is_non_animatable_style(prop: &str) -> bool {
    NON_ANIMATABLE_PROPS.contains(&prop)
}

/// 按元素保存初始样式备份的注册表
#[derive(Debug, Clone, Default)]
pub struct SpecialCasedStylesRegistry {
    initial: Rc<RefCell<HashMap<ElementId, StyleMap>>>,
}

impl SpecialCasedStylesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 元素当前的初始样式备份
    pub fn initial_styles(&self, element: ElementId) -> Option<StyleMap> {
        self.initial.borrow().get(&element).cloned()
    }

    /// 已登记的元素数量
    pub fn len(&self) -> usize {
        self.initial.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.initial.borrow().is_empty()
    }

    fn ensure(&self, element: ElementId) {
        self.initial.borrow_mut().entry(element).or_default();
    }

    fn backup_and_set(&self, surface: &dyn RenderSurface, element: ElementId, styles: &StyleMap) {
        let mut initial = self.initial.borrow_mut();
        let former = initial.entry(element).or_default();
        set_styles_with_backup(surface, element, styles, former);
    }

    fn take(&self, element: ElementId) -> Option<StyleMap> {
        self.initial.borrow_mut().remove(&element)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SpecialCasedState {
    Pending,
    Started,
    Finished,
    Destroyed,
}

/// 一次动画携带的不可动画样式
pub struct SpecialCasedStyles {
    element: ElementId,
    start_styles: Option<StyleMap>,
    end_styles: RefCell<Option<StyleMap>>,
    state: Cell<SpecialCasedState>,
    registry: SpecialCasedStylesRegistry,
    surface: Rc<dyn RenderSurface>,
}

impl SpecialCasedStyles {
    /// 从首尾关键帧中提取不可动画样式；都没有则返回 `None`
    pub fn package(
        element: ElementId,
        keyframes: &[StyleMap],
        registry: &SpecialCasedStylesRegistry,
        surface: Rc<dyn RenderSurface>,
    ) -> Option<Self> {
        let collect = |frame: Option<&StyleMap>| -> Option<StyleMap> {
            let frame = frame?;
            let styles: StyleMap = frame
                .iter()
                .filter(|(prop, _)| is_non_animatable_style(prop))
                .map(|(prop, value)| (prop, value.clone()))
                .collect();
            (!styles.is_empty()).then_some(styles)
        };

        let start_styles = collect(keyframes.first());
        let end_styles = collect(keyframes.last());
        if start_styles.is_none() && end_styles.is_none() {
            return None;
        }

        registry.ensure(element);
        Some(Self {
            element,
            start_styles,
            end_styles: RefCell::new(end_styles),
            state: Cell::new(SpecialCasedState::Pending),
            registry: registry.clone(),
            surface,
        })
    }

    pub fn start(&self) {
        if self.state.get() < SpecialCasedState::Started {
            if let Some(start) = &self.start_styles {
                self.registry
                    .backup_and_set(self.surface.as_ref(), self.element, start);
            }
            self.state.set(SpecialCasedState::Started);
        }
    }

    pub fn finish(&self) {
        self.start();
        if self.state.get() < SpecialCasedState::Finished {
            if let Some(initial) = self.registry.initial_styles(self.element) {
                set_styles(self.surface.as_ref(), self.element, &initial);
            }
            if let Some(end) = self.end_styles.borrow_mut().take() {
                set_styles(self.surface.as_ref(), self.element, &end);
            }
            self.state.set(SpecialCasedState::Finished);
        }
    }

    pub fn destroy(&self) {
        self.finish();
        if self.state.get() < SpecialCasedState::Destroyed {
            let initial = self.registry.take(self.element);
            if let Some(start) = &self.start_styles {
                erase_styles(self.surface.as_ref(), self.element, start);
            }
            if let Some(end) = self.end_styles.borrow_mut().take() {
                erase_styles(self.surface.as_ref(), self.element, &end);
            }
            if let Some(initial) = initial {
                set_styles(self.surface.as_ref(), self.element, &initial);
            }
            self.state.set(SpecialCasedState::Destroyed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::StyleValue;
    use crate::testing::MockDom;

    #[test]
    fn test_package_ignores_animatable_styles() {
        let dom = Rc::new(MockDom::new());
        let el = dom.create_element("div", dom.body());
        let registry = SpecialCasedStylesRegistry::new();
        let frames = vec![StyleMap::new().with("opacity", 0), StyleMap::new().with("opacity", 1)];
        assert!(SpecialCasedStyles::package(el, &frames, &registry, dom).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_lifecycle_restores_initial_styles() {
        let dom = Rc::new(MockDom::new());
        let el = dom.create_element("div", dom.body());
        dom.set_style(el, "display", &StyleValue::from("inline"));
        let registry = SpecialCasedStylesRegistry::new();
        let frames = vec![
            StyleMap::new().with("display", "block"),
            StyleMap::new().with("display", "flex"),
        ];
        let special = SpecialCasedStyles::package(el, &frames, &registry, dom.clone()).unwrap();

        special.start();
        assert_eq!(dom.get_style(el, "display"), Some(StyleValue::from("block")));

        special.finish();
        assert_eq!(dom.get_style(el, "display"), Some(StyleValue::from("flex")));

        special.destroy();
        assert_eq!(dom.get_style(el, "display"), Some(StyleValue::from("inline")));
        assert!(registry.is_empty());
    }
}
