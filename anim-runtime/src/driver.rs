//! # Driver 模块
//!
//! 动画运行时与宿主渲染层之间的边界。
//!
//! 运行时从不直接持有元素树，只通过不透明的 [`ElementId`] 句柄
//! 和 [`AnimationDriver`] 能力接口访问宿主：
//!
//! ```text
//! ┌──────────────┐   query / compute_style / animate   ┌──────────────┐
//! │ anim-runtime │ ──────────────────────────────────▶ │    宿主      │
//! │  (纯逻辑)    │ ◀────────────── players ─────────── │ (DOM/渲染器) │
//! └──────────────┘                                     └──────────────┘
//! ```

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::player::AnimationPlayer;
use crate::style::{StyleMap, StyleValue};

/// 元素句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 带有触发器的元素上挂的类名
pub const NG_TRIGGER_CLASSNAME: &str = "ng-trigger";
pub const NG_TRIGGER_SELECTOR: &str = ".ng-trigger";

/// 正在播放动画的元素上挂的类名
pub const NG_ANIMATING_CLASSNAME: &str = "ng-animating";
pub const NG_ANIMATING_SELECTOR: &str = ".ng-animating";

/// 排队等待 flush 的元素
pub const QUEUED_CLASSNAME: &str = "ng-animate-queued";
pub const QUEUED_SELECTOR: &str = ".ng-animate-queued";

/// 被禁用动画的子树根
pub const DISABLED_CLASSNAME: &str = "ng-animate-disabled";
pub const DISABLED_SELECTOR: &str = ".ng-animate-disabled";

/// 已插入过的元素
pub const STAR_CLASSNAME: &str = "ng-star-inserted";
pub const STAR_SELECTOR: &str = ".ng-star-inserted";

/// 元素样式与类名的读写能力
pub trait RenderSurface {
    /// 读取内联样式
    fn get_style(&self, element: ElementId, property: &str) -> Option<StyleValue>;

    fn set_style(&self, element: ElementId, property: &str, value: &StyleValue);

    fn remove_style(&self, element: ElementId, property: &str);

    fn add_class(&self, element: ElementId, class_name: &str);

    fn remove_class(&self, element: ElementId, class_name: &str);

    fn has_class(&self, element: ElementId, class_name: &str) -> bool;
}

/// 动画驱动
///
/// 宿主实现此接口以提供查询、样式计算与真实播放器。
pub trait AnimationDriver: RenderSurface {
    /// 属性是否为宿主支持的样式属性
    fn validate_style_property(&self, property: &str) -> bool;

    /// `ancestor` 是否包含 `descendant`（包括自身）
    fn contains_element(&self, ancestor: ElementId, descendant: ElementId) -> bool;

    fn get_parent_element(&self, element: ElementId) -> Option<ElementId>;

    /// 元素是否仍挂在文档上
    fn is_connected(&self, element: ElementId) -> bool {
        let _ = element;
        true
    }

    /// 在 `element` 的后代中按选择器查询，按文档顺序返回
    fn query(&self, element: ElementId, selector: &str, multi: bool) -> Vec<ElementId>;

    /// 计算元素当前的样式值
    fn compute_style(
        &self,
        element: ElementId,
        property: &str,
        default_value: Option<&StyleValue>,
    ) -> StyleValue;

    /// 为一条时间轴创建真实播放器
    fn animate(
        &self,
        element: ElementId,
        keyframes: Vec<StyleMap>,
        duration: f64,
        delay: f64,
        easing: Option<&str>,
        previous_players: &[Rc<dyn AnimationPlayer>],
    ) -> Rc<dyn AnimationPlayer>;
}
