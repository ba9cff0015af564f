//! 可复用动画（不经过触发器直接编译）

use std::rc::Rc;

use tracing::warn;

use crate::driver::{AnimationDriver, ElementId};
use crate::dsl::{Ast, AnimationMetadata, build_animation_ast};
use crate::error::{AnimationError, AnimationErrors};
use crate::params::AnimationParams;
use crate::style::StyleMap;
use crate::timing::TimingValue;

use super::{ElementInstructionMap, TimelineBuildOptions, TimelineInstruction, build_animation_timelines};

const ENTER_CLASSNAME: &str = "ng-enter";
const LEAVE_CLASSNAME: &str = "ng-leave";

/// 一次校验、多次编译
pub struct Animation {
    driver: Rc<dyn AnimationDriver>,
    ast: Ast,
    warnings: Vec<AnimationError>,
}

impl Animation {
    /// 校验元数据；不支持的属性只产生警告
    pub fn new(driver: Rc<dyn AnimationDriver>, metadata: &AnimationMetadata) -> Result<Self, AnimationErrors> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let ast = build_animation_ast(Some(driver.as_ref()), metadata, &mut errors, &mut warnings);
        if !errors.is_empty() {
            return Err(errors.into());
        }
        if !warnings.is_empty() {
            warn!(warnings = %AnimationErrors::from(warnings.clone()), "动画构建产生警告");
        }
        Ok(Self { driver, ast, warnings })
    }

    pub fn warnings(&self) -> &[AnimationError] {
        &self.warnings
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    /// 以 `element` 为根编译时间轴
    pub fn build_timelines(
        &self,
        element: ElementId,
        starting_styles: &StyleMap,
        final_styles: &StyleMap,
        params: Option<&AnimationParams>,
        delay: Option<&TimingValue>,
        sub_instructions: Option<&ElementInstructionMap>,
    ) -> Result<Vec<TimelineInstruction>, AnimationErrors> {
        let mut errors = Vec::new();
        let options = TimelineBuildOptions {
            enter_class_name: ENTER_CLASSNAME,
            leave_class_name: LEAVE_CLASSNAME,
            starting_styles,
            final_styles,
            params,
            delay,
        };
        let timelines = build_animation_timelines(
            self.driver.as_ref(),
            element,
            &self.ast,
            options,
            sub_instructions,
            &mut errors,
        );
        if errors.is_empty() {
            Ok(timelines)
        } else {
            Err(errors.into())
        }
    }
}
