//! # Testing 模块
//!
//! 驱动接口的内存实现，用于一致性测试与无宿主环境下的调试。
//!
//! - [`MockDom`]：元素树、类名、内联样式与简化的选择器引擎
//! - [`MockAnimationDriver`]：把每个创建的播放器记录进 [`AnimationLog`]
//! - [`MockAnimationPlayer`]：暴露关键帧、时长、前序样式与快照

mod dom;
mod driver;
mod player;

pub use dom::MockDom;
pub use driver::{AnimationLog, MockAnimationDriver};
pub use player::MockAnimationPlayer;
