//! # Anim Runtime
//!
//! 声明式元素动画的核心运行时库。
//!
//! ## 架构概述
//!
//! `anim-runtime` 是纯逻辑核心，不持有元素树、不做任何 IO。
//! 它只通过 [`AnimationDriver`] 与宿主通信：
//!
//! ```text
//! 元数据 (DSL)                                  宿主
//!   │ build_trigger_ast()                         ▲
//!   ▼                                             │ animate() / query() / compute_style()
//! AnimationTrigger ── match_transition() ──┐      │
//!                                          ▼      │
//! AnimationEngine ── flush() ──▶ 时间轴指令 ──▶ AnimationDriver ──▶ AnimationPlayer
//! ```
//!
//! ## 核心类型
//!
//! - [`AnimationEngine`]：宿主集成入口（注册、触发、监听、flush）
//! - [`AnimationTrigger`]：编译好的触发器（状态样式 + 过渡工厂）
//! - [`TimelineInstruction`]：交给驱动的一条时间轴
//! - [`AnimationPlayer`]：播放器生命周期契约
//! - [`AnimationError`] / [`EngineError`]：累积式编译错误与引擎前置条件错误
//!
//! ## 使用示例
//!
//! ```ignore
//! use anim_runtime::dsl::*;
//! use anim_runtime::{AnimationEngine, EngineConfig, MicrotaskQueue};
//!
//! let queue = MicrotaskQueue::new();
//! let engine = AnimationEngine::new(driver, normalizer, &queue, EngineConfig::default());
//! engine.register_trigger("cmp", "ns", host, "fade", &trigger("fade", vec![
//!     transition(":enter", animate("300ms ease-in", style(StyleMap::new().with("opacity", 1)))),
//! ]))?;
//!
//! engine.begin();
//! engine.process("ns", element, "fade", "visible")?;
//! engine.end()?; // 最外层 end() 触发 flush
//! queue.run_until_idle();
//! ```
//!
//! ## 模块结构
//!
//! - [`timing`]：时间表达式解析
//! - [`dsl`]：元数据、过渡表达式与 AST 校验
//! - [`trigger`]：触发器与过渡工厂
//! - [`timeline`]：AST → 时间轴指令
//! - [`player`]：播放器状态机与组合播放器
//! - [`engine`]：过渡引擎、时间轴引擎与回调调度
//! - [`testing`]：内存驱动，用于一致性测试

pub mod config;
pub mod driver;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod params;
pub mod player;
pub mod scheduler;
pub mod style;
pub mod testing;
pub mod timeline;
pub mod timing;
pub mod trigger;

// 重导出核心类型
pub use config::{ConfigError, EngineConfig};
pub use driver::{AnimationDriver, ElementId, RenderSurface};
pub use dsl::{StateValue, TriggerValue};
pub use engine::{
    AnimationEngine, AnimationEvent, EventCallback, RenderingDone, TimelineCommand, TransitionAnimationEngine,
};
pub use error::{AnimationError, AnimationErrors, EngineError, EngineResult};
pub use params::AnimationParams;
pub use player::{
    AnimationGroupPlayer, AnimationPlayer, NoopAnimationPlayer, PlayerCallback, PlayerPhase, PlayerState,
};
pub use scheduler::MicrotaskQueue;
pub use style::{StyleMap, StyleNormalizer, StyleValue};
pub use timeline::{Animation, ElementInstructionMap, TimelineInstruction};
pub use timing::{Timing, TimingValue, parse_timing_expression};
pub use trigger::{AnimationTransitionFactory, AnimationTrigger, TransitionInstruction, build_trigger};
