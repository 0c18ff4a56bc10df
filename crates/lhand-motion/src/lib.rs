//! # LHand Motion
//!
//! 运动引擎：手当前在做什么的唯一来源。
//!
//! 运动生产者（循环、回零、抓握、遥操作）同一时刻最多一个。启动新的生产者前，
//! 引擎先协作停止当前生产者，并有界等待它确认。取消只在步骤边界生效，
//! 正在进行的设备调用总是允许完成。

mod engine;
mod error;
mod observer;
mod request;
mod state;

pub use engine::{CycleOutcome, CycleReport, EngineConfig, MotionEngine, TeleopLease};
pub use error::MotionError;
pub use observer::MotionObserver;
pub use request::{AngleRequest, GraspRoutine, MotionCycle, MotionRequest, RepeatCount, ZeroMove};
pub use state::MotionState;
