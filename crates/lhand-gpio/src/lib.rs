//! # LHand GPIO
//!
//! 按键命令输入、状态输出与 RGB 指示灯。
//!
//! - [`GpioBackend`]：电平读写与 PWM 的最小能力（树莓派用 `rppal`，测试用 [`mock::MockGpio`]）
//! - [`EdgeMonitor`]：轮询或中断两种去抖策略，统一一个接口
//! - [`OutputChannel`]：每引脚互斥的输出，带单次脉冲定时器
//! - [`StatusLight`]：RGB PWM 状态灯
//! - [`pins`]：引脚布局的唯一来源

mod backend;
mod debounce;
mod error;
mod light;
mod monitor;
mod output;
pub mod pins;

#[cfg(all(feature = "raspberry-pi", target_os = "linux"))]
mod rpi;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use backend::{Edge, GpioBackend, Pull};
pub use debounce::{DebounceStrategy, Debouncer};
pub use error::GpioError;
pub use light::{Color, StatusLight};
pub use monitor::{EdgeMonitor, GpioHandler, HandlerResult};
pub use output::OutputChannel;

#[cfg(all(feature = "raspberry-pi", target_os = "linux"))]
pub use rpi::RppalGpio;
