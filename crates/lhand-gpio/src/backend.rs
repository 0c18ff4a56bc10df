//! GPIO 后端抽象

use crate::error::GpioError;
use std::time::Duration;

/// 输入上下拉
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pull {
    Off,
    Up,
    #[default]
    Down,
}

/// 中断触发边沿
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Edge {
    #[default]
    Rising,
    Falling,
    Both,
}

/// GPIO 后端
///
/// 引脚使用 BCM 编号。所有方法都是 `&self`，实现内部自行加锁，
/// 以便不同引脚可以被不同线程并发驱动。
pub trait GpioBackend: Send + Sync {
    /// 配置输入引脚
    fn configure_input(&self, pin: u8, pull: Pull, edge: Edge) -> Result<(), GpioError>;

    /// 配置输出引脚并写入初始电平
    fn configure_output(&self, pin: u8, initial: bool) -> Result<(), GpioError>;

    /// 读取输入电平
    fn read(&self, pin: u8) -> Result<bool, GpioError>;

    /// 写输出电平
    fn write(&self, pin: u8, level: bool) -> Result<(), GpioError>;

    /// 把引脚配置为 PWM 输出（初始占空比 0）
    fn configure_pwm(&self, pins: &[u8], frequency_hz: f64) -> Result<(), GpioError>;

    /// 设置占空比（0..=100）
    fn set_duty(&self, pin: u8, duty: u8) -> Result<(), GpioError>;

    /// 等待输入边沿（中断模式）
    ///
    /// 返回 `Ok(Some(level))` 表示收到边沿，`Ok(None)` 表示超时。
    fn wait_for_edge(&self, pin: u8, timeout: Duration) -> Result<Option<bool>, GpioError> {
        let _ = (pin, timeout);
        Err(GpioError::Unsupported("wait_for_edge"))
    }

    /// 所有输出拉低并释放引脚
    fn release(&self);
}
