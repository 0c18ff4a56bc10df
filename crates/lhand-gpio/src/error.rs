//! GPIO 错误类型定义

use thiserror::Error;

/// GPIO 错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GpioError {
    /// 引脚未配置（或配置方向不符）
    #[error("GPIO {0} is not configured")]
    NotConfigured(u8),

    /// 引脚已配置
    #[error("GPIO {0} is already configured")]
    AlreadyConfigured(u8),

    /// 占空比超出 0..=100
    #[error("Duty cycle {0} out of range 0..=100")]
    InvalidDuty(u8),

    /// 后端不支持该操作
    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    /// 监听器已启动，不能再注册
    #[error("Edge monitor already running")]
    AlreadyRunning,

    /// 底层驱动错误
    #[error("GPIO backend error: {0}")]
    Backend(String),
}
