//! 运动层错误类型定义

use lhand_protocol::VendorError;
use thiserror::Error;

/// 运动错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MotionError {
    /// 没有活动会话
    #[error("Device not connected")]
    NotConnected,

    /// 目标数量与主动自由度不一致
    #[error("DOF mismatch: expected {expected} targets, got {actual}")]
    DofMismatch { expected: usize, actual: usize },

    /// 厂商库返回错误码
    #[error("Device fault: {0}")]
    DeviceFault(#[from] VendorError),

    /// 报警未清除，拒绝启动循环
    #[error("Alarm is latched, clear_alarm() is required before starting a cycle")]
    AlarmActive,

    /// 前一个运动生产者未在等待时间内退出
    #[error("Previous motion producer did not stop in time")]
    Busy,

    /// 工作线程创建失败
    #[error("Failed to spawn motion worker: {0}")]
    WorkerSpawn(String),
}
