//! 遥操作错误类型定义

use lhand_motion::MotionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TeleopError {
    /// UDP 端口绑定失败
    #[error("Failed to bind glove socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 数据报不是合法 JSON
    #[error("Malformed glove datagram: {0}")]
    Decode(#[from] serde_json::Error),

    /// 引擎拒绝进入遥操作
    #[error("Motion engine refused teleoperation: {0}")]
    Motion(#[from] MotionError),

    /// 线程创建失败
    #[error("Failed to spawn teleop thread: {0}")]
    Spawn(std::io::Error),
}
