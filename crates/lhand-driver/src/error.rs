//! 连接错误类型定义

use lhand_protocol::VendorError;
use lhand_transport::{SelectionError, TransportError};
use thiserror::Error;

/// 建立会话失败
///
/// 返回此错误时，已分配的传输、泵线程和绑定都已释放。
#[derive(Error, Debug)]
pub enum ConnectError {
    /// 未找到可用设备
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// 打开设备或初始化失败
    #[error("Device initialization failed: {0}")]
    DeviceInit(String),

    /// EtherCAT 链路未进入 OPERATIONAL
    #[error("Link not operational: {0}")]
    LinkNotOperational(TransportError),

    /// 端点选择无效
    #[error("Invalid endpoint selection: {0}")]
    InvalidSelection(SelectionError),

    /// 厂商库调用失败
    #[error("Device binding error: {0}")]
    Binding(#[from] VendorError),
}

impl From<SelectionError> for ConnectError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::NoEndpoints => ConnectError::DeviceNotFound(err.to_string()),
            other => ConnectError::InvalidSelection(other),
        }
    }
}
