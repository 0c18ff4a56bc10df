//! # LHand Transport Layer
//!
//! 传输硬件抽象层。灵巧手在一次会话中只使用两种传输之一：
//!
//! - **总线传输**（[`BusTransport`]）：CAN-FD 点对点，发送即时生效，接收靠轮询
//! - **周期传输**（[`CyclicTransport`]）：EtherCAT 过程数据，输出在下一次周期交换时写出
//!
//! 两种传输共用同一套端点选择策略（[`select::select_endpoint`]）。

use lhand_protocol::{CanFdFrame, ProtocolError};
use std::time::Duration;
use thiserror::Error;

pub mod ecat;
pub mod iface;
pub mod select;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use ecat::{LinkState, LinkTimeouts, bring_up};
pub use iface::{NetInterface, filter_physical, is_physical_interface};
pub use select::{NonInteractive, OperatorPrompt, SelectionError, select_endpoint};

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanFd;

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] DeviceError),
    #[error("Protocol Error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive timeout")]
    ReceiveTimeout,
    #[error("Link did not reach {target:?} (reached {reached:?})")]
    LinkState { target: LinkState, reached: LinkState },
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },
    #[error("Transport not open")]
    NotOpen,
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<String> for DeviceError {
    fn from(message: String) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for DeviceError {
    fn from(message: &str) -> Self {
        Self::new(DeviceErrorKind::Unknown, message)
    }
}

/// CAN-FD 通道时序（仲裁段 / 数据段比特率）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    /// 标称比特率（bps）
    pub nominal_bitrate: u32,
    /// 数据段比特率（bps）
    pub data_bitrate: u32,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            nominal_bitrate: 1_000_000,
            data_bitrate: 5_000_000,
        }
    }
}

/// 总线传输（CAN-FD）
///
/// 所有方法取 `&self`：接收泵线程与发送钩子会并发使用同一个适配器，
/// 实现需要自行保证内部同步，且 `receive` 阻塞期间不得阻塞 `transmit`。
pub trait BusTransport: Send + Sync {
    /// 扫描已连接的总线适配器，返回数量
    fn scan(&self) -> Result<usize, TransportError>;

    /// 端点的可读名称（用于日志和交互选择）
    fn endpoint_name(&self, index: usize) -> String {
        format!("CANFD device {}", index)
    }

    /// 打开适配器的指定通道并协商比特率
    ///
    /// 任何阶段失败都必须释放已分配的资源。
    fn open(&self, index: usize, channel: u8, timing: &BusTiming) -> Result<(), TransportError>;

    /// 立即发送一帧
    fn transmit(&self, frame: &CanFdFrame) -> Result<(), TransportError>;

    /// 接收帧（最多阻塞 `timeout`）
    ///
    /// 超时返回 `TransportError::ReceiveTimeout`，属于正常情况。
    fn receive(&self, timeout: Duration) -> Result<Vec<CanFdFrame>, TransportError>;

    /// 关闭适配器（未打开时为空操作）
    fn close(&self) -> Result<(), TransportError>;

    /// 是否已打开
    fn is_open(&self) -> bool;
}

/// 周期传输（EtherCAT 过程数据）
///
/// 建立连接后由周期泵线程独占，因此方法取 `&mut self`。
pub trait CyclicTransport: Send {
    /// 扫描网口（未过滤）
    fn scan_interfaces(&mut self) -> Result<Vec<NetInterface>, TransportError>;

    /// 在指定网口上打开主站并发现从站，返回从站数量
    fn open(&mut self, interface: &str) -> Result<usize, TransportError>;

    /// 请求所有从站进入目标状态
    fn request_state(&mut self, state: LinkState) -> Result<(), TransportError>;

    /// 等待所有从站达到 `expected`（最多 `timeout`），返回当前最低状态
    fn check_state(
        &mut self,
        expected: LinkState,
        timeout: Duration,
    ) -> Result<LinkState, TransportError>;

    /// 一次周期交换：写出输出缓冲，读回输入缓冲
    fn exchange(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// 输入过程数据总长度（字节）
    fn input_size(&self) -> usize;

    /// 输出过程数据总长度（字节）
    fn output_size(&self) -> usize;

    /// 最近一次交换读回的输入数据
    fn inputs(&self) -> Vec<u8>;

    /// 设置下一次交换写出的输出数据，长度必须等于 `output_size()`
    fn set_outputs(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// 请求从站回到 INIT 并关闭主站
    fn close(&mut self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::BufferSize {
            expected: 32,
            actual: 16,
        };
        assert_eq!(
            format!("{}", err),
            "Buffer size mismatch: expected 32 bytes, got 16"
        );

        let err = TransportError::LinkState {
            target: LinkState::Operational,
            reached: LinkState::SafeOperational,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Operational") && msg.contains("SafeOperational"));

        let err: TransportError = DeviceError::new(DeviceErrorKind::NotFound, "no adapter").into();
        assert!(format!("{}", err).contains("no adapter"));
    }

    #[test]
    fn test_default_bus_timing() {
        let timing = BusTiming::default();
        assert_eq!(timing.nominal_bitrate, 1_000_000);
        assert_eq!(timing.data_bitrate, 5_000_000);
    }
}
