//! # LHand Protocol
//!
//! 灵巧手通信协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: CAN ID 常量定义
//! - `constants`: 厂商库常量（通信模式、控制模式、关节状态、手型）
//! - `vendor`: 厂商库错误码
//!
//! 帧内容的编解码由厂商电机控制库完成，本 crate 只负责帧的外形（ID、DLC、零填充）。

pub mod constants;
pub mod ids;
pub mod vendor;

pub use constants::*;
pub use ids::*;
pub use vendor::*;

use thiserror::Error;

/// CAN-FD DLC 到数据长度的映射表
pub const DLC_TO_LEN: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// CAN-FD 单帧最大数据长度
pub const CANFD_MAX_LEN: usize = 64;

/// 最大帧长对应的 DLC
pub const CANFD_MAX_DLC: u8 = 15;

/// DLC 转数据长度（越界 DLC 按 64 字节处理）
pub fn dlc_to_len(dlc: u8) -> usize {
    DLC_TO_LEN.get(dlc as usize).copied().unwrap_or(CANFD_MAX_LEN)
}

/// 数据长度转最小可容纳的 DLC
pub fn len_to_dlc(len: usize) -> Option<u8> {
    DLC_TO_LEN.iter().position(|&l| l >= len).map(|dlc| dlc as u8)
}

/// CAN-FD 帧的统一抽象
///
/// 传输层和厂商库之间的中间类型：
///
/// ```text
/// Vendor binding (FrameSink::send)
///     ↓ CanFdFrame::padded()
/// CanFdFrame (此类型)
///     ↓ BusTransport::transmit()
/// Hardware
/// ```
///
/// # 设计特性
///
/// - **固定 64 字节**：避免堆分配，未使用部分为 0
/// - **Copy**：适合在泵线程与发送钩子之间传递
///
/// # 示例
///
/// ```rust
/// use lhand_protocol::CanFdFrame;
///
/// let frame = CanFdFrame::padded(0x501, &[0x01, 0x06]).unwrap();
/// assert_eq!(frame.dlc, 15);
/// assert_eq!(frame.payload().len(), 64);
/// assert_eq!(&frame.payload()[..2], &[0x01, 0x06]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFdFrame {
    /// CAN ID（11-bit 标准帧）
    pub id: u32,

    /// 帧数据（固定 64 字节）
    pub data: [u8; CANFD_MAX_LEN],

    /// 数据长度代码（0-15）
    pub dlc: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 硬件时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl CanFdFrame {
    /// 创建帧，DLC 取能容纳 `payload` 的最小值
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, ProtocolError> {
        let dlc = len_to_dlc(payload.len()).ok_or(ProtocolError::PayloadTooLong {
            max: CANFD_MAX_LEN,
            actual: payload.len(),
        })?;
        let mut data = [0u8; CANFD_MAX_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            data,
            dlc,
            is_extended: false,
            timestamp_us: 0,
        })
    }

    /// 创建始终使用最大 DLC（64 字节）的帧，尾部零填充
    ///
    /// 手部固件接收端按 64 字节帧解析，发送路径统一走这里。
    pub fn padded(id: u32, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut frame = Self::new(id, payload)?;
        frame.dlc = CANFD_MAX_DLC;
        Ok(frame)
    }

    /// 从原始接收数据构造（接收路径使用，DLC 由硬件给出）
    pub fn from_raw(id: u32, dlc: u8, raw: &[u8]) -> Self {
        let mut data = [0u8; CANFD_MAX_LEN];
        let len = raw.len().min(dlc_to_len(dlc));
        data[..len].copy_from_slice(&raw[..len]);
        Self {
            id,
            data,
            dlc: dlc.min(CANFD_MAX_DLC),
            is_extended: false,
            timestamp_us: 0,
        }
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 有效数据长度
    pub fn len(&self) -> usize {
        dlc_to_len(self.dlc)
    }

    /// 是否无数据
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 获取数据切片（按 DLC 截取）
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len()]
    }
}

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Payload too long: max {max} bytes, got {actual}")]
    PayloadTooLong { max: usize, actual: usize },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: i32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dlc_table_edges() {
        assert_eq!(dlc_to_len(0), 0);
        assert_eq!(dlc_to_len(8), 8);
        assert_eq!(dlc_to_len(9), 12);
        assert_eq!(dlc_to_len(15), 64);
        // 越界 DLC 按最大长度处理
        assert_eq!(dlc_to_len(200), 64);
    }

    #[test]
    fn test_len_to_dlc_rounds_up() {
        assert_eq!(len_to_dlc(0), Some(0));
        assert_eq!(len_to_dlc(8), Some(8));
        assert_eq!(len_to_dlc(9), Some(9));
        assert_eq!(len_to_dlc(13), Some(10));
        assert_eq!(len_to_dlc(64), Some(15));
        assert_eq!(len_to_dlc(65), None);
    }

    #[test]
    fn test_new_uses_minimal_dlc() {
        let frame = CanFdFrame::new(0x123, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();
        assert_eq!(frame.dlc, 10);
        assert_eq!(frame.len(), 12);
        assert_eq!(&frame.payload()[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(&frame.payload()[10..], &[0, 0]);
    }

    #[test]
    fn test_padded_always_max_dlc() {
        let payload = [0x01, 0x06, 0x00, 0x01];
        let frame = CanFdFrame::padded(0x501, &payload).unwrap();
        assert_eq!(frame.dlc, CANFD_MAX_DLC);
        assert_eq!(frame.payload().len(), 64);
        assert_eq!(&frame.payload()[..4], &payload);
        assert!(frame.payload()[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_payload_too_long_rejected() {
        let payload = [0u8; 65];
        let err = CanFdFrame::padded(0x501, &payload).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::PayloadTooLong {
                max: 64,
                actual: 65
            }
        );
    }

    #[test]
    fn test_from_raw_truncates_to_dlc() {
        let raw = [0xAAu8; 64];
        let frame = CanFdFrame::from_raw(0x481, 8, &raw);
        assert_eq!(frame.payload(), &[0xAA; 8]);
        assert_eq!(frame.data[8], 0);
    }
}
