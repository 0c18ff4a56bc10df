//! 厂商库错误码
//!
//! 厂商库所有调用返回整型错误码，`0` 表示成功。

use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

/// 厂商库错误码（LER_*）
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum VendorErrorCode {
    None = 0,
    Parameter = 1,
    KeyFunctionUninit = 2,
    GetConfiguration = 3,
    DataAnomaly = 4,
    CommConnect = 5,
    CommSend = 6,
    CommRecv = 7,
    CommDataFormat = 8,
    InvalidPath = 9,
    LogSaveFail = 10,
    NotHome = 11,
    #[num_enum(default)]
    Unknown = 999,
}

impl VendorErrorCode {
    /// 原始整型错误码
    pub fn raw(&self) -> i32 {
        i32::from(*self)
    }

    /// 可读描述
    pub fn message(&self) -> &'static str {
        match self {
            VendorErrorCode::None => "no error",
            VendorErrorCode::Parameter => "invalid parameter",
            VendorErrorCode::KeyFunctionUninit => "key function not initialized",
            VendorErrorCode::GetConfiguration => "failed to read configuration",
            VendorErrorCode::DataAnomaly => "data anomaly",
            VendorErrorCode::CommConnect => "communication connect error",
            VendorErrorCode::CommSend => "communication send error",
            VendorErrorCode::CommRecv => "communication receive error",
            VendorErrorCode::CommDataFormat => "communication data format error",
            VendorErrorCode::InvalidPath => "invalid file path",
            VendorErrorCode::LogSaveFail => "failed to save log file",
            VendorErrorCode::NotHome => "joint not homed",
            VendorErrorCode::Unknown => "unknown error",
        }
    }
}

/// 厂商库调用失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation}: {} (code {})", .code.message(), .code.raw())]
pub struct VendorError {
    pub code: VendorErrorCode,
    pub operation: &'static str,
}

impl VendorError {
    pub fn new(code: VendorErrorCode, operation: &'static str) -> Self {
        Self { code, operation }
    }
}

/// 检查厂商库返回码
///
/// ```rust
/// use lhand_protocol::{check, VendorErrorCode};
///
/// assert!(check(0, "move").is_ok());
/// let err = check(11, "move").unwrap_err();
/// assert_eq!(err.code, VendorErrorCode::NotHome);
/// ```
pub fn check(code: i32, operation: &'static str) -> Result<(), VendorError> {
    match VendorErrorCode::from(code) {
        VendorErrorCode::None => Ok(()),
        other => Err(VendorError::new(other, operation)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_codes_map_to_unknown() {
        assert_eq!(VendorErrorCode::from(42), VendorErrorCode::Unknown);
        assert_eq!(VendorErrorCode::from(999), VendorErrorCode::Unknown);
    }

    #[test]
    fn test_vendor_error_display() {
        let err = VendorError::new(VendorErrorCode::CommSend, "move_motors");
        let msg = format!("{}", err);
        assert!(msg.contains("move_motors"));
        assert!(msg.contains("communication send error"));
        assert!(msg.contains("code 6"));
    }
}
