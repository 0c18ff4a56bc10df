//! 厂商库常量定义
//!
//! 数值与厂商电机控制库的 C 接口保持一致。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 组地址：对所有关节生效
pub const ALL_JOINTS: u8 = 0;

/// 通信模式（传给 `initialize`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommMode {
    /// EtherCAT 周期过程数据
    EtherCat = 0,
    /// CAN-FD 点对点总线
    CanFd = 1,
    /// RS485（本栈不使用）
    Rs485 = 2,
}

impl std::fmt::Display for CommMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommMode::EtherCat => write!(f, "ECAT"),
            CommMode::CanFd => write!(f, "CANFD"),
            CommMode::Rs485 => write!(f, "RS485"),
        }
    }
}

/// 控制模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ControlMode {
    /// 位置模式
    #[default]
    Position = 0,
    /// 速度模式
    Velocity = 1,
    /// 力矩模式
    Torque = 2,
    /// 速度 + 力矩
    VelocityTorque = 3,
    /// 位置 + 力矩
    PositionTorque = 4,
    /// 回零模式
    Home = 5,
}

/// 关节当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum JointStatus {
    #[default]
    Stopped = 0,
    Running = 1,
    Alarm = 2,
    PositiveLimit = 3,
    NegativeLimit = 4,
    BothLimit = 5,
    EmergencyStop = 6,
    Homing = 7,
}

/// 手型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum HandType {
    /// 6 自由度
    #[default]
    Dof6 = 6,
    /// 6 自由度（S 型）
    Dof6S = 7,
    /// 15 自由度
    Dof15 = 15,
}

/// 左右手
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum HandSide {
    #[default]
    Right = 0,
    Left = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_mode_values() {
        assert_eq!(u8::from(CommMode::EtherCat), 0);
        assert_eq!(u8::from(CommMode::CanFd), 1);
        assert_eq!(CommMode::try_from(1u8).unwrap(), CommMode::CanFd);
        assert!(CommMode::try_from(9u8).is_err());
    }

    #[test]
    fn test_joint_status_from_raw() {
        assert_eq!(JointStatus::try_from(2u8).unwrap(), JointStatus::Alarm);
        assert_eq!(JointStatus::try_from(7u8).unwrap(), JointStatus::Homing);
    }
}
