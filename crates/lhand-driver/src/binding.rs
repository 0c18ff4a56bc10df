//! 厂商运动库绑定
//!
//! 厂商库本身不接触硬件：出站字节经 [`FrameSink`] 交给传输层，入站字节由后台泵喂给
//! `decode_canfd` / `decode_pdo`。所有方法取 `&self`，实现需要内部同步，
//! 因为泵线程、运动线程和遥操作线程会并发调用。

use lhand_protocol::{CommMode, ControlMode, JointStatus, VendorError};
use lhand_transport::TransportError;
use std::sync::Arc;

/// 出站帧钩子
///
/// 总线实现立即发送；周期实现只把字节放入下一次交换的输出缓冲。
pub trait FrameSink: Send + Sync {
    fn send(&self, data: &[u8]) -> Result<(), TransportError>;
}

/// 厂商运动库能力
///
/// `joint` 从 1 开始编号；`group` 为 [`ALL_JOINTS`](lhand_protocol::ALL_JOINTS) 时作用于全部关节。
pub trait DeviceBinding: Send + Sync {
    /// 按通信模式初始化
    fn initialize(&self, mode: CommMode) -> Result<(), VendorError>;

    /// 释放库资源
    fn close(&self) -> Result<(), VendorError>;

    /// 注册出站帧钩子
    fn set_send_hook(&self, sink: Arc<dyn FrameSink>) -> Result<(), VendorError>;

    /// 移除出站帧钩子
    fn clear_send_hook(&self);

    /// 解码一帧 CAN-FD 应答数据
    fn decode_canfd(&self, data: &[u8]) -> Result<(), VendorError>;

    /// 解码一次 EtherCAT 输入过程数据
    fn decode_pdo(&self, data: &[u8]) -> Result<(), VendorError>;

    /// 自由度 `(total, active)`
    fn get_dof(&self) -> Result<(u32, u32), VendorError>;

    fn set_control_mode(&self, joint: u8, mode: ControlMode) -> Result<(), VendorError>;

    fn set_enable(&self, joint: u8, enable: bool) -> Result<(), VendorError>;

    fn set_target_position(&self, joint: u8, position: i32) -> Result<(), VendorError>;

    fn set_position_velocity(&self, joint: u8, velocity: i32) -> Result<(), VendorError>;

    /// 角度目标（度）
    fn set_target_angle(&self, joint: u8, angle: f32) -> Result<(), VendorError>;

    /// 角速度（度/秒）
    fn set_angular_velocity(&self, joint: u8, velocity: f32) -> Result<(), VendorError>;

    /// 电流上限（mA）
    fn set_max_current(&self, joint: u8, current: i32) -> Result<(), VendorError>;

    /// 同步触发运动
    fn move_motors(&self, group: u8) -> Result<(), VendorError>;

    fn stop_motors(&self, group: u8) -> Result<(), VendorError>;

    fn home_motors(&self, group: u8) -> Result<(), VendorError>;

    /// 关节当前是否报警
    fn get_alarm(&self, joint: u8) -> Result<bool, VendorError>;

    fn clear_alarm(&self, group: u8) -> Result<(), VendorError>;

    fn get_status(&self, joint: u8) -> Result<JointStatus, VendorError>;
}

/// 每次连接时构造一个新的绑定实例
pub type BindingFactory =
    Arc<dyn Fn() -> Result<Arc<dyn DeviceBinding>, VendorError> + Send + Sync>;
