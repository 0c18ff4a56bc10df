//! 仿真手
//!
//! [`SimulatedHand`] 实现 [`DeviceBinding`]，不需要厂商库：
//!
//! - 记录每一次调用（[`BindingCall`]），测试可以检查调用顺序
//! - 触发类命令（运动、停止、回零、清报警、使能）经发送钩子写出一条命令记录
//! - `decode_canfd` / `decode_pdo` 解析仿真状态帧 `[0xA5, alarm_lo, alarm_hi, ...]`，更新报警位
//! - 可以注入错误码，或在第 N 次运动后置位报警

use crate::binding::{DeviceBinding, FrameSink};
use lhand_protocol::{
    ALL_JOINTS, CommMode, ControlMode, JointStatus, VendorError, VendorErrorCode,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 仿真状态帧头
pub const STATUS_MAGIC: u8 = 0xA5;

/// 仿真命令记录长度（CAN-FD 会再零填充到 64 字节）
pub const COMMAND_RECORD_LEN: usize = 8;

/// 一次绑定调用
#[derive(Debug, Clone, PartialEq)]
pub enum BindingCall {
    Initialize(CommMode),
    Close,
    GetDof,
    SetControlMode { joint: u8, mode: ControlMode },
    SetEnable { joint: u8, enable: bool },
    SetTargetPosition { joint: u8, position: i32 },
    SetPositionVelocity { joint: u8, velocity: i32 },
    SetTargetAngle { joint: u8, angle: f32 },
    SetAngularVelocity { joint: u8, velocity: f32 },
    SetMaxCurrent { joint: u8, current: i32 },
    MoveMotors(u8),
    StopMotors(u8),
    HomeMotors(u8),
    GetAlarm(u8),
    ClearAlarm(u8),
    GetStatus(u8),
}

impl BindingCall {
    /// 调用名（与注入错误使用的名称一致）
    pub fn name(&self) -> &'static str {
        match self {
            BindingCall::Initialize(_) => "initialize",
            BindingCall::Close => "close",
            BindingCall::GetDof => "get_dof",
            BindingCall::SetControlMode { .. } => "set_control_mode",
            BindingCall::SetEnable { .. } => "set_enable",
            BindingCall::SetTargetPosition { .. } => "set_target_position",
            BindingCall::SetPositionVelocity { .. } => "set_position_velocity",
            BindingCall::SetTargetAngle { .. } => "set_target_angle",
            BindingCall::SetAngularVelocity { .. } => "set_angular_velocity",
            BindingCall::SetMaxCurrent { .. } => "set_max_current",
            BindingCall::MoveMotors(_) => "move_motors",
            BindingCall::StopMotors(_) => "stop_motors",
            BindingCall::HomeMotors(_) => "home_motors",
            BindingCall::GetAlarm(_) => "get_alarm",
            BindingCall::ClearAlarm(_) => "clear_alarm",
            BindingCall::GetStatus(_) => "get_status",
        }
    }

    /// 触发类命令的操作码（其它调用不产生出站数据）
    fn opcode(&self) -> Option<(u8, u8)> {
        match self {
            BindingCall::SetEnable { joint, .. } => Some((0x01, *joint)),
            BindingCall::MoveMotors(group) => Some((0x10, *group)),
            BindingCall::StopMotors(group) => Some((0x11, *group)),
            BindingCall::HomeMotors(group) => Some((0x12, *group)),
            BindingCall::ClearAlarm(group) => Some((0x13, *group)),
            _ => None,
        }
    }
}

#[derive(Default)]
struct SimState {
    initialized: Option<CommMode>,
    hook: Option<Arc<dyn FrameSink>>,
    calls: Vec<BindingCall>,
    failures: HashMap<&'static str, VendorErrorCode>,
    alarm_mask: u16,
    enabled: bool,
    moves: usize,
    alarm_after_moves: Option<(usize, u8)>,
    decoded: usize,
}

/// 仿真手
pub struct SimulatedHand {
    dof: (u32, u32),
    record_len: usize,
    state: Mutex<SimState>,
}

impl SimulatedHand {
    /// 创建仿真手
    ///
    /// # 参数
    /// - `total`: 总自由度
    /// - `active`: 主动自由度
    pub fn new(total: u32, active: u32) -> Self {
        Self {
            dof: (total, active),
            record_len: COMMAND_RECORD_LEN,
            state: Mutex::new(SimState::default()),
        }
    }

    /// 出站命令记录长度（EtherCAT 下需要等于输出过程数据长度）
    pub fn with_record_len(mut self, len: usize) -> Self {
        self.record_len = len.max(2);
        self
    }

    /// 构造仿真状态帧
    pub fn status_frame(alarm_mask: u16) -> Vec<u8> {
        let [lo, hi] = alarm_mask.to_le_bytes();
        vec![STATUS_MAGIC, lo, hi]
    }

    /// 之后对 `operation` 的调用返回 `code`
    pub fn fail_on(&self, operation: &'static str, code: VendorErrorCode) {
        self.state.lock().failures.insert(operation, code);
    }

    /// 取消所有注入的错误
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// 直接置位/清除关节报警
    pub fn set_alarm(&self, joint: u8, alarm: bool) {
        let mut state = self.state.lock();
        set_alarm_bit(&mut state.alarm_mask, joint, alarm);
    }

    /// 第 `moves` 次 `move_motors` 完成后置位 `joint` 的报警
    pub fn alarm_after_moves(&self, moves: usize, joint: u8) {
        self.state.lock().alarm_after_moves = Some((moves, joint));
    }

    /// 调用历史
    pub fn calls(&self) -> Vec<BindingCall> {
        self.state.lock().calls.clone()
    }

    /// 清空调用历史
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// 某一类调用的次数
    pub fn count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.name() == operation)
            .count()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized.is_some()
    }

    pub fn has_send_hook(&self) -> bool {
        self.state.lock().hook.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// 已解码的状态帧数量
    pub fn decoded_frames(&self) -> usize {
        self.state.lock().decoded
    }

    /// 记录调用并检查注入错误
    fn record(&self, call: BindingCall) -> Result<(), VendorError> {
        let operation = call.name();
        let opcode = call.opcode();
        let hook = {
            let mut state = self.state.lock();
            state.calls.push(call);
            if let Some(code) = state.failures.get(operation) {
                return Err(VendorError::new(*code, operation));
            }
            state.hook.clone()
        };

        // 不持锁调用钩子
        if let (Some((op, target)), Some(hook)) = (opcode, hook) {
            let mut record = vec![0u8; self.record_len];
            record[0] = op;
            record[1] = target;
            if let Err(e) = hook.send(&record) {
                warn!("Simulated hand failed to send command 0x{:02X}: {}", op, e);
                return Err(VendorError::new(VendorErrorCode::CommSend, operation));
            }
        }
        Ok(())
    }

    fn check_joint(&self, joint: u8, operation: &'static str) -> Result<(), VendorError> {
        if joint == ALL_JOINTS || u32::from(joint) <= self.dof.0 {
            Ok(())
        } else {
            Err(VendorError::new(VendorErrorCode::Parameter, operation))
        }
    }

    fn apply_status(&self, data: &[u8]) -> Result<(), VendorError> {
        match data {
            [STATUS_MAGIC, lo, hi, ..] => {
                let mut state = self.state.lock();
                state.alarm_mask = u16::from_le_bytes([*lo, *hi]);
                state.decoded += 1;
                Ok(())
            },
            [] | [0, ..] => Ok(()),
            _ => Err(VendorError::new(VendorErrorCode::CommDataFormat, "decode")),
        }
    }
}

fn set_alarm_bit(mask: &mut u16, joint: u8, alarm: bool) {
    if joint == 0 || joint > 16 {
        return;
    }
    let bit = 1u16 << (joint - 1);
    if alarm {
        *mask |= bit;
    } else {
        *mask &= !bit;
    }
}

impl DeviceBinding for SimulatedHand {
    fn initialize(&self, mode: CommMode) -> Result<(), VendorError> {
        self.record(BindingCall::Initialize(mode))?;
        self.state.lock().initialized = Some(mode);
        debug!("Simulated hand initialized in {} mode", mode);
        Ok(())
    }

    fn close(&self) -> Result<(), VendorError> {
        self.record(BindingCall::Close)?;
        let mut state = self.state.lock();
        state.initialized = None;
        state.enabled = false;
        Ok(())
    }

    fn set_send_hook(&self, sink: Arc<dyn FrameSink>) -> Result<(), VendorError> {
        self.state.lock().hook = Some(sink);
        Ok(())
    }

    fn clear_send_hook(&self) {
        self.state.lock().hook = None;
    }

    fn decode_canfd(&self, data: &[u8]) -> Result<(), VendorError> {
        self.apply_status(data)
    }

    fn decode_pdo(&self, data: &[u8]) -> Result<(), VendorError> {
        self.apply_status(data)
    }

    fn get_dof(&self) -> Result<(u32, u32), VendorError> {
        self.record(BindingCall::GetDof)?;
        if self.state.lock().initialized.is_none() {
            return Err(VendorError::new(
                VendorErrorCode::KeyFunctionUninit,
                "get_dof",
            ));
        }
        Ok(self.dof)
    }

    fn set_control_mode(&self, joint: u8, mode: ControlMode) -> Result<(), VendorError> {
        self.check_joint(joint, "set_control_mode")?;
        self.record(BindingCall::SetControlMode { joint, mode })
    }

    fn set_enable(&self, joint: u8, enable: bool) -> Result<(), VendorError> {
        self.check_joint(joint, "set_enable")?;
        self.record(BindingCall::SetEnable { joint, enable })?;
        self.state.lock().enabled = enable;
        Ok(())
    }

    fn set_target_position(&self, joint: u8, position: i32) -> Result<(), VendorError> {
        self.check_joint(joint, "set_target_position")?;
        self.record(BindingCall::SetTargetPosition { joint, position })
    }

    fn set_position_velocity(&self, joint: u8, velocity: i32) -> Result<(), VendorError> {
        self.check_joint(joint, "set_position_velocity")?;
        self.record(BindingCall::SetPositionVelocity { joint, velocity })
    }

    fn set_target_angle(&self, joint: u8, angle: f32) -> Result<(), VendorError> {
        self.check_joint(joint, "set_target_angle")?;
        self.record(BindingCall::SetTargetAngle { joint, angle })
    }

    fn set_angular_velocity(&self, joint: u8, velocity: f32) -> Result<(), VendorError> {
        self.check_joint(joint, "set_angular_velocity")?;
        self.record(BindingCall::SetAngularVelocity { joint, velocity })
    }

    fn set_max_current(&self, joint: u8, current: i32) -> Result<(), VendorError> {
        self.check_joint(joint, "set_max_current")?;
        self.record(BindingCall::SetMaxCurrent { joint, current })
    }

    fn move_motors(&self, group: u8) -> Result<(), VendorError> {
        self.record(BindingCall::MoveMotors(group))?;
        let mut state = self.state.lock();
        state.moves += 1;
        if let Some((after, joint)) = state.alarm_after_moves
            && state.moves >= after
        {
            set_alarm_bit(&mut state.alarm_mask, joint, true);
            state.alarm_after_moves = None;
        }
        Ok(())
    }

    fn stop_motors(&self, group: u8) -> Result<(), VendorError> {
        self.record(BindingCall::StopMotors(group))
    }

    fn home_motors(&self, group: u8) -> Result<(), VendorError> {
        self.record(BindingCall::HomeMotors(group))
    }

    fn get_alarm(&self, joint: u8) -> Result<bool, VendorError> {
        self.check_joint(joint, "get_alarm")?;
        self.record(BindingCall::GetAlarm(joint))?;
        let mask = self.state.lock().alarm_mask;
        Ok(joint > 0 && joint <= 16 && mask & (1 << (joint - 1)) != 0)
    }

    fn clear_alarm(&self, group: u8) -> Result<(), VendorError> {
        self.record(BindingCall::ClearAlarm(group))?;
        let mut state = self.state.lock();
        if group == ALL_JOINTS {
            state.alarm_mask = 0;
        } else {
            set_alarm_bit(&mut state.alarm_mask, group, false);
        }
        Ok(())
    }

    fn get_status(&self, joint: u8) -> Result<JointStatus, VendorError> {
        self.check_joint(joint, "get_status")?;
        self.record(BindingCall::GetStatus(joint))?;
        let state = self.state.lock();
        if joint > 0 && joint <= 16 && state.alarm_mask & (1 << (joint - 1)) != 0 {
            Ok(JointStatus::Alarm)
        } else {
            Ok(JointStatus::Stopped)
        }
    }
}
