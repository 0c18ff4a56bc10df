//! 运动状态

use std::fmt;

/// 手的运动状态
///
/// 同一时刻只有一个状态；只在引擎锁内修改。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    /// 未连接
    #[default]
    Idle,
    /// 正在建立会话
    Connecting,
    /// 已连接，无运动生产者
    Ready,
    /// 循环运动中
    Running { cycle_id: u64, step_index: usize },
    /// 回零驻留中
    Homing,
    /// 抓握序列中
    GraspSequence { rep_index: u32 },
    /// 遥操作中
    TeleopActive,
    /// 报警已锁存，需要 `clear_alarm()`
    Alarm,
}

impl MotionState {
    /// 是否为运动生产者状态（互斥）
    pub fn is_producer(&self) -> bool {
        matches!(
            self,
            MotionState::Running { .. }
                | MotionState::Homing
                | MotionState::GraspSequence { .. }
                | MotionState::TeleopActive
        )
    }

    /// 是否与另一个状态属于同一种（忽略步骤/重复索引）
    pub fn same_kind(&self, other: &MotionState) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionState::Idle => write!(f, "Idle"),
            MotionState::Connecting => write!(f, "Connecting"),
            MotionState::Ready => write!(f, "Ready"),
            MotionState::Running {
                cycle_id,
                step_index,
            } => write!(f, "Running(cycle={}, step={})", cycle_id, step_index),
            MotionState::Homing => write!(f, "Homing"),
            MotionState::GraspSequence { rep_index } => write!(f, "Grasp(rep={})", rep_index),
            MotionState::TeleopActive => write!(f, "TeleopActive"),
            MotionState::Alarm => write!(f, "Alarm"),
        }
    }
}
