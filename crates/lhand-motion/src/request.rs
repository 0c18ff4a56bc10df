//! 运动请求与序列定义

use std::time::Duration;

/// 单次位置运动
///
/// `positions.len()` 必须等于主动自由度，否则请求被拒绝且没有任何设备调用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionRequest {
    /// 各关节目标位置（关节 1 起）
    pub positions: Vec<i32>,
    /// 位置模式速度
    pub velocity: i32,
    /// 最大电流 (mA)
    pub max_current: i32,
    /// 触发运动后的驻留时间
    pub settle_wait: Duration,
}

impl MotionRequest {
    pub fn new(positions: Vec<i32>, velocity: i32, max_current: i32, settle_wait: Duration) -> Self {
        Self {
            positions,
            velocity,
            max_current,
            settle_wait,
        }
    }

    /// 全关节回零
    pub fn zero(dof: usize, params: &ZeroMove) -> Self {
        Self {
            positions: vec![0; dof],
            velocity: params.velocity,
            max_current: params.max_current,
            settle_wait: params.settle_wait,
        }
    }
}

/// 单次角度运动（遥操作使用）
#[derive(Debug, Clone, PartialEq)]
pub struct AngleRequest {
    /// 各关节目标角度（度）
    pub angles: Vec<f32>,
    /// 角速度
    pub angular_velocity: f32,
    /// 最大电流 (mA)
    pub max_current: i32,
    pub settle_wait: Duration,
}

/// 回零运动参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroMove {
    pub velocity: i32,
    pub max_current: i32,
    pub settle_wait: Duration,
}

impl Default for ZeroMove {
    fn default() -> Self {
        Self {
            velocity: 20000,
            max_current: 1000,
            settle_wait: Duration::from_secs(2),
        }
    }
}

/// 循环次数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    Finite(u32),
    /// 直到被停止
    Unbounded,
}

impl RepeatCount {
    /// 已完成 `passes` 遍后是否结束
    pub fn is_done(&self, passes: u64) -> bool {
        match self {
            RepeatCount::Finite(n) => passes >= u64::from(*n),
            RepeatCount::Unbounded => false,
        }
    }
}

/// 循环运动
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionCycle {
    /// 一遍中的步骤，按顺序执行
    pub steps: Vec<MotionRequest>,
    pub repeat_count: RepeatCount,
    /// 每完成一遍是否发出“循环完成”事件
    pub cycle_complete_pulse: bool,
    /// 所有遍数完成后的收尾位置（取消或报警时不执行）
    pub finish: Option<MotionRequest>,
}

impl MotionCycle {
    pub fn new(steps: Vec<MotionRequest>, repeat_count: RepeatCount) -> Self {
        Self {
            steps,
            repeat_count,
            cycle_complete_pulse: true,
            finish: None,
        }
    }

    pub fn with_finish(mut self, finish: MotionRequest) -> Self {
        self.finish = Some(finish);
        self
    }

    pub fn with_pulse(mut self, pulse: bool) -> Self {
        self.cycle_complete_pulse = pulse;
        self
    }
}

/// 抓握序列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraspRoutine {
    pub steps: Vec<MotionRequest>,
    pub repetitions: u32,
    /// 完成后的回零参数
    pub return_to_zero: ZeroMove,
}
