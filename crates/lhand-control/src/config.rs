//! # 控制器配置
//!
//! TOML 文件，所有字段都有默认值，空文件即默认配置。时间字段单位为秒（浮点）。
//!
//! ```toml
//! mode = "canfd"
//! device_index = 0
//!
//! [motion]
//! cycle_count = 100
//! cycle_interval = 0.6
//!
//! [gpio]
//! strategy = "interrupt"
//! device_slot = 1
//!
//! [teleop]
//! hand = "left"
//! ```

use anyhow::{Context, Result, bail, ensure};
use lhand_driver::PumpConfig;
use lhand_gpio::{DebounceStrategy, pins};
use lhand_motion::{
    EngineConfig, GraspRoutine, MotionCycle, MotionRequest, RepeatCount, ZeroMove,
};
use lhand_protocol::{CommMode, DEFAULT_NODE_ID, HandSide};
use lhand_teleop::{BridgeConfig, DEFAULT_BIND};
use lhand_transport::{BusTiming, LinkTimeouts};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 通信模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeSetting {
    #[default]
    Canfd,
    Ecat,
}

impl ModeSetting {
    pub fn comm_mode(self) -> CommMode {
        match self {
            ModeSetting::Canfd => CommMode::CanFd,
            ModeSetting::Ecat => CommMode::EtherCat,
        }
    }
}

/// GPIO 去抖策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategySetting {
    #[default]
    Polling,
    Interrupt,
}

/// 顶层配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandConfig {
    pub mode: ModeSetting,
    /// 显式端点索引；缺省时按 `auto_select` 选择
    pub device_index: Option<usize>,
    pub auto_select: bool,
    /// 启动时自动连接并开始循环
    pub auto_start: bool,
    pub canfd: CanFdSection,
    pub ecat: EcatSection,
    pub motion: MotionSection,
    pub gpio: GpioSection,
    pub teleop: TeleopSection,
}

impl Default for HandConfig {
    fn default() -> Self {
        Self {
            mode: ModeSetting::default(),
            device_index: None,
            auto_select: true,
            auto_start: true,
            canfd: CanFdSection::default(),
            ecat: EcatSection::default(),
            motion: MotionSection::default(),
            gpio: GpioSection::default(),
            teleop: TeleopSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanFdSection {
    pub nominal_bitrate: u32,
    pub data_bitrate: u32,
    pub channel: u8,
    pub node_id: u8,
    /// 只使用这个 SocketCAN 接口
    pub interface: Option<String>,
}

impl Default for CanFdSection {
    fn default() -> Self {
        let timing = BusTiming::default();
        Self {
            nominal_bitrate: timing.nominal_bitrate,
            data_bitrate: timing.data_bitrate,
            channel: 0,
            node_id: DEFAULT_NODE_ID,
            interface: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcatSection {
    pub cycle_period: f64,
    /// 等待 PRE-OP / SAFE-OP 的超时
    pub state_timeout: f64,
    /// 每轮等待 OP 的超时
    pub op_timeout: f64,
    pub op_attempts: u32,
}

impl Default for EcatSection {
    fn default() -> Self {
        Self {
            cycle_period: 0.001,
            state_timeout: 0.05,
            op_timeout: 0.005,
            op_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionSection {
    pub enable_motors: bool,
    /// 使能后的等待
    pub enable_wait: f64,
    pub home_on_connect: bool,
    pub home_wait: f64,
    pub cycle_positions: Vec<Vec<i32>>,
    /// 0 表示无限循环
    pub cycle_count: u32,
    pub cycle_velocity: i32,
    pub cycle_current: i32,
    pub cycle_interval: f64,
    /// 全部循环完成后的收尾姿态
    pub finish_position: Option<Vec<i32>>,
    pub alarm_check: bool,
    pub grasp_positions: Vec<Vec<i32>>,
    pub grasp_repetitions: u32,
    pub grasp_interval: f64,
    pub grasp_velocity: i32,
    pub grasp_current: i32,
    pub stop_return_wait: f64,
    pub exclusive_wait: f64,
}

impl Default for MotionSection {
    fn default() -> Self {
        Self {
            enable_motors: true,
            enable_wait: 1.0,
            home_on_connect: true,
            home_wait: 5.0,
            cycle_positions: vec![
                vec![10000, 10000, 0, 0, 0, 0],
                vec![0; 6],
                vec![0, 0, 10000, 10000, 10000, 10000],
                vec![0; 6],
            ],
            cycle_count: 10000,
            cycle_velocity: 20000,
            cycle_current: 1000,
            cycle_interval: 0.6,
            finish_position: None,
            alarm_check: true,
            grasp_positions: vec![
                vec![5000, 0, 0, 0, 0, 0],
                vec![5000, 0, 10000, 10000, 10000, 10000],
                vec![5000, 10000, 10000, 10000, 10000, 10000],
                vec![5000, 0, 10000, 10000, 10000, 10000],
            ],
            grasp_repetitions: 3,
            grasp_interval: 2.0,
            grasp_velocity: 20000,
            grasp_current: 1000,
            stop_return_wait: 2.0,
            exclusive_wait: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioSection {
    pub enabled: bool,
    pub strategy: StrategySetting,
    pub debounce: f64,
    pub poll_interval: f64,
    /// 循环完成脉冲宽度
    pub pulse: f64,
    /// CYCLE_COMPLETE 引脚槽位（0–3）
    pub device_slot: usize,
}

impl Default for GpioSection {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: StrategySetting::default(),
            debounce: 0.3,
            poll_interval: 0.01,
            pulse: 0.5,
            device_slot: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TeleopSection {
    pub bind: String,
    /// 跟随哪只手（`right` | `left`）
    pub hand: HandSide,
    pub device_prefix: String,
    pub angular_velocity: f32,
    pub max_current: i32,
}

impl Default for TeleopSection {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            bind: DEFAULT_BIND.to_string(),
            hand: bridge.hand,
            device_prefix: bridge.device_prefix,
            angular_velocity: bridge.angular_velocity,
            max_current: bridge.max_current,
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl HandConfig {
    /// 缺省配置文件路径：`<config_dir>/lhand/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lhand").join("config.toml"))
    }

    /// 从文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// 显式路径必须存在；未指定时缺省路径不存在则使用默认配置
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: HandConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查跨字段约束
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("motion.enable_wait", self.motion.enable_wait),
            ("motion.home_wait", self.motion.home_wait),
            ("motion.cycle_interval", self.motion.cycle_interval),
            ("motion.grasp_interval", self.motion.grasp_interval),
            ("motion.stop_return_wait", self.motion.stop_return_wait),
            ("motion.exclusive_wait", self.motion.exclusive_wait),
            ("gpio.debounce", self.gpio.debounce),
            ("gpio.poll_interval", self.gpio.poll_interval),
            ("gpio.pulse", self.gpio.pulse),
            ("ecat.cycle_period", self.ecat.cycle_period),
            ("ecat.state_timeout", self.ecat.state_timeout),
            ("ecat.op_timeout", self.ecat.op_timeout),
        ];
        for (name, value) in durations {
            ensure!(
                value.is_finite() && value >= 0.0,
                "{} must be a non-negative number of seconds, got {}",
                name,
                value
            );
        }

        ensure!(
            !self.motion.cycle_positions.is_empty(),
            "motion.cycle_positions must not be empty"
        );
        ensure!(
            !self.motion.grasp_positions.is_empty(),
            "motion.grasp_positions must not be empty"
        );
        let width = self.motion.cycle_positions[0].len();
        let steps = self
            .motion
            .cycle_positions
            .iter()
            .chain(self.motion.grasp_positions.iter())
            .chain(self.motion.finish_position.iter());
        for step in steps {
            if step.len() != width {
                bail!(
                    "All motion positions must have {} entries, found one with {}",
                    width,
                    step.len()
                );
            }
        }

        if pins::cycle_complete_pin(self.gpio.device_slot).is_none() {
            bail!(
                "gpio.device_slot must be in 0..{}, got {}",
                pins::CYCLE_COMPLETE.len(),
                self.gpio.device_slot
            );
        }
        Ok(())
    }

    // ============================================================
    // 转换为各层的配置
    // ============================================================

    pub fn bus_timing(&self) -> BusTiming {
        BusTiming {
            nominal_bitrate: self.canfd.nominal_bitrate,
            data_bitrate: self.canfd.data_bitrate,
        }
    }

    pub fn link_timeouts(&self) -> LinkTimeouts {
        LinkTimeouts {
            state_check: secs(self.ecat.state_timeout),
            op_check: secs(self.ecat.op_timeout),
            op_attempts: self.ecat.op_attempts,
            ..LinkTimeouts::default()
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig {
            cycle_period: secs(self.ecat.cycle_period),
            ..PumpConfig::default()
        }
    }

    pub fn enable_wait(&self) -> Duration {
        secs(self.motion.enable_wait)
    }

    pub fn home_wait(&self) -> Duration {
        secs(self.motion.home_wait)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            alarm_check: self.motion.alarm_check,
            exclusive_wait: secs(self.motion.exclusive_wait),
            return_to_zero: self.zero_move(),
            ..EngineConfig::default()
        }
    }

    fn zero_move(&self) -> ZeroMove {
        ZeroMove {
            settle_wait: secs(self.motion.stop_return_wait),
            ..ZeroMove::default()
        }
    }

    /// 按钮 / 自动启动使用的循环
    pub fn motion_cycle(&self) -> MotionCycle {
        let motion = &self.motion;
        let interval = secs(motion.cycle_interval);
        let step = |positions: &Vec<i32>| {
            MotionRequest::new(
                positions.clone(),
                motion.cycle_velocity,
                motion.cycle_current,
                interval,
            )
        };
        let repeat = match motion.cycle_count {
            0 => RepeatCount::Unbounded,
            n => RepeatCount::Finite(n),
        };
        let cycle = MotionCycle::new(motion.cycle_positions.iter().map(step).collect(), repeat);
        match &motion.finish_position {
            Some(finish) => cycle.with_finish(step(finish)),
            None => cycle,
        }
    }

    pub fn grasp_routine(&self) -> GraspRoutine {
        let motion = &self.motion;
        let interval = secs(motion.grasp_interval);
        GraspRoutine {
            steps: motion
                .grasp_positions
                .iter()
                .map(|positions| {
                    MotionRequest::new(
                        positions.clone(),
                        motion.grasp_velocity,
                        motion.grasp_current,
                        interval,
                    )
                })
                .collect(),
            repetitions: motion.grasp_repetitions,
            return_to_zero: self.zero_move(),
        }
    }

    pub fn debounce_strategy(&self) -> DebounceStrategy {
        match self.gpio.strategy {
            StrategySetting::Polling => DebounceStrategy::Polling {
                interval: secs(self.gpio.poll_interval),
            },
            StrategySetting::Interrupt => DebounceStrategy::Interrupt,
        }
    }

    pub fn debounce(&self) -> Duration {
        secs(self.gpio.debounce)
    }

    pub fn pulse(&self) -> Duration {
        secs(self.gpio.pulse)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            hand: self.teleop.hand,
            device_prefix: self.teleop.device_prefix.clone(),
            angular_velocity: self.teleop.angular_velocity,
            max_current: self.teleop.max_current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_is_default() {
        let config = HandConfig::from_toml("").unwrap();
        assert_eq!(config, HandConfig::default());
        assert_eq!(config.mode.comm_mode(), CommMode::CanFd);
        assert_eq!(config.teleop.bind, "127.0.0.1:7777");
        assert_eq!(config.bus_timing(), BusTiming::default());
    }

    #[test]
    fn test_default_cycle_matches_factory_sequence() {
        let cycle = HandConfig::default().motion_cycle();
        assert_eq!(cycle.steps.len(), 4);
        assert_eq!(cycle.steps[0].positions, vec![10000, 10000, 0, 0, 0, 0]);
        assert_eq!(cycle.steps[2].velocity, 20000);
        assert_eq!(cycle.steps[3].settle_wait, Duration::from_millis(600));
        assert_eq!(cycle.repeat_count, RepeatCount::Finite(10000));
        assert!(cycle.cycle_complete_pulse);
        assert!(cycle.finish.is_none());
    }

    #[test]
    fn test_partial_override() {
        let config = HandConfig::from_toml(
            r#"
            mode = "ecat"
            device_index = 1

            [motion]
            cycle_count = 0
            finish_position = [1, 2, 3, 4, 5, 6]

            [gpio]
            strategy = "interrupt"
            device_slot = 3

            [teleop]
            hand = "left"
            "#,
        )
        .unwrap();

        assert_eq!(config.mode.comm_mode(), CommMode::EtherCat);
        assert_eq!(config.device_index, Some(1));
        assert!(config.auto_select);
        assert_eq!(config.debounce_strategy(), DebounceStrategy::Interrupt);
        assert_eq!(config.bridge_config().hand, HandSide::Left);

        let cycle = config.motion_cycle();
        assert_eq!(cycle.repeat_count, RepeatCount::Unbounded);
        assert_eq!(
            cycle.finish.map(|step| step.positions),
            Some(vec![1, 2, 3, 4, 5, 6])
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(HandConfig::from_toml("[gpio]\ndevice_slot = 4").is_err());
        assert!(HandConfig::from_toml("[motion]\ncycle_interval = -1.0").is_err());
        assert!(HandConfig::from_toml("[motion]\ncycle_positions = [[1, 2], [1]]").is_err());
        assert!(HandConfig::from_toml("mode = \"rs485\"").is_err());
        assert!(HandConfig::from_toml("unknown_key = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[motion]\ngrasp_repetitions = 5\nstop_return_wait = 0.25").unwrap();

        let config = HandConfig::load(file.path()).unwrap();
        assert_eq!(config.motion.grasp_repetitions, 5);
        assert_eq!(
            config.engine_config().return_to_zero.settle_wait,
            Duration::from_millis(250)
        );
        assert_eq!(config.grasp_routine().repetitions, 5);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(HandConfig::load_or_default(Some(&missing)).is_err());
    }
}
