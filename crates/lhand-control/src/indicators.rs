//! GPIO 状态输出与状态灯
//!
//! 指示失败只记录警告，不影响运动控制。

use anyhow::{Context, Result};
use lhand_gpio::{Color, GpioBackend, GpioError, OutputChannel, StatusLight, pins};
use lhand_motion::{MotionObserver, MotionState};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

fn report(what: &str, result: Result<(), GpioError>) {
    if let Err(e) = result {
        warn!("Failed to update {}: {}", what, e);
    }
}

/// 状态输出集合
#[derive(Clone)]
pub struct Indicators {
    ready: OutputChannel,
    running: OutputChannel,
    status: OutputChannel,
    cycle_complete: OutputChannel,
    light: Arc<StatusLight>,
    pulse: Duration,
}

impl Indicators {
    /// 配置全部输出（初始低电平）与 RGB 灯（初始黄色）
    pub fn setup(backend: Arc<dyn GpioBackend>, device_slot: usize, pulse: Duration) -> Result<Self> {
        let cycle_pin = pins::cycle_complete_pin(device_slot)
            .with_context(|| format!("No CYCLE_COMPLETE pin for device slot {}", device_slot))?;
        let indicators = Self {
            ready: OutputChannel::new(backend.clone(), pins::READY_STATUS, false)?,
            running: OutputChannel::new(backend.clone(), pins::RUNNING_STATUS, false)?,
            status: OutputChannel::new(backend.clone(), pins::STATUS_LED, false)?,
            cycle_complete: OutputChannel::new(backend.clone(), cycle_pin, false)?,
            light: Arc::new(StatusLight::new(
                backend,
                [pins::RGB_R, pins::RGB_G, pins::RGB_B],
                StatusLight::DEFAULT_FREQUENCY_HZ,
            )?),
            pulse,
        };
        indicators.light(Color::YELLOW);
        Ok(indicators)
    }

    pub fn light(&self, color: Color) {
        report("status light", self.light.set(color));
    }

    pub fn color(&self) -> Color {
        self.light.color()
    }

    /// 连接成功：STATUS_LED、READY 高，RUNNING 低，绿色
    pub fn connected(&self) {
        report("STATUS_LED", self.status.set_high());
        self.ready();
    }

    /// 就绪：READY 高，RUNNING 低，绿色
    pub fn ready(&self) {
        report("READY_STATUS", self.ready.set_high());
        report("RUNNING_STATUS", self.running.set_low());
        self.light(Color::GREEN);
    }

    /// 运行：RUNNING 高，READY 低，蓝色
    pub fn running(&self) {
        report("RUNNING_STATUS", self.running.set_high());
        report("READY_STATUS", self.ready.set_low());
        self.light(Color::BLUE);
    }

    /// 未连接：全部拉低，黄色
    pub fn disconnected(&self) {
        self.all_low();
        self.light(Color::YELLOW);
    }

    pub fn cycle_complete(&self) {
        report("CYCLE_COMPLETE", self.cycle_complete.pulse(self.pulse));
    }

    pub fn all_low(&self) {
        report("STATUS_LED", self.status.set_low());
        report("READY_STATUS", self.ready.set_low());
        report("RUNNING_STATUS", self.running.set_low());
        report("CYCLE_COMPLETE", self.cycle_complete.set_low());
    }

    /// 退出前熄灭
    pub fn off(&self) {
        self.all_low();
        report("status light", self.light.off());
    }
}

/// 把引擎事件映射到指示输出
pub struct IndicatorObserver {
    indicators: Indicators,
}

impl IndicatorObserver {
    pub fn new(indicators: Indicators) -> Self {
        Self { indicators }
    }
}

impl MotionObserver for IndicatorObserver {
    fn on_state_changed(&self, old: MotionState, new: MotionState) {
        if old.same_kind(&new) {
            return;
        }
        match new {
            MotionState::Ready => self.indicators.ready(),
            MotionState::Idle => self.indicators.disconnected(),
            MotionState::Alarm => self.indicators.light(Color::RED),
            MotionState::Running { .. } | MotionState::GraspSequence { .. } | MotionState::Homing => {
                self.indicators.running()
            },
            MotionState::TeleopActive => {
                self.indicators.ready();
                self.indicators.light(Color::CYAN);
            },
            MotionState::Connecting => {},
        }
    }

    fn on_cycle_complete(&self, _cycle_id: u64, _pass: u64) {
        self.indicators.cycle_complete();
    }

    fn on_alarm(&self) {
        self.indicators.light(Color::RED);
    }
}
