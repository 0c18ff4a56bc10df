//! 内存 GPIO 后端
//!
//! 输入电平由测试设置，输出写入与占空比全部记录。改变输入电平时按配置的边沿
//! 向中断队列投递通知。

use crate::backend::{Edge, GpioBackend, Pull};
use crate::error::GpioError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct MockInput {
    pull: Pull,
    edge: Edge,
    level: bool,
    edges: VecDeque<bool>,
}

#[derive(Debug, Default)]
struct MockState {
    inputs: HashMap<u8, MockInput>,
    outputs: HashMap<u8, bool>,
    duties: HashMap<u8, u8>,
    pwm_frequency: Option<f64>,
    writes: Vec<(u8, bool)>,
    reads: usize,
    released: bool,
}

/// 内存 GPIO
#[derive(Debug, Default)]
pub struct MockGpio {
    state: Mutex<MockState>,
    edge_ready: Condvar,
}

impl MockGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置输入电平；电平变化且匹配配置的边沿时投递中断通知
    pub fn set_input(&self, pin: u8, level: bool) {
        let mut state = self.state.lock();
        let Some(input) = state.inputs.get_mut(&pin) else {
            return;
        };
        if input.level == level {
            return;
        }
        input.level = level;
        let matches = match input.edge {
            Edge::Rising => level,
            Edge::Falling => !level,
            Edge::Both => true,
        };
        if matches {
            input.edges.push_back(level);
            self.edge_ready.notify_all();
        }
    }

    /// 直接投递一次边沿通知（模拟抖动），不改变电平
    pub fn inject_edge(&self, pin: u8, level: bool) {
        let mut state = self.state.lock();
        if let Some(input) = state.inputs.get_mut(&pin) {
            input.edges.push_back(level);
            self.edge_ready.notify_all();
        }
    }

    /// 输出引脚当前电平
    pub fn output(&self, pin: u8) -> Option<bool> {
        self.state.lock().outputs.get(&pin).copied()
    }

    /// 全部输出写入（含配置时的初始电平）
    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.state.lock().writes.clone()
    }

    pub fn writes_for(&self, pin: u8) -> Vec<bool> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(p, _)| *p == pin)
            .map(|(_, level)| *level)
            .collect()
    }

    pub fn duty(&self, pin: u8) -> Option<u8> {
        self.state.lock().duties.get(&pin).copied()
    }

    pub fn pwm_frequency(&self) -> Option<f64> {
        self.state.lock().pwm_frequency
    }

    pub fn input_config(&self, pin: u8) -> Option<(Pull, Edge)> {
        self.state
            .lock()
            .inputs
            .get(&pin)
            .map(|input| (input.pull, input.edge))
    }

    /// 输入读取次数
    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

impl GpioBackend for MockGpio {
    fn configure_input(&self, pin: u8, pull: Pull, edge: Edge) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if state.inputs.contains_key(&pin) || state.outputs.contains_key(&pin) {
            return Err(GpioError::AlreadyConfigured(pin));
        }
        state.inputs.insert(
            pin,
            MockInput {
                pull,
                edge,
                level: pull == Pull::Up,
                edges: VecDeque::new(),
            },
        );
        Ok(())
    }

    fn configure_output(&self, pin: u8, initial: bool) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if state.inputs.contains_key(&pin) || state.outputs.contains_key(&pin) {
            return Err(GpioError::AlreadyConfigured(pin));
        }
        state.outputs.insert(pin, initial);
        state.writes.push((pin, initial));
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, GpioError> {
        let mut state = self.state.lock();
        state.reads += 1;
        state
            .inputs
            .get(&pin)
            .map(|input| input.level)
            .ok_or(GpioError::NotConfigured(pin))
    }

    fn write(&self, pin: u8, level: bool) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        let output = state
            .outputs
            .get_mut(&pin)
            .ok_or(GpioError::NotConfigured(pin))?;
        *output = level;
        state.writes.push((pin, level));
        Ok(())
    }

    fn configure_pwm(&self, pins: &[u8], frequency_hz: f64) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        for pin in pins {
            if state.duties.contains_key(pin) || state.inputs.contains_key(pin) {
                return Err(GpioError::AlreadyConfigured(*pin));
            }
        }
        for pin in pins {
            state.duties.insert(*pin, 0);
        }
        state.pwm_frequency = Some(frequency_hz);
        Ok(())
    }

    fn set_duty(&self, pin: u8, duty: u8) -> Result<(), GpioError> {
        if duty > 100 {
            return Err(GpioError::InvalidDuty(duty));
        }
        let mut state = self.state.lock();
        let slot = state
            .duties
            .get_mut(&pin)
            .ok_or(GpioError::NotConfigured(pin))?;
        *slot = duty;
        Ok(())
    }

    fn wait_for_edge(&self, pin: u8, timeout: Duration) -> Result<Option<bool>, GpioError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let input = state
                .inputs
                .get_mut(&pin)
                .ok_or(GpioError::NotConfigured(pin))?;
            if let Some(level) = input.edges.pop_front() {
                return Ok(Some(level));
            }
            if self.edge_ready.wait_until(&mut state, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        let pins: Vec<u8> = state.outputs.keys().copied().collect();
        for pin in pins {
            state.outputs.insert(pin, false);
            state.writes.push((pin, false));
        }
        for duty in state.duties.values_mut() {
            *duty = 0;
        }
        state.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_sets_idle_level() {
        let gpio = MockGpio::new();
        gpio.configure_input(17, Pull::Down, Edge::Rising).unwrap();
        gpio.configure_input(27, Pull::Up, Edge::Falling).unwrap();
        assert!(!gpio.read(17).unwrap());
        assert!(gpio.read(27).unwrap());
        assert_eq!(gpio.read(3), Err(GpioError::NotConfigured(3)));
    }

    #[test]
    fn test_edges_follow_trigger() {
        let gpio = MockGpio::new();
        gpio.configure_input(17, Pull::Down, Edge::Rising).unwrap();
        gpio.set_input(17, true);
        gpio.set_input(17, false);
        assert_eq!(gpio.wait_for_edge(17, Duration::ZERO), Ok(Some(true)));
        assert_eq!(gpio.wait_for_edge(17, Duration::from_millis(5)), Ok(None));
    }

    #[test]
    fn test_release_drives_outputs_low() {
        let gpio = MockGpio::new();
        gpio.configure_output(16, true).unwrap();
        gpio.release();
        assert_eq!(gpio.output(16), Some(false));
        assert!(gpio.is_released());
    }
}
