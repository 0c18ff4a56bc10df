//! 输出通道
//!
//! 每个通道一把互斥锁：高、低与脉冲交错调用不会互相踩踏。
//! 脉冲的自动拉低带 generation 检查，脉冲期间有新的写入时定时器不再改动电平。

use crate::backend::GpioBackend;
use crate::error::GpioError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

#[derive(Debug, Default)]
struct ChannelState {
    level: bool,
    generation: u64,
}

/// 单个输出引脚（只写，电平是软件镜像，从不回读硬件）
#[derive(Clone)]
pub struct OutputChannel {
    pin: u8,
    backend: Arc<dyn GpioBackend>,
    state: Arc<Mutex<ChannelState>>,
}

impl OutputChannel {
    /// 配置输出引脚并写入初始电平
    pub fn new(backend: Arc<dyn GpioBackend>, pin: u8, initial: bool) -> Result<Self, GpioError> {
        backend.configure_output(pin, initial)?;
        Ok(Self {
            pin,
            backend,
            state: Arc::new(Mutex::new(ChannelState {
                level: initial,
                generation: 0,
            })),
        })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// 最近一次写入的电平
    pub fn level(&self) -> bool {
        self.state.lock().level
    }

    pub fn set(&self, level: bool) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        self.backend.write(self.pin, level)?;
        state.level = level;
        state.generation += 1;
        trace!("GPIO {} -> {}", self.pin, level);
        Ok(())
    }

    pub fn set_high(&self) -> Result<(), GpioError> {
        self.set(true)
    }

    pub fn set_low(&self) -> Result<(), GpioError> {
        self.set(false)
    }

    /// 输出一个高电平脉冲，`duration` 后由单次定时器自动拉低
    pub fn pulse(&self, duration: Duration) -> Result<(), GpioError> {
        let generation = {
            let mut state = self.state.lock();
            self.backend.write(self.pin, true)?;
            state.level = true;
            state.generation += 1;
            state.generation
        };

        let channel = self.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("lhand-gpio-pulse-{}", self.pin))
            .spawn(move || {
                std::thread::sleep(duration);
                channel.expire_pulse(generation);
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn pulse timer for GPIO {}: {}", self.pin, e);
            self.set_low()?;
            return Err(GpioError::Backend(e.to_string()));
        }
        Ok(())
    }

    fn expire_pulse(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation != generation {
            trace!("GPIO {} pulse superseded", self.pin);
            return;
        }
        match self.backend.write(self.pin, false) {
            Ok(()) => {
                state.level = false;
                state.generation += 1;
            },
            Err(e) => warn!("Failed to end pulse on GPIO {}: {}", self.pin, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpio;
    use std::time::Instant;

    fn wait_for(deadline: Duration, condition: impl Fn() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_set_levels() {
        let gpio = Arc::new(MockGpio::new());
        let channel = OutputChannel::new(gpio.clone(), 16, false).unwrap();
        channel.set_high().unwrap();
        assert!(channel.level());
        assert_eq!(gpio.output(16), Some(true));
        channel.set_low().unwrap();
        assert_eq!(gpio.writes_for(16), vec![false, true, false]);
    }

    #[test]
    fn test_pulse_auto_clears() {
        let gpio = Arc::new(MockGpio::new());
        let channel = OutputChannel::new(gpio.clone(), 5, false).unwrap();
        channel.pulse(Duration::from_millis(20)).unwrap();
        assert_eq!(gpio.output(5), Some(true));
        assert!(wait_for(Duration::from_secs(1), || gpio.output(5) == Some(false)));
        assert!(!channel.level());
    }

    #[test]
    fn test_write_during_pulse_wins() {
        let gpio = Arc::new(MockGpio::new());
        let channel = OutputChannel::new(gpio.clone(), 5, false).unwrap();
        channel.pulse(Duration::from_millis(20)).unwrap();
        channel.set_high().unwrap();
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(gpio.output(5), Some(true));
        assert!(channel.level());
    }

    #[test]
    fn test_unconfigured_pin() {
        let gpio = Arc::new(MockGpio::new());
        gpio.configure_output(7, false).unwrap();
        let err = OutputChannel::new(gpio, 7, false).err().unwrap();
        assert_eq!(err, GpioError::AlreadyConfigured(7));
    }
}
