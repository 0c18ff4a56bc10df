//! RGB 状态灯

use crate::backend::GpioBackend;
use crate::error::GpioError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// 8 位 RGB 颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// 未连接 / 连接失败
    pub const YELLOW: Color = Color::new(255, 255, 0);
    /// 就绪
    pub const GREEN: Color = Color::new(0, 255, 0);
    /// 循环运行中
    pub const BLUE: Color = Color::new(0, 0, 255);
    /// 报警
    pub const RED: Color = Color::new(255, 0, 0);
    /// 手套监听中
    pub const CYAN: Color = Color::new(0, 255, 255);
    pub const OFF: Color = Color::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// 各通道占空比（0..=100）
    pub fn duties(&self) -> [u8; 3] {
        [self.r, self.g, self.b].map(|v| ((u16::from(v) * 100 + 127) / 255) as u8)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// 三路 PWM 驱动的状态灯
pub struct StatusLight {
    backend: Arc<dyn GpioBackend>,
    pins: [u8; 3],
    current: Mutex<Color>,
}

impl StatusLight {
    /// 默认 PWM 频率
    pub const DEFAULT_FREQUENCY_HZ: f64 = 1000.0;

    /// 配置 R/G/B 三个引脚为 PWM，初始熄灭
    pub fn new(
        backend: Arc<dyn GpioBackend>,
        pins: [u8; 3],
        frequency_hz: f64,
    ) -> Result<Self, GpioError> {
        backend.configure_pwm(&pins, frequency_hz)?;
        Ok(Self {
            backend,
            pins,
            current: Mutex::new(Color::OFF),
        })
    }

    pub fn set(&self, color: Color) -> Result<(), GpioError> {
        let mut current = self.current.lock();
        for (pin, duty) in self.pins.iter().zip(color.duties()) {
            self.backend.set_duty(*pin, duty)?;
        }
        *current = color;
        debug!("Status light {}", color);
        Ok(())
    }

    pub fn color(&self) -> Color {
        *self.current.lock()
    }

    pub fn off(&self) -> Result<(), GpioError> {
        self.set(Color::OFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGpio;
    use crate::pins;

    #[test]
    fn test_duty_scaling() {
        assert_eq!(Color::YELLOW.duties(), [100, 100, 0]);
        assert_eq!(Color::new(128, 0, 1).duties(), [50, 0, 0]);
    }

    #[test]
    fn test_set_color() {
        let gpio = Arc::new(MockGpio::new());
        let light = StatusLight::new(
            gpio.clone(),
            [pins::RGB_R, pins::RGB_G, pins::RGB_B],
            StatusLight::DEFAULT_FREQUENCY_HZ,
        )
        .unwrap();
        assert_eq!(gpio.pwm_frequency(), Some(1000.0));

        light.set(Color::CYAN).unwrap();
        assert_eq!(light.color(), Color::CYAN);
        assert_eq!(gpio.duty(pins::RGB_R), Some(0));
        assert_eq!(gpio.duty(pins::RGB_G), Some(100));
        assert_eq!(gpio.duty(pins::RGB_B), Some(100));
    }
}
