//! 树莓派后端（`rppal`）
//!
//! 每个引脚一把锁：中断模式下一个引脚阻塞等待边沿时，其它引脚照常读写。

use crate::backend::{Edge, GpioBackend, Pull};
use crate::error::GpioError;
use parking_lot::Mutex;
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

struct InputSlot {
    pin: InputPin,
    trigger: Trigger,
    armed: bool,
}

struct PwmSlot {
    pin: OutputPin,
    frequency_hz: f64,
}

/// `rppal` GPIO 后端
pub struct RppalGpio {
    gpio: Gpio,
    inputs: Mutex<HashMap<u8, Arc<Mutex<InputSlot>>>>,
    outputs: Mutex<HashMap<u8, Arc<Mutex<OutputPin>>>>,
    pwm: Mutex<HashMap<u8, Arc<Mutex<PwmSlot>>>>,
}

fn backend_error(e: rppal::gpio::Error) -> GpioError {
    GpioError::Backend(e.to_string())
}

impl RppalGpio {
    /// 打开 GPIO 外设（非树莓派或权限不足时失败）
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(backend_error)?;
        debug!("GPIO peripheral opened");
        Ok(Self {
            gpio,
            inputs: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            pwm: Mutex::new(HashMap::new()),
        })
    }

    fn is_configured(&self, pin: u8) -> bool {
        self.inputs.lock().contains_key(&pin)
            || self.outputs.lock().contains_key(&pin)
            || self.pwm.lock().contains_key(&pin)
    }

    fn input(&self, pin: u8) -> Result<Arc<Mutex<InputSlot>>, GpioError> {
        self.inputs
            .lock()
            .get(&pin)
            .cloned()
            .ok_or(GpioError::NotConfigured(pin))
    }
}

impl GpioBackend for RppalGpio {
    fn configure_input(&self, pin: u8, pull: Pull, edge: Edge) -> Result<(), GpioError> {
        if self.is_configured(pin) {
            return Err(GpioError::AlreadyConfigured(pin));
        }
        let raw = self.gpio.get(pin).map_err(backend_error)?;
        let input = match pull {
            Pull::Off => raw.into_input(),
            Pull::Up => raw.into_input_pullup(),
            Pull::Down => raw.into_input_pulldown(),
        };
        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
            Edge::Both => Trigger::Both,
        };
        self.inputs.lock().insert(
            pin,
            Arc::new(Mutex::new(InputSlot {
                pin: input,
                trigger,
                armed: false,
            })),
        );
        Ok(())
    }

    fn configure_output(&self, pin: u8, initial: bool) -> Result<(), GpioError> {
        if self.is_configured(pin) {
            return Err(GpioError::AlreadyConfigured(pin));
        }
        let raw = self.gpio.get(pin).map_err(backend_error)?;
        let output = if initial {
            raw.into_output_high()
        } else {
            raw.into_output_low()
        };
        self.outputs
            .lock()
            .insert(pin, Arc::new(Mutex::new(output)));
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<bool, GpioError> {
        let slot = self.input(pin)?;
        let level = slot.lock().pin.is_high();
        Ok(level)
    }

    fn write(&self, pin: u8, level: bool) -> Result<(), GpioError> {
        let output = self
            .outputs
            .lock()
            .get(&pin)
            .cloned()
            .ok_or(GpioError::NotConfigured(pin))?;
        let mut output = output.lock();
        if level {
            output.set_high();
        } else {
            output.set_low();
        }
        Ok(())
    }

    fn configure_pwm(&self, pins: &[u8], frequency_hz: f64) -> Result<(), GpioError> {
        for pin in pins {
            if self.is_configured(*pin) {
                return Err(GpioError::AlreadyConfigured(*pin));
            }
        }
        for pin in pins {
            let mut output = self.gpio.get(*pin).map_err(backend_error)?.into_output_low();
            output
                .set_pwm_frequency(frequency_hz, 0.0)
                .map_err(backend_error)?;
            self.pwm.lock().insert(
                *pin,
                Arc::new(Mutex::new(PwmSlot {
                    pin: output,
                    frequency_hz,
                })),
            );
        }
        Ok(())
    }

    fn set_duty(&self, pin: u8, duty: u8) -> Result<(), GpioError> {
        if duty > 100 {
            return Err(GpioError::InvalidDuty(duty));
        }
        let slot = self
            .pwm
            .lock()
            .get(&pin)
            .cloned()
            .ok_or(GpioError::NotConfigured(pin))?;
        let mut slot = slot.lock();
        let frequency = slot.frequency_hz;
        slot.pin
            .set_pwm_frequency(frequency, f64::from(duty) / 100.0)
            .map_err(backend_error)
    }

    fn wait_for_edge(&self, pin: u8, timeout: Duration) -> Result<Option<bool>, GpioError> {
        let slot = self.input(pin)?;
        let mut slot = slot.lock();
        if !slot.armed {
            let trigger = slot.trigger;
            slot.pin
                .set_interrupt(trigger, None)
                .map_err(backend_error)?;
            slot.armed = true;
        }
        match slot.pin.poll_interrupt(true, Some(timeout)) {
            Ok(Some(_)) => Ok(Some(slot.pin.is_high())),
            Ok(None) => Ok(None),
            Err(e) => Err(backend_error(e)),
        }
    }

    fn release(&self) {
        for output in self.outputs.lock().values() {
            output.lock().set_low();
        }
        for slot in self.pwm.lock().values() {
            if let Err(e) = slot.lock().pin.clear_pwm() {
                warn!("Failed to stop PWM: {}", e);
            }
        }
        for slot in self.inputs.lock().values() {
            let mut slot = slot.lock();
            if slot.armed
                && let Err(e) = slot.pin.clear_interrupt()
            {
                warn!("Failed to clear interrupt: {}", e);
            }
        }
        self.outputs.lock().clear();
        self.pwm.lock().clear();
        self.inputs.lock().clear();
        debug!("GPIO released");
    }
}
