//! # LHand Control
//!
//! 面向产线工装的控制流程：TOML 配置、GPIO 按键命令、状态指示、手套遥操作。
//!
//! ```rust,no_run
//! use lhand_control::{Controller, HandConfig, PromptFactory, hardware_connector};
//! use lhand_driver::{BindingFactory, DeviceBinding, SimulatedHand};
//! use lhand_protocol::VendorError;
//! use lhand_transport::{NonInteractive, OperatorPrompt};
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = HandConfig::load_or_default(None)?;
//! let factory: BindingFactory = Arc::new(|| {
//!     Ok::<_, VendorError>(Arc::new(SimulatedHand::new(6, 6)) as Arc<dyn DeviceBinding>)
//! });
//! let prompt: PromptFactory = Arc::new(|| Box::new(NonInteractive) as Box<dyn OperatorPrompt + Send>);
//! let connector = hardware_connector(&config, factory, prompt)?;
//! let controller = Controller::new(config, connector, None)?;
//! controller.run_until(&AtomicBool::new(true))?;
//! # Ok(())
//! # }
//! ```

mod config;
mod connector;
mod controller;
mod indicators;

pub use config::{
    CanFdSection, EcatSection, GpioSection, HandConfig, ModeSetting, MotionSection,
    StrategySetting, TeleopSection,
};
pub use connector::{
    Connector, PromptFactory, connector_with, hardware_connector, session_builder,
};
pub use controller::Controller;
pub use indicators::{IndicatorObserver, Indicators};

#[cfg(feature = "simulate")]
pub use connector::simulated_connector;
