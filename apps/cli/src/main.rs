//! # LHand CLI
//!
//! 启动 GPIO 控制器：加载配置、连接灵巧手、监听按键，Ctrl-C 退出。
//!
//! ```bash
//! # 使用 SocketCAN（can0 需已配置为 CAN-FD）
//! lhand-cli --communication-mode canfd
//!
//! # 无硬件演示：仿真手 + mock 传输 + mock GPIO
//! lhand-cli --simulate
//!
//! # 调试日志
//! RUST_LOG=lhand=debug lhand-cli --simulate --no-gpio
//! ```

mod prompt;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lhand_control::{Controller, HandConfig, ModeSetting};
use lhand_driver::{BindingFactory, DeviceBinding, SimulatedHand};
use lhand_gpio::GpioBackend;
use lhand_protocol::{HandSide, VendorError};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// LHand 控制器
#[derive(Parser, Debug)]
#[command(name = "lhand-cli")]
#[command(about = "GPIO-driven controller for LHand dexterous hands", long_about = None)]
#[command(version)]
struct Args {
    /// 通信模式（覆盖配置文件）
    #[arg(long, value_enum)]
    communication_mode: Option<ModeArg>,

    /// 设备 / 网口索引（覆盖配置文件）
    #[arg(long)]
    device_index: Option<usize>,

    /// 多个设备时交互选择，而不是自动选第一个
    #[arg(long)]
    no_auto_select: bool,

    /// 配置文件路径
    ///
    /// 默认: `<config_dir>/lhand/config.toml`（不存在时使用内置默认值）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 不使用 GPIO
    #[arg(long)]
    no_gpio: bool,

    /// 启动后不自动连接与开始循环
    #[arg(long)]
    no_auto_start: bool,

    /// 使用仿真手、mock 传输与 mock GPIO
    #[arg(long)]
    simulate: bool,

    /// 手套跟随哪只手（覆盖配置文件）
    #[arg(long, value_enum)]
    hand: Option<HandArg>,

    /// 手套 UDP 监听地址（覆盖配置文件）
    #[arg(long)]
    glove_bind: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Canfd,
    Ecat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HandArg {
    Right,
    Left,
}

impl Args {
    /// 命令行参数覆盖配置文件
    fn apply(&self, config: &mut HandConfig) {
        if let Some(mode) = self.communication_mode {
            config.mode = match mode {
                ModeArg::Canfd => ModeSetting::Canfd,
                ModeArg::Ecat => ModeSetting::Ecat,
            };
        }
        if let Some(index) = self.device_index {
            config.device_index = Some(index);
        }
        if self.no_auto_select {
            config.auto_select = false;
        }
        if self.no_gpio {
            config.gpio.enabled = false;
        }
        if self.no_auto_start {
            config.auto_start = false;
        }
        if let Some(hand) = self.hand {
            config.teleop.hand = match hand {
                HandArg::Right => HandSide::Right,
                HandArg::Left => HandSide::Left,
            };
        }
        if let Some(bind) = &self.glove_bind {
            config.teleop.bind = bind.clone();
        }
    }
}

fn init_logging() -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("lhand=info"),
    };
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")?;
    tracing_log::LogTracer::init().context("Failed to bridge log records")?;
    Ok(())
}

/// 厂商库绑定由集成方提供；这里使用协议级仿真绑定，命令仍经传输发出
fn binding_factory() -> BindingFactory {
    Arc::new(|| {
        Ok::<_, VendorError>(
            Arc::new(SimulatedHand::new(6, 6).with_record_len(64)) as Arc<dyn DeviceBinding>
        )
    })
}

type Wiring = (lhand_control::Connector, Option<Arc<dyn GpioBackend>>);

#[cfg(feature = "simulate")]
fn simulated(config: &HandConfig) -> Result<Wiring> {
    let hand = Arc::new(SimulatedHand::new(6, 6).with_record_len(64));
    let connector = lhand_control::simulated_connector(config, hand);
    let gpio = config
        .gpio
        .enabled
        .then(|| Arc::new(lhand_gpio::mock::MockGpio::new()) as Arc<dyn GpioBackend>);
    Ok((connector, gpio))
}

#[cfg(not(feature = "simulate"))]
fn simulated(_config: &HandConfig) -> Result<Wiring> {
    anyhow::bail!("This binary was built without the `simulate` feature")
}

fn hardware_gpio(config: &HandConfig) -> Result<Option<Arc<dyn GpioBackend>>> {
    if !config.gpio.enabled {
        return Ok(None);
    }

    #[cfg(all(feature = "raspberry-pi", target_os = "linux"))]
    {
        let gpio = lhand_gpio::RppalGpio::new().context("Failed to open GPIO")?;
        Ok(Some(Arc::new(gpio) as Arc<dyn GpioBackend>))
    }

    #[cfg(not(all(feature = "raspberry-pi", target_os = "linux")))]
    {
        tracing::warn!("GPIO support is not compiled in (feature `raspberry-pi`), running without GPIO");
        Ok(None)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let mut config = HandConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;
    info!(
        "Mode {:?}, GPIO {}, glove {} ({:?} hand)",
        config.mode,
        if config.gpio.enabled { "on" } else { "off" },
        config.teleop.bind,
        config.teleop.hand
    );

    let (connector, gpio) = if args.simulate {
        info!("Running against a simulated hand");
        simulated(&config)?
    } else {
        let connector = lhand_control::hardware_connector(&config, binding_factory(), prompt::factory())?;
        (connector, hardware_gpio(&config)?)
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nReceived interrupt signal. Shutting down...");
            shutdown.store(true, Ordering::Release);
        })
        .context("Failed to install Ctrl-C handler")?;
    }

    let controller = Controller::new(config, connector, gpio)?;
    controller.run_until(&shutdown)?;
    info!("Bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "lhand-cli",
            "--communication-mode",
            "ecat",
            "--device-index",
            "2",
            "--no-auto-select",
            "--no-gpio",
            "--hand",
            "left",
        ]);
        let mut config = HandConfig::default();
        args.apply(&mut config);

        assert_eq!(config.mode, ModeSetting::Ecat);
        assert_eq!(config.device_index, Some(2));
        assert!(!config.auto_select);
        assert!(!config.gpio.enabled);
        assert!(config.auto_start);
        assert_eq!(config.teleop.hand, HandSide::Left);
    }

    #[test]
    fn test_defaults_keep_config() {
        let args = Args::parse_from(["lhand-cli"]);
        let mut config = HandConfig::default();
        args.apply(&mut config);
        assert_eq!(config, HandConfig::default());
    }
}
