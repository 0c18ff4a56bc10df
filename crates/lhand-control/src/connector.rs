//! 会话工厂
//!
//! 控制器每次收到连接命令都调用一次连接器，新建传输并完成 [`SessionBuilder::connect`]。

use crate::config::{HandConfig, ModeSetting};
use anyhow::Result;
use lhand_driver::{BindingFactory, ConnectError, DeviceSession, SessionBuilder, TransportKind};
use lhand_transport::OperatorPrompt;
use std::sync::Arc;

/// 建立一次会话
pub type Connector = Arc<dyn Fn() -> Result<DeviceSession, ConnectError> + Send + Sync>;

/// 每次连接新建一个操作员交互
pub type PromptFactory = Arc<dyn Fn() -> Box<dyn OperatorPrompt + Send> + Send + Sync>;

/// 按配置设置会话参数
pub fn session_builder(
    config: &HandConfig,
    transport: TransportKind,
    binding_factory: BindingFactory,
) -> SessionBuilder {
    let mut builder = SessionBuilder::new(transport, binding_factory)
        .auto_select(config.auto_select)
        .bus_channel(config.canfd.channel)
        .bus_timing(config.bus_timing())
        .node_id(config.canfd.node_id)
        .link_timeouts(config.link_timeouts())
        .pump_config(config.pump_config())
        .enable_motors(config.motion.enable_motors)
        .enable_wait(config.enable_wait())
        .home_on_connect(config.motion.home_on_connect)
        .home_wait(config.home_wait());
    if let Some(index) = config.device_index {
        builder = builder.device_index(index);
    }
    builder
}

/// 真实硬件连接器
///
/// CAN-FD 使用 SocketCAN（Linux）。EtherCAT 主站需要由调用方以
/// [`TransportKind::Cyclic`] 提供，见 [`connector_with`]。
/// 多个适配器且未开启 `auto_select` 时由 `prompt` 询问操作员。
pub fn hardware_connector(
    config: &HandConfig,
    binding_factory: BindingFactory,
    prompt: PromptFactory,
) -> Result<Connector> {
    match config.mode {
        #[cfg(target_os = "linux")]
        ModeSetting::Canfd => {
            let config = config.clone();
            Ok(Arc::new(move || {
                let mut adapter = lhand_transport::SocketCanFd::new(config.canfd.node_id);
                if let Some(name) = &config.canfd.interface {
                    adapter = adapter.with_interface(name.clone());
                }
                let transport = TransportKind::Bus(Arc::new(adapter));
                session_builder(&config, transport, binding_factory.clone())
                    .prompt(prompt())
                    .connect()
            }))
        },
        #[cfg(not(target_os = "linux"))]
        ModeSetting::Canfd => anyhow::bail!("CAN-FD requires SocketCAN, which is only available on Linux"),
        ModeSetting::Ecat => anyhow::bail!(
            "No EtherCAT master is built into this binary; run with --simulate or supply a cyclic transport"
        ),
    }
}

/// 用调用方提供的传输工厂构造连接器
pub fn connector_with<T>(config: &HandConfig, binding_factory: BindingFactory, transport: T) -> Connector
where
    T: Fn() -> TransportKind + Send + Sync + 'static,
{
    let config = config.clone();
    Arc::new(move || session_builder(&config, transport(), binding_factory.clone()).connect())
}

/// 仿真连接器：每次连接新建 mock 传输，绑定为同一只仿真手
#[cfg(feature = "simulate")]
pub fn simulated_connector(
    config: &HandConfig,
    hand: Arc<lhand_driver::SimulatedHand>,
) -> Connector {
    use lhand_driver::DeviceBinding;
    use lhand_protocol::VendorError;
    use lhand_transport::mock::{MockBus, MockCyclicMaster};

    let factory: BindingFactory =
        Arc::new(move || Ok::<_, VendorError>(hand.clone() as Arc<dyn DeviceBinding>));
    let mode = config.mode;
    connector_with(config, factory, move || match mode {
        ModeSetting::Canfd => TransportKind::Bus(Arc::new(MockBus::new(1))),
        ModeSetting::Ecat => {
            TransportKind::Cyclic(Box::new(MockCyclicMaster::new(&["eth0"], 64, 64)))
        },
    })
}
