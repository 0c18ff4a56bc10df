//! 设备会话
//!
//! [`SessionBuilder::connect`] 按固定顺序建立连接：
//!
//! 1. 构造绑定实例
//! 2. 扫描并选择端点
//! 3. 打开传输（EtherCAT 还要爬升到 OP）
//! 4. 注册发送钩子，启动后台泵
//! 5. 初始化厂商库，读取自由度
//! 6. 可选：使能（位置模式）与回零
//!
//! 任何一步失败都会完整回滚，不会留下半开的会话。

use crate::binding::{BindingFactory, DeviceBinding, FrameSink};
use crate::error::ConnectError;
use crate::metrics::{PumpMetrics, PumpSnapshot};
use crate::pipeline::{
    BusSink, CyclicSink, PendingOutputs, PumpConfig, bus_pump_loop, cyclic_pump_loop,
};
use lhand_protocol::{
    ALL_JOINTS, CommMode, ControlMode, DEFAULT_NODE_ID, command_id, response_id,
};
use lhand_transport::{
    BusTiming, BusTransport, CyclicTransport, LinkTimeouts, NonInteractive, OperatorPrompt,
    TransportError, bring_up, filter_physical, select_endpoint,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 带超时的线程 join
trait JoinTimeout<T> {
    fn join_timeout(self, timeout: Duration) -> Option<T>;
}

impl<T: Send + 'static> JoinTimeout<T> for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> Option<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // 看门狗线程负责真正的 join，超时后留给进程退出回收
        spawn(move || {
            if let Ok(value) = self.join() {
                let _ = tx.send(value);
            }
        });

        rx.recv_timeout(timeout).ok()
    }
}

/// 会话使用的传输（会话生命周期内固定）
pub enum TransportKind {
    /// CAN-FD 总线
    Bus(Arc<dyn BusTransport>),
    /// EtherCAT 周期链路
    Cyclic(Box<dyn CyclicTransport>),
}

impl TransportKind {
    fn mode(&self) -> CommMode {
        match self {
            TransportKind::Bus(_) => CommMode::CanFd,
            TransportKind::Cyclic(_) => CommMode::EtherCat,
        }
    }
}

/// 连接后持有的链路与泵线程
enum Link {
    Bus {
        transport: Arc<dyn BusTransport>,
        pump: Option<JoinHandle<()>>,
    },
    Cyclic {
        pump: Option<JoinHandle<Box<dyn CyclicTransport>>>,
    },
}

/// 会话构造器
///
/// # Example
///
/// ```rust
/// use lhand_driver::{BindingFactory, DeviceBinding, SessionBuilder, SimulatedHand, TransportKind};
/// use lhand_protocol::VendorError;
/// use lhand_transport::mock::MockBus;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let factory: BindingFactory = Arc::new(|| {
///     Ok::<_, VendorError>(Arc::new(SimulatedHand::new(6, 6)) as Arc<dyn DeviceBinding>)
/// });
/// let session = SessionBuilder::new(TransportKind::Bus(Arc::new(MockBus::new(1))), factory)
/// .enable_wait(Duration::ZERO)
/// .connect()
/// .unwrap();
/// assert_eq!(session.get_dof(), (6, 6));
/// ```
pub struct SessionBuilder {
    transport: TransportKind,
    binding_factory: BindingFactory,
    device_index: Option<usize>,
    auto_select: bool,
    bus_channel: u8,
    bus_timing: BusTiming,
    node_id: u8,
    link_timeouts: LinkTimeouts,
    pump_config: PumpConfig,
    enable_motors: bool,
    enable_wait: Duration,
    home_on_connect: bool,
    home_wait: Duration,
    join_timeout: Duration,
    prompt: Box<dyn OperatorPrompt + Send>,
}

impl SessionBuilder {
    /// 创建构造器
    ///
    /// 通信模式由传输类型决定。
    pub fn new(transport: TransportKind, binding_factory: BindingFactory) -> Self {
        Self {
            transport,
            binding_factory,
            device_index: None,
            auto_select: true,
            bus_channel: 0,
            bus_timing: BusTiming::default(),
            node_id: DEFAULT_NODE_ID,
            link_timeouts: LinkTimeouts::default(),
            pump_config: PumpConfig::default(),
            enable_motors: true,
            enable_wait: Duration::from_secs(1),
            home_on_connect: false,
            home_wait: Duration::from_secs(5),
            join_timeout: Duration::from_secs(2),
            prompt: Box::new(NonInteractive),
        }
    }

    /// 显式指定端点索引
    pub fn device_index(mut self, index: usize) -> Self {
        self.device_index = Some(index);
        self
    }

    /// 多个端点时是否自动选择第一个（默认 true）
    pub fn auto_select(mut self, auto_select: bool) -> Self {
        self.auto_select = auto_select;
        self
    }

    /// CAN-FD 通道（默认 0）
    pub fn bus_channel(mut self, channel: u8) -> Self {
        self.bus_channel = channel;
        self
    }

    /// CAN-FD 比特率（默认 1M / 5M）
    pub fn bus_timing(mut self, timing: BusTiming) -> Self {
        self.bus_timing = timing;
        self
    }

    /// 节点 ID（默认 1，命令 0x501 / 应答 0x481）
    pub fn node_id(mut self, node_id: u8) -> Self {
        self.node_id = node_id;
        self
    }

    pub fn link_timeouts(mut self, timeouts: LinkTimeouts) -> Self {
        self.link_timeouts = timeouts;
        self
    }

    pub fn pump_config(mut self, config: PumpConfig) -> Self {
        self.pump_config = config;
        self
    }

    /// 连接后是否使能电机（默认 true）
    pub fn enable_motors(mut self, enable: bool) -> Self {
        self.enable_motors = enable;
        self
    }

    /// 使能后的等待（默认 1s）
    pub fn enable_wait(mut self, wait: Duration) -> Self {
        self.enable_wait = wait;
        self
    }

    /// 连接后是否回零（默认 false）
    pub fn home_on_connect(mut self, home: bool) -> Self {
        self.home_on_connect = home;
        self
    }

    /// 回零驻留时间（默认 5s）
    pub fn home_wait(mut self, wait: Duration) -> Self {
        self.home_wait = wait;
        self
    }

    /// 断开时等待泵线程退出的上限（默认 2s）
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// 多端点且未自动选择时使用的交互（默认 [`NonInteractive`]，直接放弃）
    pub fn prompt(mut self, prompt: Box<dyn OperatorPrompt + Send>) -> Self {
        self.prompt = prompt;
        self
    }

    /// 建立会话
    ///
    /// # 错误
    /// - `ConnectError::DeviceNotFound`: 没有可用端点
    /// - `ConnectError::InvalidSelection`: 显式索引越界或交互输入中断
    /// - `ConnectError::DeviceInit`: 打开传输失败或自由度为 0
    /// - `ConnectError::LinkNotOperational`: EtherCAT 未进入 OP
    /// - `ConnectError::Binding`: 厂商库调用失败
    pub fn connect(self) -> Result<DeviceSession, ConnectError> {
        let SessionBuilder {
            transport,
            binding_factory,
            device_index,
            auto_select,
            bus_channel,
            bus_timing,
            node_id,
            link_timeouts,
            pump_config,
            enable_motors,
            enable_wait,
            home_on_connect,
            home_wait,
            join_timeout,
            mut prompt,
        } = self;

        let mode = transport.mode();
        info!("Connecting to hand over {}", mode);

        let binding = binding_factory()?;
        let metrics = Arc::new(PumpMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let (sink, link): (Arc<dyn FrameSink>, Link) = match transport {
            TransportKind::Bus(transport) => {
                open_bus(
                    transport.as_ref(),
                    device_index,
                    auto_select,
                    bus_channel,
                    &bus_timing,
                    prompt.as_mut(),
                )?;
                let sink: Arc<dyn FrameSink> = Arc::new(BusSink::new(
                    transport.clone(),
                    command_id(node_id),
                    metrics.clone(),
                ));
                let pump = {
                    let transport = transport.clone();
                    let binding = binding.clone();
                    let is_running = is_running.clone();
                    let metrics = metrics.clone();
                    let config = pump_config.clone();
                    let rid = response_id(node_id);
                    std::thread::Builder::new()
                        .name("lhand-bus-pump".into())
                        .spawn(move || {
                            bus_pump_loop(transport, binding, rid, config, is_running, metrics)
                        })
                };
                let pump = match pump {
                    Ok(handle) => handle,
                    Err(e) => {
                        close_bus(transport.as_ref());
                        return Err(ConnectError::DeviceInit(format!(
                            "Failed to spawn bus pump: {}",
                            e
                        )));
                    },
                };
                (
                    sink,
                    Link::Bus {
                        transport,
                        pump: Some(pump),
                    },
                )
            },
            TransportKind::Cyclic(mut link) => {
                open_cyclic(
                    link.as_mut(),
                    device_index,
                    auto_select,
                    &link_timeouts,
                    prompt.as_mut(),
                )?;
                let pending = Arc::new(PendingOutputs::new(link.output_size()));
                let sink: Arc<dyn FrameSink> =
                    Arc::new(CyclicSink::new(pending.clone(), metrics.clone()));
                let binding_for_pump = binding.clone();
                let is_running_for_pump = is_running.clone();
                let metrics_for_pump = metrics.clone();
                let config = pump_config.clone();
                let pump = std::thread::Builder::new()
                    .name("lhand-cyclic-pump".into())
                    .spawn(move || {
                        cyclic_pump_loop(
                            link,
                            binding_for_pump,
                            pending,
                            config,
                            is_running_for_pump,
                            metrics_for_pump,
                        )
                    })
                    .map_err(|e| {
                        ConnectError::DeviceInit(format!("Failed to spawn cyclic pump: {}", e))
                    })?;
                (sink, Link::Cyclic { pump: Some(pump) })
            },
        };

        let mut session = DeviceSession {
            mode,
            connected: false,
            dof_total: 0,
            dof_active: 0,
            binding,
            link: Some(link),
            is_running,
            metrics,
            join_timeout,
        };

        if let Err(e) = session.initialize(
            sink,
            enable_motors,
            enable_wait,
            home_on_connect,
            home_wait,
        ) {
            error!("Connect failed, rolling back: {}", e);
            if let Err(close_err) = session.teardown() {
                warn!("Rollback could not close the transport: {}", close_err);
            }
            return Err(e);
        }

        session.connected = true;
        info!(
            "Hand connected over {} (dof total={}, active={})",
            mode, session.dof_total, session.dof_active
        );
        Ok(session)
    }
}

fn open_bus(
    transport: &dyn BusTransport,
    device_index: Option<usize>,
    auto_select: bool,
    channel: u8,
    timing: &BusTiming,
    prompt: &mut (dyn OperatorPrompt + Send),
) -> Result<(), ConnectError> {
    let count = transport
        .scan()
        .map_err(|e| ConnectError::DeviceNotFound(format!("CAN-FD scan failed: {}", e)))?;
    debug!("Found {} CAN-FD device(s)", count);

    let names: Vec<String> = (0..count).map(|i| transport.endpoint_name(i)).collect();
    let index = select_endpoint(&names, device_index, auto_select, prompt)?;

    transport.open(index, channel, timing).map_err(|e| {
        // 打开失败的适配器同样需要释放
        close_bus(transport);
        ConnectError::DeviceInit(format!(
            "Failed to open {} channel {} at {}/{} bps: {}",
            names[index], channel, timing.nominal_bitrate, timing.data_bitrate, e
        ))
    })
}

fn close_bus(transport: &dyn BusTransport) {
    if let Err(e) = transport.close() {
        warn!("Failed to close CAN-FD transport: {}", e);
    }
}

fn open_cyclic(
    link: &mut dyn CyclicTransport,
    device_index: Option<usize>,
    auto_select: bool,
    timeouts: &LinkTimeouts,
    prompt: &mut (dyn OperatorPrompt + Send),
) -> Result<(), ConnectError> {
    let interfaces = link
        .scan_interfaces()
        .map_err(|e| ConnectError::DeviceNotFound(format!("Interface scan failed: {}", e)))?;
    let physical = filter_physical(interfaces);
    for iface in &physical {
        debug!("EtherCAT candidate: {} ({})", iface.name, iface.description);
    }

    let names: Vec<String> = physical.iter().map(|i| i.name.clone()).collect();
    let index = select_endpoint(&names, device_index, auto_select, prompt)?;

    let slaves = match link.open(&names[index]) {
        Ok(0) => {
            close_link(link);
            return Err(ConnectError::DeviceNotFound(format!(
                "No EtherCAT slaves found on {}",
                names[index]
            )));
        },
        Ok(n) => n,
        Err(e) => {
            close_link(link);
            return Err(ConnectError::DeviceInit(format!(
                "Failed to open EtherCAT master on {}: {}",
                names[index], e
            )));
        },
    };
    info!("Found {} EtherCAT slave(s) on {}", slaves, names[index]);

    if let Err(e) = bring_up(link, timeouts) {
        close_link(link);
        return Err(ConnectError::LinkNotOperational(e));
    }
    Ok(())
}

fn close_link(link: &mut dyn CyclicTransport) {
    if let Err(e) = link.close() {
        warn!("Failed to close EtherCAT master: {}", e);
    }
}

/// 设备会话
///
/// `connected == true` 时传输、泵和绑定都处于活动状态，且 `dof_active > 0`。
pub struct DeviceSession {
    mode: CommMode,
    connected: bool,
    dof_total: u32,
    dof_active: u32,
    binding: Arc<dyn DeviceBinding>,
    link: Option<Link>,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PumpMetrics>,
    join_timeout: Duration,
}

impl DeviceSession {
    fn initialize(
        &mut self,
        sink: Arc<dyn FrameSink>,
        enable_motors: bool,
        enable_wait: Duration,
        home_on_connect: bool,
        home_wait: Duration,
    ) -> Result<(), ConnectError> {
        self.binding.set_send_hook(sink)?;
        self.binding.initialize(self.mode)?;

        let (total, active) = self.binding.get_dof()?;
        if active == 0 {
            return Err(ConnectError::DeviceInit(format!(
                "Device reported no active joints (total={})",
                total
            )));
        }
        self.dof_total = total;
        self.dof_active = active;

        if enable_motors {
            self.binding
                .set_control_mode(ALL_JOINTS, ControlMode::Position)?;
            self.binding.set_enable(ALL_JOINTS, true)?;
            std::thread::sleep(enable_wait);
            debug!("Motors enabled in position mode");
        }

        if home_on_connect {
            self.binding.home_motors(ALL_JOINTS)?;
            std::thread::sleep(home_wait);
            debug!("Homing dwell of {:?} elapsed", home_wait);
        }
        Ok(())
    }

    /// 通信模式
    pub fn mode(&self) -> CommMode {
        self.mode
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// 自由度 `(total, active)`
    pub fn get_dof(&self) -> (u32, u32) {
        (self.dof_total, self.dof_active)
    }

    /// 厂商库绑定
    pub fn binding(&self) -> Arc<dyn DeviceBinding> {
        self.binding.clone()
    }

    /// 后台泵指标
    pub fn pump_metrics(&self) -> PumpSnapshot {
        self.metrics.snapshot()
    }

    /// 断开连接
    ///
    /// 幂等：已断开时直接返回 `Ok(())`。
    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.connected && self.link.is_none() {
            debug!("disconnect() on a closed session, nothing to do");
            return Ok(());
        }
        info!("Disconnecting hand ({})", self.mode);
        let result = self.teardown();
        info!("Hand disconnected");
        result
    }

    /// 停泵、清钩子、关闭绑定与传输（可重复调用）
    fn teardown(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.is_running.store(false, Ordering::Release);

        let Some(link) = self.link.take() else {
            return Ok(());
        };

        // 先停泵，再拆除钩子和绑定，避免解码落到已关闭的库上
        let result = match link {
            Link::Bus { transport, pump } => {
                if let Some(pump) = pump
                    && pump.join_timeout(self.join_timeout).is_none()
                {
                    error!(
                        "Bus pump failed to shut down within {:?}",
                        self.join_timeout
                    );
                }
                self.release_binding();
                transport.close()
            },
            Link::Cyclic { pump } => {
                let link = pump.and_then(|p| p.join_timeout(self.join_timeout));
                self.release_binding();
                match link {
                    Some(mut link) => link.close(),
                    None => {
                        error!(
                            "Cyclic pump failed to shut down within {:?}, link left to process exit",
                            self.join_timeout
                        );
                        Ok(())
                    },
                }
            },
        };

        if let Err(e) = &result {
            error!("Failed to close transport: {}", e);
        }
        result
    }

    fn release_binding(&self) {
        self.binding.clear_send_hook();
        if let Err(e) = self.binding.close() {
            warn!("Failed to close device binding: {}", e);
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.link.is_some()
            && let Err(e) = self.teardown()
        {
            warn!("Failed to close transport on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedHand;
    use lhand_protocol::VendorError;
    use lhand_transport::mock::{MockBus, MockCyclicMaster};

    fn sim_factory(hand: &Arc<SimulatedHand>) -> BindingFactory {
        let hand = hand.clone();
        Arc::new(move || Ok::<_, VendorError>(hand.clone() as Arc<dyn DeviceBinding>))
    }

    #[test]
    fn test_join_timeout_returns_value() {
        let handle = spawn(|| 42);
        assert_eq!(handle.join_timeout(Duration::from_secs(1)), Some(42));
    }

    #[test]
    fn test_join_timeout_expires() {
        let handle = spawn(|| std::thread::sleep(Duration::from_millis(200)));
        assert!(handle.join_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_bus_connect_skips_enable_when_disabled() {
        let hand = Arc::new(SimulatedHand::new(6, 6));
        let mut session = SessionBuilder::new(
            TransportKind::Bus(Arc::new(MockBus::new(1))),
            sim_factory(&hand),
        )
        .enable_motors(false)
        .connect()
        .unwrap();

        assert_eq!(hand.count("set_enable"), 0);
        session.disconnect().unwrap();
    }

    #[test]
    fn test_cyclic_open_failure_closes_link() {
        let hand = Arc::new(SimulatedHand::new(6, 6));
        let master = MockCyclicMaster::new(&["eth0"], 64, 64);
        let handle = master.handle();
        handle.set_fail_open(true);

        let err = SessionBuilder::new(TransportKind::Cyclic(Box::new(master)), sim_factory(&hand))
            .enable_wait(Duration::ZERO)
            .connect()
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::DeviceInit(_)));
        assert!(!handle.is_open());
        assert!(!hand.is_initialized());
    }
}
