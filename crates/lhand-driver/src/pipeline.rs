//! Pipeline IO 循环模块
//!
//! 两种后台泵，均运行到 `is_running` 被清除：
//!
//! - [`bus_pump_loop`]：轮询接收 CAN-FD 帧，只把应答 ID 的帧交给绑定解码
//! - [`cyclic_pump_loop`]：固定周期写出待发输出、交换、读回输入并解码
//!
//! 单帧错误只记录日志，泵继续运行。

use crate::binding::{DeviceBinding, FrameSink};
use crate::metrics::PumpMetrics;
use lhand_protocol::CanFdFrame;
use lhand_transport::{BusTransport, CyclicTransport, TransportError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// 泵配置
///
/// # Example
///
/// ```
/// use lhand_driver::PumpConfig;
/// use std::time::Duration;
///
/// let config = PumpConfig {
///     cycle_period: Duration::from_millis(2),
///     ..PumpConfig::default()
/// };
/// assert_eq!(config.decode_period, Duration::from_millis(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpConfig {
    /// 总线接收超时
    pub receive_timeout: Duration,
    /// 总线泵每轮迭代后的休眠
    pub bus_idle: Duration,
    /// 周期交换周期
    pub cycle_period: Duration,
    /// 单次交换超时
    pub exchange_timeout: Duration,
    /// 周期输入解码间隔（交换每周期进行，解码按此间隔）
    pub decode_period: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(10),
            bus_idle: Duration::from_millis(1),
            cycle_period: Duration::from_millis(1),
            exchange_timeout: Duration::from_millis(2),
            decode_period: Duration::from_millis(10),
        }
    }
}

// ============================================================================
// 发送钩子
// ============================================================================

/// 总线发送钩子：立即发送 64 字节零填充帧
pub struct BusSink {
    transport: Arc<dyn BusTransport>,
    command_id: u32,
    metrics: Arc<PumpMetrics>,
}

impl BusSink {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        command_id: u32,
        metrics: Arc<PumpMetrics>,
    ) -> Self {
        Self {
            transport,
            command_id,
            metrics,
        }
    }
}

impl FrameSink for BusSink {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let frame = CanFdFrame::padded(self.command_id, data)?;
        match self.transport.transmit(&frame) {
            Ok(()) => {
                self.metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
                error!("CAN-FD send failed: {}", e);
                Err(e)
            },
        }
    }
}

/// 周期泵与发送钩子共享的待发输出
///
/// 过程数据是完整映像，后写覆盖先写。
#[derive(Debug)]
pub struct PendingOutputs {
    size: usize,
    slot: Mutex<Option<Vec<u8>>>,
}

impl PendingOutputs {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            slot: Mutex::new(None),
        }
    }

    /// 取出待发输出（无则返回 `None`）
    pub fn take(&self) -> Option<Vec<u8>> {
        self.slot.lock().take()
    }
}

/// 周期发送钩子：只排队，不发送
pub struct CyclicSink {
    pending: Arc<PendingOutputs>,
    metrics: Arc<PumpMetrics>,
}

impl CyclicSink {
    pub fn new(pending: Arc<PendingOutputs>, metrics: Arc<PumpMetrics>) -> Self {
        Self { pending, metrics }
    }
}

impl FrameSink for CyclicSink {
    fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() != self.pending.size {
            self.metrics.tx_errors.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::BufferSize {
                expected: self.pending.size,
                actual: data.len(),
            });
        }
        *self.pending.slot.lock() = Some(data.to_vec());
        self.metrics.tx_frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ============================================================================
// 泵循环
// ============================================================================

#[cfg(feature = "realtime")]
fn raise_priority(name: &str) {
    use thread_priority::*;
    use tracing::info;

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => info!("{} thread priority set to MAX (realtime)", name),
        Err(e) => warn!(
            "Failed to set {} thread priority: {}. \
            On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
            name, e
        ),
    }
}

/// 总线接收泵
///
/// # 参数
/// - `transport`: 已打开的总线传输
/// - `binding`: 解码目标
/// - `response_id`: 只有该 ID 的帧会被解码
/// - `config`: 泵配置
/// - `is_running`: 运行标志
/// - `metrics`: 计数器
pub fn bus_pump_loop(
    transport: Arc<dyn BusTransport>,
    binding: Arc<dyn DeviceBinding>,
    response_id: u32,
    config: PumpConfig,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PumpMetrics>,
) {
    #[cfg(feature = "realtime")]
    raise_priority("Bus pump");

    while is_running.load(Ordering::Acquire) {
        match transport.receive(config.receive_timeout) {
            Ok(frames) => {
                for frame in frames {
                    if frame.id != response_id {
                        metrics.rx_filtered.fetch_add(1, Ordering::Relaxed);
                        trace!("RX: ignoring frame 0x{:X}", frame.id);
                        continue;
                    }
                    metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = binding.decode_canfd(frame.payload()) {
                        metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Failed to decode CAN-FD frame: {}", e);
                    }
                }
            },
            Err(TransportError::ReceiveTimeout) => {
                metrics.rx_timeouts.fetch_add(1, Ordering::Relaxed);
            },
            Err(e) => {
                metrics.rx_errors.fetch_add(1, Ordering::Relaxed);
                error!("CAN-FD receive error: {}", e);
            },
        }

        spin_sleep::sleep(config.bus_idle);
    }

    trace!("Bus pump: is_running flag is false, exiting");
}

/// 周期交换泵
///
/// 链路由泵线程独占，退出时交还给调用者以便关闭。
pub fn cyclic_pump_loop(
    mut link: Box<dyn CyclicTransport>,
    binding: Arc<dyn DeviceBinding>,
    pending: Arc<PendingOutputs>,
    config: PumpConfig,
    is_running: Arc<AtomicBool>,
    metrics: Arc<PumpMetrics>,
) -> Box<dyn CyclicTransport> {
    #[cfg(feature = "realtime")]
    raise_priority("Cyclic pump");

    let mut next_cycle = Instant::now();
    let mut last_decode: Option<Instant> = None;

    while is_running.load(Ordering::Acquire) {
        if let Some(outputs) = pending.take()
            && let Err(e) = link.set_outputs(&outputs)
        {
            error!("Failed to stage EtherCAT outputs: {}", e);
        }

        match link.exchange(config.exchange_timeout) {
            Ok(()) => {
                metrics.exchanges.fetch_add(1, Ordering::Relaxed);
                let due = last_decode.is_none_or(|t| t.elapsed() >= config.decode_period);
                if due {
                    last_decode = Some(Instant::now());
                    if let Err(e) = binding.decode_pdo(&link.inputs()) {
                        metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Failed to decode EtherCAT inputs: {}", e);
                    }
                }
            },
            Err(e) => {
                metrics.exchange_errors.fetch_add(1, Ordering::Relaxed);
                error!("EtherCAT exchange error: {}", e);
            },
        }

        next_cycle += config.cycle_period;
        let now = Instant::now();
        if next_cycle > now {
            spin_sleep::sleep(next_cycle - now);
        } else {
            // 落后一个周期以上时不追赶
            next_cycle = now;
        }
    }

    trace!("Cyclic pump: is_running flag is false, exiting");
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedHand;
    use lhand_protocol::command_id;
    use lhand_transport::mock::{MockBus, MockCyclicMaster};
    use std::thread;

    fn fast_config() -> PumpConfig {
        PumpConfig {
            receive_timeout: Duration::from_millis(2),
            ..PumpConfig::default()
        }
    }

    #[test]
    fn test_bus_sink_pads_to_64_bytes() {
        let bus = MockBus::new(1);
        let handle = bus.handle();
        bus.open(0, 0, &Default::default()).unwrap();
        let sink = BusSink::new(Arc::new(bus), command_id(1), Arc::new(PumpMetrics::new()));

        sink.send(&[0x10, 0x20, 0x30]).unwrap();

        let sent = handle.sent_frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, 0x501);
        assert_eq!(sent[0].len(), 64);
        assert_eq!(&sent[0].payload()[..3], &[0x10, 0x20, 0x30]);
        assert!(sent[0].payload()[3..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_cyclic_sink_rejects_wrong_length() {
        let pending = Arc::new(PendingOutputs::new(8));
        let sink = CyclicSink::new(pending.clone(), Arc::new(PumpMetrics::new()));
        assert!(matches!(
            sink.send(&[0; 4]),
            Err(TransportError::BufferSize {
                expected: 8,
                actual: 4
            })
        ));
        sink.send(&[1; 8]).unwrap();
        sink.send(&[2; 8]).unwrap();
        // 后写覆盖先写
        assert_eq!(pending.take(), Some(vec![2; 8]));
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn test_bus_pump_filters_by_response_id() {
        let bus = MockBus::new(1);
        let handle = bus.handle();
        bus.open(0, 0, &Default::default()).unwrap();
        let hand = Arc::new(SimulatedHand::new(6, 6));
        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(PumpMetrics::new());

        handle.inject(CanFdFrame::padded(0x123, &SimulatedHand::status_frame(0b1)).unwrap());
        handle.inject(CanFdFrame::padded(0x481, &SimulatedHand::status_frame(0b10)).unwrap());

        let pump = {
            let transport: Arc<dyn BusTransport> = Arc::new(bus);
            let binding: Arc<dyn DeviceBinding> = hand.clone();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            thread::spawn(move || {
                bus_pump_loop(transport, binding, 0x481, fast_config(), is_running, metrics)
            })
        };

        let deadline = Instant::now() + Duration::from_secs(1);
        while metrics.snapshot().rx_frames == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        is_running.store(false, Ordering::Release);
        pump.join().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rx_frames, 1);
        assert_eq!(snapshot.rx_filtered, 1);
        // 只有 0x481 的状态帧被解码：关节 2 报警
        assert!(!hand.get_alarm(1).unwrap());
        assert!(hand.get_alarm(2).unwrap());
    }

    #[test]
    fn test_cyclic_pump_writes_pending_and_returns_link() {
        let mut master = MockCyclicMaster::new(&["eth0"], 8, 8);
        let handle = master.handle();
        master.open("eth0").unwrap();
        let hand = Arc::new(SimulatedHand::new(6, 6));
        handle.set_inputs(&SimulatedHand::status_frame(0b100));

        let pending = Arc::new(PendingOutputs::new(8));
        let sink = CyclicSink::new(pending.clone(), Arc::new(PumpMetrics::new()));
        sink.send(&[7; 8]).unwrap();

        let is_running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(PumpMetrics::new());
        let pump = {
            let binding: Arc<dyn DeviceBinding> = hand.clone();
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            thread::spawn(move || {
                cyclic_pump_loop(
                    Box::new(master),
                    binding,
                    pending,
                    PumpConfig::default(),
                    is_running,
                    metrics,
                )
            })
        };

        let deadline = Instant::now() + Duration::from_secs(1);
        while metrics.snapshot().exchanges < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        is_running.store(false, Ordering::Release);
        let mut link = pump.join().unwrap();
        link.close().unwrap();

        assert_eq!(handle.written_outputs(), vec![vec![7; 8]]);
        assert!(hand.get_alarm(3).unwrap());
        assert_eq!(handle.close_count(), 1);
    }
}
