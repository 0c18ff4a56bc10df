//! Mock 传输（无硬件依赖）
//!
//! [`MockBus`] 和 [`MockCyclicMaster`] 在内部共享状态，`handle()` 返回的句柄
//! 在传输被移交给泵线程之后仍可用于注入数据和检查发送记录。

use crate::{
    BusTiming, BusTransport, CyclicTransport, DeviceError, DeviceErrorKind, LinkState,
    NetInterface, TransportError,
};
use lhand_protocol::CanFdFrame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// 总线传输
// ============================================================================

#[derive(Debug, Default)]
struct BusState {
    endpoints: usize,
    opened: Option<(usize, u8, BusTiming)>,
    fail_open: bool,
    fail_transmit: bool,
    sent: Vec<CanFdFrame>,
    rx_queue: VecDeque<CanFdFrame>,
    open_count: usize,
    close_count: usize,
}

#[derive(Debug, Default)]
struct BusShared {
    state: Mutex<BusState>,
    rx_ready: Condvar,
}

/// Mock CAN-FD 总线
#[derive(Debug, Clone)]
pub struct MockBus {
    shared: Arc<BusShared>,
}

/// [`MockBus`] 的观察/注入句柄
#[derive(Debug, Clone)]
pub struct MockBusHandle {
    shared: Arc<BusShared>,
}

impl MockBus {
    /// 创建带 `endpoints` 个适配器的 Mock 总线
    pub fn new(endpoints: usize) -> Self {
        let shared = Arc::new(BusShared::default());
        shared.state.lock().endpoints = endpoints;
        Self { shared }
    }

    pub fn handle(&self) -> MockBusHandle {
        MockBusHandle {
            shared: self.shared.clone(),
        }
    }
}

impl MockBusHandle {
    /// 注入一帧到接收队列
    pub fn inject(&self, frame: CanFdFrame) {
        self.shared.state.lock().rx_queue.push_back(frame);
        self.shared.rx_ready.notify_all();
    }

    /// 已发送的帧
    pub fn sent_frames(&self) -> Vec<CanFdFrame> {
        self.shared.state.lock().sent.clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.shared.state.lock().fail_open = fail;
    }

    pub fn set_fail_transmit(&self, fail: bool) {
        self.shared.state.lock().fail_transmit = fail;
    }

    pub fn is_open(&self) -> bool {
        self.shared.state.lock().opened.is_some()
    }

    /// 最近一次成功打开时的参数（索引、通道、时序）
    pub fn opened_with(&self) -> Option<(usize, u8, BusTiming)> {
        self.shared.state.lock().opened
    }

    pub fn open_count(&self) -> usize {
        self.shared.state.lock().open_count
    }

    pub fn close_count(&self) -> usize {
        self.shared.state.lock().close_count
    }
}

impl BusTransport for MockBus {
    fn scan(&self) -> Result<usize, TransportError> {
        Ok(self.shared.state.lock().endpoints)
    }

    fn endpoint_name(&self, index: usize) -> String {
        format!("mock-canfd{}", index)
    }

    fn open(&self, index: usize, channel: u8, timing: &BusTiming) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.fail_open {
            return Err(DeviceError::new(DeviceErrorKind::Busy, "mock open failure").into());
        }
        if index >= state.endpoints {
            return Err(DeviceError::new(
                DeviceErrorKind::NotFound,
                format!("no mock endpoint {}", index),
            )
            .into());
        }
        state.opened = Some((index, channel, *timing));
        state.open_count += 1;
        Ok(())
    }

    fn transmit(&self, frame: &CanFdFrame) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.opened.is_none() {
            return Err(TransportError::NotOpen);
        }
        if state.fail_transmit {
            return Err(TransportError::SendFailed("mock transmit failure".to_string()));
        }
        state.sent.push(*frame);
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Vec<CanFdFrame>, TransportError> {
        let mut state = self.shared.state.lock();
        if state.opened.is_none() {
            return Err(TransportError::NotOpen);
        }
        if state.rx_queue.is_empty() {
            self.shared.rx_ready.wait_for(&mut state, timeout);
        }
        if state.rx_queue.is_empty() {
            return Err(TransportError::ReceiveTimeout);
        }
        Ok(state.rx_queue.drain(..).collect())
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        if state.opened.take().is_some() {
            state.close_count += 1;
        }
        drop(state);
        self.shared.rx_ready.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.state.lock().opened.is_some()
    }
}

// ============================================================================
// 周期传输
// ============================================================================

#[derive(Debug)]
struct CyclicState {
    interfaces: Vec<NetInterface>,
    opened: Option<String>,
    fail_open: bool,
    slaves: usize,
    state: LinkState,
    max_state: LinkState,
    inputs: Vec<u8>,
    outputs: Vec<u8>,
    pending_write: bool,
    written: Vec<Vec<u8>>,
    exchange_count: usize,
    close_count: usize,
}

/// Mock EtherCAT 主站
#[derive(Debug)]
pub struct MockCyclicMaster {
    shared: Arc<Mutex<CyclicState>>,
}

/// [`MockCyclicMaster`] 的观察/注入句柄
#[derive(Debug, Clone)]
pub struct MockCyclicHandle {
    shared: Arc<Mutex<CyclicState>>,
}

impl MockCyclicMaster {
    /// 创建 Mock 主站
    ///
    /// # 参数
    /// - `interfaces`: 扫描时报告的网口名
    /// - `input_size` / `output_size`: 过程数据长度
    pub fn new(interfaces: &[&str], input_size: usize, output_size: usize) -> Self {
        let state = CyclicState {
            interfaces: interfaces
                .iter()
                .map(|name| NetInterface::new(*name, format!("mock {}", name)))
                .collect(),
            opened: None,
            fail_open: false,
            slaves: 1,
            state: LinkState::Init,
            max_state: LinkState::Operational,
            inputs: vec![0; input_size],
            outputs: vec![0; output_size],
            pending_write: false,
            written: Vec::new(),
            exchange_count: 0,
            close_count: 0,
        };
        Self {
            shared: Arc::new(Mutex::new(state)),
        }
    }

    pub fn handle(&self) -> MockCyclicHandle {
        MockCyclicHandle {
            shared: self.shared.clone(),
        }
    }
}

impl MockCyclicHandle {
    /// 从站能达到的最高状态
    pub fn set_max_state(&self, state: LinkState) {
        self.shared.lock().max_state = state;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.shared.lock().fail_open = fail;
    }

    /// 设置下一次交换后可见的输入数据
    pub fn set_inputs(&self, data: &[u8]) {
        let mut state = self.shared.lock();
        let len = state.inputs.len().min(data.len());
        state.inputs[..len].copy_from_slice(&data[..len]);
    }

    pub fn state(&self) -> LinkState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().opened.is_some()
    }

    /// 每次 `set_outputs` 之后第一次交换写出的输出
    pub fn written_outputs(&self) -> Vec<Vec<u8>> {
        self.shared.lock().written.clone()
    }

    pub fn exchange_count(&self) -> usize {
        self.shared.lock().exchange_count
    }

    pub fn close_count(&self) -> usize {
        self.shared.lock().close_count
    }
}

impl CyclicTransport for MockCyclicMaster {
    fn scan_interfaces(&mut self) -> Result<Vec<NetInterface>, TransportError> {
        Ok(self.shared.lock().interfaces.clone())
    }

    fn open(&mut self, interface: &str) -> Result<usize, TransportError> {
        let mut state = self.shared.lock();
        if state.fail_open || !state.interfaces.iter().any(|i| i.name == interface) {
            return Err(DeviceError::new(
                DeviceErrorKind::NotFound,
                format!("no slaves found on {}", interface),
            )
            .into());
        }
        state.opened = Some(interface.to_string());
        state.state = LinkState::Init;
        Ok(state.slaves)
    }

    fn request_state(&mut self, target: LinkState) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.opened.is_none() {
            return Err(TransportError::NotOpen);
        }
        state.state = target.min(state.max_state);
        Ok(())
    }

    fn check_state(
        &mut self,
        _expected: LinkState,
        _timeout: Duration,
    ) -> Result<LinkState, TransportError> {
        let state = self.shared.lock();
        if state.opened.is_none() {
            return Err(TransportError::NotOpen);
        }
        Ok(state.state)
    }

    fn exchange(&mut self, _timeout: Duration) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.opened.is_none() {
            return Err(TransportError::NotOpen);
        }
        if state.pending_write {
            let outputs = state.outputs.clone();
            state.written.push(outputs);
            state.pending_write = false;
        }
        state.exchange_count += 1;
        Ok(())
    }

    fn input_size(&self) -> usize {
        self.shared.lock().inputs.len()
    }

    fn output_size(&self) -> usize {
        self.shared.lock().outputs.len()
    }

    fn inputs(&self) -> Vec<u8> {
        self.shared.lock().inputs.clone()
    }

    fn set_outputs(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if data.len() != state.outputs.len() {
            return Err(TransportError::BufferSize {
                expected: state.outputs.len(),
                actual: data.len(),
            });
        }
        state.outputs.copy_from_slice(data);
        state.pending_write = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.shared.lock();
        if state.opened.take().is_some() {
            state.state = LinkState::Init;
            state.close_count += 1;
        }
        Ok(())
    }
}
