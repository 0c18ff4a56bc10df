//! 会话生命周期集成测试
//!
//! 验证：
//! 1. CAN-FD / EtherCAT 连接流程与自由度
//! 2. 任一阶段失败时完整回滚
//! 3. 断开幂等
//! 4. 发送钩子与后台泵贯通

use lhand_driver::{
    BindingCall, BindingFactory, ConnectError, DeviceBinding, PumpConfig, SessionBuilder,
    SimulatedHand, TransportKind,
};
use lhand_protocol::{ALL_JOINTS, CommMode, ControlMode, VendorError, VendorErrorCode};
use lhand_transport::mock::{MockBus, MockCyclicMaster};
use lhand_transport::{BusTiming, LinkState, LinkTimeouts, OperatorPrompt, SelectionError};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn factory(hand: &Arc<SimulatedHand>) -> BindingFactory {
    let hand = hand.clone();
    Arc::new(move || Ok::<_, VendorError>(hand.clone() as Arc<dyn DeviceBinding>))
}

fn quick_links() -> LinkTimeouts {
    LinkTimeouts {
        op_retry_interval: Duration::from_millis(1),
        ..LinkTimeouts::default()
    }
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// 单个 CAN-FD 设备，1M/5M：连接成功且自由度为 (6, 6)
#[test]
fn test_canfd_single_device_connects_with_dof() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();

    let timing = BusTiming {
        nominal_bitrate: 1_000_000,
        data_bitrate: 5_000_000,
    };
    let mut session = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .auto_select(false)
        .bus_timing(timing)
        .enable_wait(Duration::ZERO)
        .connect()
        .expect("connect should succeed");

    assert!(session.is_connected());
    assert_eq!(session.mode(), CommMode::CanFd);
    assert_eq!(session.get_dof(), (6, 6));
    assert_eq!(bus_handle.opened_with(), Some((0, 0, timing)));

    // 初始化顺序：initialize → get_dof → 位置模式 → 使能
    let calls = hand.calls();
    assert_eq!(
        &calls[..4],
        &[
            BindingCall::Initialize(CommMode::CanFd),
            BindingCall::GetDof,
            BindingCall::SetControlMode {
                joint: ALL_JOINTS,
                mode: ControlMode::Position
            },
            BindingCall::SetEnable {
                joint: ALL_JOINTS,
                enable: true
            },
        ]
    );

    // 使能命令经钩子以 0x501、64 字节发出
    let sent = bus_handle.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, 0x501);
    assert_eq!(sent[0].len(), 64);

    session.disconnect().unwrap();
    assert!(!bus_handle.is_open());
}

/// 后台泵把 0x481 的状态帧交给绑定
#[test]
fn test_bus_pump_feeds_binding() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();
    let mut session = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .enable_motors(false)
        .pump_config(PumpConfig {
            receive_timeout: Duration::from_millis(2),
            ..PumpConfig::default()
        })
        .connect()
        .unwrap();

    bus_handle.inject(
        lhand_protocol::CanFdFrame::padded(0x481, &SimulatedHand::status_frame(0b1)).unwrap(),
    );
    assert!(wait_until(Duration::from_secs(1), || hand.decoded_frames() == 1));
    assert!(hand.get_alarm(1).unwrap());
    assert_eq!(session.pump_metrics().rx_frames, 1);

    session.disconnect().unwrap();
}

/// 断开幂等：重复断开不会重复关闭传输
#[test]
fn test_disconnect_is_idempotent() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();
    let mut session = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .enable_motors(false)
        .connect()
        .unwrap();

    session.disconnect().unwrap();
    session.disconnect().unwrap();
    session.disconnect().unwrap();

    assert!(!session.is_connected());
    assert_eq!(bus_handle.close_count(), 1);
    assert_eq!(hand.count("close"), 1);
    assert!(!hand.has_send_hook());

    // Drop 之后也不会再次关闭
    drop(session);
    assert_eq!(bus_handle.close_count(), 1);
}

/// Drop 时自动断开
#[test]
fn test_drop_disconnects() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();
    {
        let _session = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
            .enable_motors(false)
            .connect()
            .unwrap();
        assert!(bus_handle.is_open());
    }
    assert!(!bus_handle.is_open());
    assert_eq!(hand.count("close"), 1);
}

/// 没有设备：DeviceNotFound
#[test]
fn test_no_devices() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let err = SessionBuilder::new(TransportKind::Bus(Arc::new(MockBus::new(0))), factory(&hand))
        .connect()
        .err()
        .unwrap();
    assert!(matches!(err, ConnectError::DeviceNotFound(_)));
}

/// 显式索引越界：InvalidSelection
#[test]
fn test_explicit_index_out_of_range() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(2);
    let bus_handle = bus.handle();
    let err = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .device_index(5)
        .connect()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ConnectError::InvalidSelection(SelectionError::OutOfRange { index: 5, count: 2 })
    ));
    assert_eq!(bus_handle.open_count(), 0);
}

/// 固定回答的操作员交互
struct Choose(usize);

impl OperatorPrompt for Choose {
    fn choose(&mut self, _message: &str, endpoints: &[String]) -> Option<usize> {
        assert_eq!(endpoints.len(), 2);
        Some(self.0)
    }
}

/// 多个端点且不自动选择：由交互决定；缺省交互直接放弃
#[test]
fn test_operator_chooses_endpoint() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(2);
    let bus_handle = bus.handle();
    let mut session = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .auto_select(false)
        .enable_wait(Duration::ZERO)
        .prompt(Box::new(Choose(1)))
        .connect()
        .unwrap();
    assert_eq!(bus_handle.opened_with().map(|(index, _, _)| index), Some(1));
    session.disconnect().unwrap();

    let err = SessionBuilder::new(TransportKind::Bus(Arc::new(MockBus::new(2))), factory(&hand))
        .auto_select(false)
        .connect()
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ConnectError::InvalidSelection(SelectionError::Aborted)
    ));
}

/// 打开失败：DeviceInit，绑定未初始化
#[test]
fn test_bus_open_failure() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();
    bus_handle.set_fail_open(true);

    let err = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .connect()
        .err()
        .unwrap();
    assert!(matches!(err, ConnectError::DeviceInit(_)));
    assert!(!bus_handle.is_open());
    assert!(!hand.is_initialized());
}

/// 厂商库初始化失败：传输关闭、钩子清除、泵停止
#[test]
fn test_initialize_failure_rolls_back() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    hand.fail_on("initialize", VendorErrorCode::CommConnect);
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();

    let err = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .connect()
        .err()
        .unwrap();
    match err {
        ConnectError::Binding(e) => assert_eq!(e.code, VendorErrorCode::CommConnect),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!bus_handle.is_open());
    assert_eq!(bus_handle.close_count(), 1);
    assert!(!hand.has_send_hook());
}

/// 主动自由度为 0：DeviceInit
#[test]
fn test_zero_active_dof_is_device_init() {
    let hand = Arc::new(SimulatedHand::new(6, 0));
    let bus = MockBus::new(1);
    let bus_handle = bus.handle();
    let err = SessionBuilder::new(TransportKind::Bus(Arc::new(bus)), factory(&hand))
        .connect()
        .err()
        .unwrap();
    assert!(matches!(err, ConnectError::DeviceInit(_)));
    assert!(!bus_handle.is_open());
}

/// EtherCAT：过滤虚拟网口，爬升到 OP，命令进入过程数据
#[test]
fn test_ethercat_connects_and_queues_outputs() {
    let hand = Arc::new(SimulatedHand::new(6, 6).with_record_len(64));
    let master = MockCyclicMaster::new(&["lo", "docker0", "enp3s0"], 64, 64);
    let link = master.handle();

    let mut session =
        SessionBuilder::new(TransportKind::Cyclic(Box::new(master)), factory(&hand))
            .auto_select(false)
            .link_timeouts(quick_links())
            .enable_wait(Duration::ZERO)
            .connect()
            .unwrap();

    assert_eq!(session.mode(), CommMode::EtherCat);
    assert_eq!(link.state(), LinkState::Operational);
    assert!(wait_until(Duration::from_secs(1), || !link
        .written_outputs()
        .is_empty()));
    // 使能命令（0x01）写入过程数据
    assert_eq!(link.written_outputs()[0][0], 0x01);

    session.disconnect().unwrap();
    assert_eq!(link.state(), LinkState::Init);
    assert_eq!(link.close_count(), 1);
}

/// EtherCAT 达不到 OP：LinkNotOperational，链路不会停在 OP
#[test]
fn test_ethercat_link_not_operational() {
    let hand = Arc::new(SimulatedHand::new(6, 6));
    let master = MockCyclicMaster::new(&["eth0"], 64, 64);
    let link = master.handle();
    link.set_max_state(LinkState::SafeOperational);

    let err = SessionBuilder::new(TransportKind::Cyclic(Box::new(master)), factory(&hand))
        .link_timeouts(quick_links())
        .connect()
        .err()
        .unwrap();
    assert!(matches!(err, ConnectError::LinkNotOperational(_)));
    assert_ne!(link.state(), LinkState::Operational);
    assert!(!link.is_open());
    assert!(!hand.is_initialized());
}
