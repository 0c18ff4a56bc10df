//! 链路建立集成测试
//!
//! 覆盖连接前半段的公共 API 组合：扫描 → 过滤 → 选择 → 打开 → 状态爬升。

use lhand_transport::mock::{MockBus, MockCyclicMaster};
use lhand_transport::{
    BusTiming, BusTransport, CyclicTransport, LinkState, LinkTimeouts, OperatorPrompt,
    SelectionError, TransportError, bring_up, filter_physical, select_endpoint,
};
use std::time::Duration;

/// 任何读取都视为测试失败的交互
struct NoPrompt;

impl OperatorPrompt for NoPrompt {
    fn choose(&mut self, message: &str, _endpoints: &[String]) -> Option<usize> {
        panic!("operator prompt must not be used: {}", message);
    }
}

fn quick_timeouts() -> LinkTimeouts {
    LinkTimeouts {
        op_retry_interval: Duration::from_millis(1),
        ..LinkTimeouts::default()
    }
}

/// 只有一块物理网卡时自动选中，且爬升到 OP
#[test]
fn test_single_physical_interface_auto_selected_and_operational() {
    let mut master = MockCyclicMaster::new(&["lo", "docker0", "enp3s0", "wlp2s0"], 32, 32);
    let handle = master.handle();

    let physical = filter_physical(master.scan_interfaces().unwrap());
    let names: Vec<String> = physical.iter().map(|i| i.name.clone()).collect();
    assert_eq!(names, vec!["enp3s0".to_string()]);

    let index = select_endpoint(&names, None, false, &mut NoPrompt).unwrap();
    let slaves = master.open(&names[index]).unwrap();
    assert_eq!(slaves, 1);

    bring_up(&mut master, &quick_timeouts()).unwrap();
    assert_eq!(handle.state(), LinkState::Operational);
}

/// 只有虚拟网卡时没有可选端点
#[test]
fn test_only_virtual_interfaces_yields_no_endpoints() {
    let mut master = MockCyclicMaster::new(&["lo", "veth0", "virbr0"], 8, 8);
    let names: Vec<String> = filter_physical(master.scan_interfaces().unwrap())
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(
        select_endpoint(&names, None, false, &mut NoPrompt),
        Err(SelectionError::NoEndpoints)
    );
}

/// 链路卡在 SAFE-OP 时不会停留在 OP，关闭后回到 INIT
#[test]
fn test_failed_bring_up_never_leaves_link_operational() {
    let mut master = MockCyclicMaster::new(&["eth0"], 8, 8);
    let handle = master.handle();
    handle.set_max_state(LinkState::SafeOperational);
    master.open("eth0").unwrap();

    let err = bring_up(&mut master, &quick_timeouts()).unwrap_err();
    assert!(matches!(err, TransportError::LinkState { .. }));
    assert_ne!(handle.state(), LinkState::Operational);

    master.close().unwrap();
    master.close().unwrap();
    assert_eq!(handle.close_count(), 1);
}

/// CAN-FD：单个适配器自动选择，按 1M/5M 打开
#[test]
fn test_single_bus_adapter_opened_with_requested_timing() {
    let bus = MockBus::new(1);
    let handle = bus.handle();
    let count = bus.scan().unwrap();
    let names: Vec<String> = (0..count).map(|i| bus.endpoint_name(i)).collect();

    let index = select_endpoint(&names, None, false, &mut NoPrompt).unwrap();
    let timing = BusTiming {
        nominal_bitrate: 1_000_000,
        data_bitrate: 5_000_000,
    };
    bus.open(index, 0, &timing).unwrap();

    assert_eq!(handle.opened_with(), Some((0, 0, timing)));
    bus.close().unwrap();
    assert!(!handle.is_open());
}
