//! EtherCAT 链路状态机
//!
//! 从站状态按 INIT → PRE-OP → SAFE-OP → OP 逐级推进。
//! [`bring_up`] 在每一级都要求至少一次过程数据交换，任何一级失败都会把链路拉回 INIT。

use crate::{CyclicTransport, TransportError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 从站状态（数值与 ESC AL 状态寄存器一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkState {
    None = 0x00,
    Init = 0x01,
    PreOperational = 0x02,
    Bootstrap = 0x03,
    SafeOperational = 0x04,
    Operational = 0x08,
}

/// 链路建立各阶段的超时
#[derive(Debug, Clone, Copy)]
pub struct LinkTimeouts {
    /// 单次过程数据交换超时
    pub exchange: Duration,
    /// 等待 PRE-OP / SAFE-OP 的超时
    pub state_check: Duration,
    /// 每轮等待 OP 的超时
    pub op_check: Duration,
    /// 等待 OP 的最大轮数
    pub op_attempts: u32,
    /// 两轮之间的间隔
    pub op_retry_interval: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            exchange: Duration::from_millis(2),
            state_check: Duration::from_millis(50),
            op_check: Duration::from_millis(5),
            op_attempts: 10,
            op_retry_interval: Duration::from_millis(50),
        }
    }
}

/// 将已打开的链路推进到 OPERATIONAL
///
/// 每个阶段都先交换一次过程数据再检查状态，从站在没有看到周期数据时不会进入 SAFE-OP/OP。
///
/// # 错误
/// - `TransportError::LinkState`: 某一级未达到，此时已请求 INIT
/// - 传输层其它错误原样返回（同样会先请求 INIT）
pub fn bring_up(link: &mut dyn CyclicTransport, timeouts: &LinkTimeouts) -> Result<(), TransportError> {
    match advance(link, timeouts) {
        Ok(()) => {
            info!("EtherCAT link reached OPERATIONAL");
            Ok(())
        },
        Err(e) => {
            warn!("EtherCAT bring-up failed: {}, returning link to INIT", e);
            if let Err(reset) = link.request_state(LinkState::Init) {
                warn!("Failed to request INIT after bring-up failure: {}", reset);
            }
            Err(e)
        },
    }
}

fn advance(link: &mut dyn CyclicTransport, timeouts: &LinkTimeouts) -> Result<(), TransportError> {
    for target in [LinkState::PreOperational, LinkState::SafeOperational] {
        link.request_state(target)?;
        link.exchange(timeouts.exchange)?;
        let reached = link.check_state(target, timeouts.state_check)?;
        if reached != target {
            return Err(TransportError::LinkState { target, reached });
        }
        debug!("EtherCAT link reached {:?}", target);
    }

    link.exchange(timeouts.exchange)?;
    link.request_state(LinkState::Operational)?;

    let mut reached = LinkState::SafeOperational;
    for attempt in 1..=timeouts.op_attempts {
        link.exchange(timeouts.exchange)?;
        reached = link.check_state(LinkState::Operational, timeouts.op_check)?;
        if reached == LinkState::Operational {
            debug!("EtherCAT OPERATIONAL after {} attempt(s)", attempt);
            return Ok(());
        }
        std::thread::sleep(timeouts.op_retry_interval);
    }

    Err(TransportError::LinkState {
        target: LinkState::Operational,
        reached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCyclicMaster;

    fn fast() -> LinkTimeouts {
        LinkTimeouts {
            op_retry_interval: Duration::from_millis(1),
            ..LinkTimeouts::default()
        }
    }

    #[test]
    fn test_bring_up_reaches_operational() {
        let mut master = MockCyclicMaster::new(&["enp3s0"], 16, 16);
        let handle = master.handle();
        master.open("enp3s0").unwrap();

        bring_up(&mut master, &fast()).unwrap();

        assert_eq!(handle.state(), LinkState::Operational);
        // 每一级至少一次交换
        assert!(handle.exchange_count() >= 4);
    }

    #[test]
    fn test_bring_up_stuck_in_safe_op_returns_to_init() {
        let mut master = MockCyclicMaster::new(&["enp3s0"], 16, 16);
        let handle = master.handle();
        handle.set_max_state(LinkState::SafeOperational);
        master.open("enp3s0").unwrap();

        let err = bring_up(&mut master, &fast()).unwrap_err();
        match err {
            TransportError::LinkState { target, reached } => {
                assert_eq!(target, LinkState::Operational);
                assert_eq!(reached, LinkState::SafeOperational);
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(handle.state(), LinkState::Init);
    }

    #[test]
    fn test_bring_up_stuck_in_pre_op() {
        let mut master = MockCyclicMaster::new(&["enp3s0"], 16, 16);
        let handle = master.handle();
        handle.set_max_state(LinkState::PreOperational);
        master.open("enp3s0").unwrap();

        match bring_up(&mut master, &fast()) {
            Err(TransportError::LinkState { target, .. }) => {
                assert_eq!(target, LinkState::SafeOperational)
            },
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(handle.state(), LinkState::Init);
    }

    #[test]
    fn test_link_state_ordering() {
        assert!(LinkState::Init < LinkState::PreOperational);
        assert!(LinkState::SafeOperational < LinkState::Operational);
    }
}
