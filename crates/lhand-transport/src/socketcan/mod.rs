//! SocketCAN-FD 适配器（Linux）
//!
//! 比特率由系统配置（`ip link set canX type can bitrate 1000000 dbitrate 5000000 fd on`），
//! 适配器只负责检查网口状态、收发帧，不修改网口配置。

pub mod interface_check;

use crate::{BusTiming, BusTransport, DeviceError, DeviceErrorKind, TransportError};
use lhand_protocol::{CanFdFrame, len_to_dlc, response_id};
use parking_lot::{Mutex, RwLock};
use socketcan::{
    CanAnyFrame, CanFdFrame as SocketFdFrame, CanFdSocket, CanFilter, EmbeddedFrame, Frame,
    Socket, SocketOptions, StandardId,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub use interface_check::{check_interface_status, list_can_interfaces};

/// 默认 sysfs 网口目录
const SYSFS_NET: &str = "/sys/class/net";

/// SocketCAN-FD 总线传输
///
/// socket 放在 `Arc` 中：接收线程克隆一份后释放锁再阻塞读，发送不会被读阻塞。
pub struct SocketCanFd {
    sysfs_root: PathBuf,
    node_id: u8,
    only: Option<String>,
    interfaces: Mutex<Vec<String>>,
    socket: RwLock<Option<Arc<CanFdSocket>>>,
    read_timeout: Mutex<Option<Duration>>,
}

impl SocketCanFd {
    /// 创建适配器（只接收 `node_id` 对应的应答帧）
    pub fn new(node_id: u8) -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_NET),
            node_id,
            only: None,
            interfaces: Mutex::new(Vec::new()),
            socket: RwLock::new(None),
            read_timeout: Mutex::new(None),
        }
    }

    /// 只把名为 `name` 的接口当作端点
    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.only = Some(name.into());
        self
    }

    /// 当前打开的 socket
    fn socket(&self) -> Result<Arc<CanFdSocket>, TransportError> {
        self.socket.read().clone().ok_or(TransportError::NotOpen)
    }

    fn apply_read_timeout(
        &self,
        socket: &CanFdSocket,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut current = self.read_timeout.lock();
        if *current != Some(timeout) {
            socket.set_read_timeout(timeout)?;
            *current = Some(timeout);
        }
        Ok(())
    }

    fn convert_rx(&self, frame: CanAnyFrame) -> Option<CanFdFrame> {
        let (id, data) = match &frame {
            CanAnyFrame::Fd(f) => (f.raw_id(), f.data()),
            CanAnyFrame::Normal(f) => (f.raw_id(), f.data()),
            _ => {
                trace!("RX: ignoring non-data frame");
                return None;
            },
        };
        let dlc = len_to_dlc(data.len())?;
        Some(CanFdFrame::from_raw(id, dlc, data))
    }
}

impl Default for SocketCanFd {
    fn default() -> Self {
        Self::new(lhand_protocol::DEFAULT_NODE_ID)
    }
}

impl BusTransport for SocketCanFd {
    fn scan(&self) -> Result<usize, TransportError> {
        let mut names = list_can_interfaces(&self.sysfs_root)?;
        if let Some(only) = &self.only {
            names.retain(|name| name == only);
        }
        let count = names.len();
        debug!("SocketCAN scan found {} interface(s): {:?}", count, names);
        *self.interfaces.lock() = names;
        Ok(count)
    }

    fn endpoint_name(&self, index: usize) -> String {
        self.interfaces
            .lock()
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("CANFD device {}", index))
    }

    fn open(&self, index: usize, channel: u8, timing: &BusTiming) -> Result<(), TransportError> {
        let name = self.interfaces.lock().get(index).cloned().ok_or_else(|| {
            DeviceError::new(
                DeviceErrorKind::NotFound,
                format!("No CAN-FD interface at index {}", index),
            )
        })?;

        if channel != 0 {
            debug!(
                "SocketCAN exposes one channel per interface, ignoring channel {}",
                channel
            );
        }

        if !check_interface_status(&name)? {
            return Err(DeviceError::new(
                DeviceErrorKind::Busy,
                format!(
                    "CAN-FD interface '{}' is DOWN. Bring it up with:\n  sudo ip link set {} up type can bitrate {} dbitrate {} fd on",
                    name, name, timing.nominal_bitrate, timing.data_bitrate
                ),
            )
            .into());
        }

        let socket = CanFdSocket::open(&name).map_err(|e| {
            DeviceError::new(
                DeviceErrorKind::Backend,
                format!("Failed to open CAN-FD socket on '{}': {}", name, e),
            )
        })?;

        let filter = CanFilter::new(response_id(self.node_id), 0x7FF);
        socket.set_filters(&[filter])?;

        info!(
            "SocketCAN-FD opened on '{}' (expected bitrate {}/{} bps, configured by the system)",
            name, timing.nominal_bitrate, timing.data_bitrate
        );
        *self.read_timeout.lock() = None;
        *self.socket.write() = Some(Arc::new(socket));
        Ok(())
    }

    fn transmit(&self, frame: &CanFdFrame) -> Result<(), TransportError> {
        let socket = self.socket()?;
        let id = StandardId::new(frame.id as u16).ok_or_else(|| {
            TransportError::SendFailed(format!("Invalid standard ID 0x{:X}", frame.id))
        })?;
        let fd_frame = SocketFdFrame::new(id, frame.payload()).ok_or_else(|| {
            TransportError::SendFailed(format!(
                "Failed to build CAN-FD frame with {} bytes",
                frame.len()
            ))
        })?;
        socket.write_frame(&fd_frame).map_err(|e| {
            TransportError::SendFailed(format!("SocketCAN-FD write error: {}", e))
        })?;
        trace!("TX: ID=0x{:X}, len={}", frame.id, frame.len());
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Vec<CanFdFrame>, TransportError> {
        let socket = self.socket()?;
        self.apply_read_timeout(&socket, timeout)?;
        match socket.read_frame() {
            Ok(frame) => Ok(self.convert_rx(frame).into_iter().collect()),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                Err(TransportError::ReceiveTimeout)
            },
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        if let Some(socket) = self.socket.write().take() {
            let refs = Arc::strong_count(&socket);
            if refs > 1 {
                warn!("Closing CAN-FD socket while {} reader(s) still hold it", refs - 1);
            }
            info!("SocketCAN-FD closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.read().is_some()
    }
}
