//! UDP 手套接收器
//!
//! 接收线程使用读超时轮询停止标志，不需要向自己发包唤醒。

use crate::error::TeleopError;
use crate::frame::{GloveFrame, decode_datagram};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 默认监听地址
pub const DEFAULT_BIND: &str = "127.0.0.1:7777";

const BUFFER_SIZE: usize = 4096;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// 帧队列容量；满时丢弃新帧，后续帧会覆盖
const QUEUE_CAPACITY: usize = 64;

/// UDP 手套接收器
pub struct GloveReceiver {
    local_addr: SocketAddr,
    frames: Receiver<GloveFrame>,
    is_running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl GloveReceiver {
    /// 绑定并启动接收线程
    ///
    /// # 错误
    ///
    /// - `TeleopError::Bind`: 地址无效或端口被占用
    pub fn bind(addr: &str) -> Result<Self, TeleopError> {
        let bind_error = |source| TeleopError::Bind {
            addr: addr.to_string(),
            source,
        };
        let socket = UdpSocket::bind(addr).map_err(bind_error)?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let (tx, rx) = bounded(QUEUE_CAPACITY);
        let is_running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));

        let worker = {
            let is_running = is_running.clone();
            let dropped = dropped.clone();
            std::thread::Builder::new()
                .name("lhand-glove-rx".into())
                .spawn(move || receive_loop(socket, tx, is_running, dropped))
                .map_err(TeleopError::Spawn)?
        };
        info!("Glove receiver listening on {}", local_addr);

        Ok(Self {
            local_addr,
            frames: rx,
            is_running,
            dropped,
            worker: Some(worker),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 解码后的帧
    pub fn frames(&self) -> Receiver<GloveFrame> {
        self.frames.clone()
    }

    /// 因队列满被丢弃的帧数
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 停止接收并 join（可重复调用）
    pub fn stop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Glove receiver thread panicked");
            }
            info!("Glove receiver stopped");
        }
    }
}

impl Drop for GloveReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    tx: Sender<GloveFrame>,
    is_running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
) {
    let mut buffer = [0u8; BUFFER_SIZE];
    while is_running.load(Ordering::Acquire) {
        let len = match socket.recv_from(&mut buffer) {
            Ok((0, _)) => continue,
            Ok((len, from)) => {
                trace!("Glove datagram of {} bytes from {}", len, from);
                len
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            },
            Err(e) => {
                warn!("Glove receive error: {}", e);
                continue;
            },
        };

        let frames = match decode_datagram(&buffer[..len]) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Dropping glove datagram: {}", e);
                continue;
            },
        };
        for frame in frames {
            match tx.try_send(frame) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                },
                Err(TrySendError::Disconnected(_)) => {
                    debug!("Glove frame consumer gone, receiver exiting");
                    is_running.store(false, Ordering::Release);
                    return;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receives_and_decodes() {
        let mut receiver = GloveReceiver::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(
                br#"{"teleop_1": {"Parameter": [{"Name": "R_CalibrationStatus", "Value": 3}]}}"#,
                receiver.local_addr(),
            )
            .unwrap();

        let frame = receiver
            .frames()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(frame.device_name, "teleop_1");
        assert!(frame.right_calibrated);

        receiver.stop();
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_garbage_is_skipped() {
        let receiver = GloveReceiver::bind("127.0.0.1:0").unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"garbage", receiver.local_addr()).unwrap();
        sender
            .send_to(br#"{"teleop_2": {}}"#, receiver.local_addr())
            .unwrap();
        let frame = receiver
            .frames()
            .recv_timeout(Duration::from_secs(2))
            .unwrap();
        assert_eq!(frame.device_name, "teleop_2");
    }

    #[test]
    fn test_bind_failure() {
        let first = GloveReceiver::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().to_string();
        assert!(matches!(
            GloveReceiver::bind(&addr),
            Err(TeleopError::Bind { .. })
        ));
    }
}
