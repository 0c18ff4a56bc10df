//! 运动引擎
//!
//! [`MotionEngine`] 持有会话、运动状态和当前运动生产者。
//!
//! # 并发模型
//!
//! - 一把 `parking_lot::Mutex<EngineState>` 保护状态、取消标志和 generation 计数，
//!   配合一个 `Condvar` 用于生产者退出通知和可中断驻留
//! - 设备调用从不在锁内进行，慢 I/O 不会阻塞状态查询
//! - 取消标志只在持锁时置位并 `notify_all`，驻留中的工作线程不会丢失唤醒
//! - 观察者回调在锁外触发；每次状态变化在锁内编号，投递按编号进行，
//!   被更新变化赶超的旧事件直接丢弃

use crate::error::MotionError;
use crate::observer::MotionObserver;
use crate::request::{AngleRequest, GraspRoutine, MotionCycle, MotionRequest, ZeroMove};
use crate::state::MotionState;
use arc_swap::ArcSwap;
use lhand_driver::{ConnectError, DeviceBinding, DeviceSession};
use lhand_protocol::{ALL_JOINTS, ControlMode};
use lhand_transport::TransportError;
use parking_lot::{Condvar, Mutex, MutexGuard, ReentrantMutex};
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 引擎配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// 循环与抓握每步前是否检查报警
    pub alarm_check: bool,
    /// 启动新生产者时等待旧生产者退出的上限
    pub exclusive_wait: Duration,
    /// `stop()` 之后的回零参数
    pub return_to_zero: ZeroMove,
    /// `stop()` 发出停止命令后的等待
    pub stop_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alarm_check: true,
            exclusive_wait: Duration::from_millis(500),
            return_to_zero: ZeroMove::default(),
            stop_settle: Duration::from_millis(100),
        }
    }
}

/// 序列结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 所有遍数（或重复次数）完成
    Completed,
    /// 被 `stop()`、断开或其它生产者打断
    Cancelled,
    /// 检测到报警并中止
    Alarm,
}

/// 循环/抓握结束报告
///
/// 抓握序列中 `passes_completed` 为已完成的重复次数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub passes_completed: u64,
    pub outcome: CycleOutcome,
}

/// 遥操作租约
///
/// 只有持有当前租约的一方可以下发遥操作目标；租约在 `stop_teleop()`、
/// `stop()` 或其它生产者启动后失效。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeleopLease {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerKind {
    Cycle,
    Home,
    Grasp,
    Teleop,
}

struct Producer {
    kind: ProducerKind,
    generation: u64,
    cancel: Arc<AtomicBool>,
}

#[derive(Clone)]
struct Device {
    binding: Arc<dyn DeviceBinding>,
    dof_total: u32,
    dof_active: u32,
}

#[derive(Default)]
struct EngineState {
    state: MotionState,
    device: Option<Device>,
    session: Option<DeviceSession>,
    producer: Option<Producer>,
    generation: u64,
    alarm_latched: bool,
    change_seq: u64,
}

/// 一次状态变化（`seq` 在状态锁内分配）
#[derive(Debug, Clone, Copy)]
struct StateChange {
    old: MotionState,
    new: MotionState,
    seq: u64,
}

impl EngineState {
    /// 生产者结束后的静止状态
    fn resting_state(&self) -> MotionState {
        if self.device.is_none() {
            MotionState::Idle
        } else if self.alarm_latched {
            MotionState::Alarm
        } else {
            MotionState::Ready
        }
    }

    fn set_state(&mut self, new: MotionState) -> Option<StateChange> {
        let old = self.state;
        if old == new {
            return None;
        }
        self.state = new;
        self.change_seq += 1;
        Some(StateChange {
            old,
            new,
            seq: self.change_seq,
        })
    }
}

struct Shared {
    config: EngineConfig,
    inner: Mutex<EngineState>,
    changed: Condvar,
    observers: ArcSwap<Vec<Arc<dyn MotionObserver>>>,
    /// 最后投递的变化编号；可重入，观察者回调里再次改变状态不会自锁
    delivered: ReentrantMutex<Cell<u64>>,
    next_sequence_id: AtomicU64,
}

/// 生产者凭证：worker 持有的设备句柄和取消标志
struct Ticket {
    generation: u64,
    cancel: Arc<AtomicBool>,
    device: Device,
}

impl Ticket {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

/// 生产者结束时释放互斥（仅当 generation 仍匹配）
struct ProducerGuard {
    engine: MotionEngine,
    generation: u64,
}

impl Drop for ProducerGuard {
    fn drop(&mut self) {
        self.engine.finish_producer(self.generation);
    }
}

enum StepResult {
    Done,
    Cancelled,
    Alarm,
}

/// 运动引擎
///
/// `Clone` 只复制内部 `Arc`，所有克隆共享同一状态。
///
/// # Example
///
/// ```rust,no_run
/// use lhand_motion::{MotionCycle, MotionEngine, MotionRequest, RepeatCount};
/// use std::time::Duration;
///
/// # fn demo(engine: MotionEngine) -> Result<(), lhand_motion::MotionError> {
/// let step = |p: i32| MotionRequest::new(vec![p, p, 0, 0, 0, 0], 20000, 1000, Duration::from_secs(1));
/// let cycle = MotionCycle::new(vec![step(10000), step(0)], RepeatCount::Finite(2));
/// let report = engine.run_cycle(cycle)?;
/// println!("{} passes", report.passes_completed);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MotionEngine {
    shared: Arc<Shared>,
}

impl Default for MotionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MotionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(EngineState::default()),
                changed: Condvar::new(),
                observers: ArcSwap::from_pointee(Vec::new()),
                delivered: ReentrantMutex::new(Cell::new(0)),
                next_sequence_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// 注册观察者
    pub fn subscribe(&self, observer: Arc<dyn MotionObserver>) {
        self.shared.observers.rcu(|list| {
            let mut list = Vec::clone(list);
            list.push(observer.clone());
            list
        });
    }

    // ============================================================
    // 连接管理
    // ============================================================

    /// 建立会话：`Idle → Connecting → Ready`，失败回到 `Idle`
    ///
    /// 已有会话时先断开。
    pub fn connect_with<F>(&self, connect: F) -> Result<(), ConnectError>
    where
        F: FnOnce() -> Result<DeviceSession, ConnectError>,
    {
        if self.is_connected()
            && let Err(e) = self.disconnect()
        {
            warn!("Failed to close previous session: {}", e);
        }

        let change = self.shared.inner.lock().set_state(MotionState::Connecting);
        self.emit_state(change);

        match connect() {
            Ok(session) => {
                self.install(Some(session), None);
                Ok(())
            },
            Err(e) => {
                let change = self.shared.inner.lock().set_state(MotionState::Idle);
                self.emit_state(change);
                error!("Connection failed: {}", e);
                Err(e)
            },
        }
    }

    /// 接管一个已连接的会话
    pub fn attach(&self, session: DeviceSession) -> Result<(), MotionError> {
        if !session.is_connected() {
            return Err(MotionError::NotConnected);
        }
        if self.is_connected()
            && let Err(e) = self.disconnect()
        {
            warn!("Failed to close previous session: {}", e);
        }
        self.install(Some(session), None);
        Ok(())
    }

    /// 直接接管一个已初始化的绑定（会话由调用方管理）
    ///
    /// # 错误
    ///
    /// - `MotionError::DeviceFault`: `get_dof` 失败
    /// - `MotionError::NotConnected`: 主动自由度为 0
    pub fn attach_binding(&self, binding: Arc<dyn DeviceBinding>) -> Result<(), MotionError> {
        let (total, active) = binding.get_dof()?;
        if active == 0 {
            return Err(MotionError::NotConnected);
        }
        if self.is_connected()
            && let Err(e) = self.disconnect()
        {
            warn!("Failed to close previous session: {}", e);
        }
        self.install(
            None,
            Some(Device {
                binding,
                dof_total: total,
                dof_active: active,
            }),
        );
        Ok(())
    }

    fn install(&self, session: Option<DeviceSession>, device: Option<Device>) {
        let device = match (&session, device) {
            (_, Some(device)) => device,
            (Some(s), None) => {
                let (total, active) = s.get_dof();
                Device {
                    binding: s.binding(),
                    dof_total: total,
                    dof_active: active,
                }
            },
            (None, None) => return,
        };
        info!(
            "Motion engine attached to hand with {}/{} active joints",
            device.dof_active, device.dof_total
        );
        let change = {
            let mut guard = self.shared.inner.lock();
            guard.device = Some(device);
            guard.session = session;
            guard.alarm_latched = false;
            guard.set_state(MotionState::Ready)
        };
        self.emit_state(change);
    }

    /// 断开：`any → Idle`
    ///
    /// 先取消当前生产者并有界等待，然后关闭会话。幂等。
    pub fn disconnect(&self) -> Result<(), TransportError> {
        let (session, change) = {
            let mut guard = self.shared.inner.lock();
            if guard.device.is_none() && guard.session.is_none() {
                return Ok(());
            }
            self.cancel_producer(&mut guard);
            if !self.wait_producer_exit(&mut guard) {
                warn!("Motion producer still running at disconnect, detaching it");
            }
            guard.producer = None;
            guard.device = None;
            guard.alarm_latched = false;
            let session = guard.session.take();
            (session, guard.set_state(MotionState::Idle))
        };
        self.emit_state(change);

        match session {
            Some(mut session) => session.disconnect(),
            None => Ok(()),
        }
    }

    // ============================================================
    // 查询
    // ============================================================

    pub fn state(&self) -> MotionState {
        self.shared.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.shared.inner.lock().device.is_some()
    }

    /// 是否有循环在运行
    pub fn is_running(&self) -> bool {
        self.shared
            .inner
            .lock()
            .producer
            .as_ref()
            .is_some_and(|p| p.kind == ProducerKind::Cycle)
    }

    pub fn alarm_latched(&self) -> bool {
        self.shared.inner.lock().alarm_latched
    }

    /// 自由度 `(total, active)`
    pub fn dof(&self) -> Option<(u32, u32)> {
        self.shared
            .inner
            .lock()
            .device
            .as_ref()
            .map(|d| (d.dof_total, d.dof_active))
    }

    fn device(&self) -> Result<Device, MotionError> {
        self.shared
            .inner
            .lock()
            .device
            .clone()
            .ok_or(MotionError::NotConnected)
    }

    // ============================================================
    // 单次运动
    // ============================================================

    /// 位置运动
    ///
    /// 逐关节设置目标位置、速度和最大电流，然后一次 `move_motors(ALL_JOINTS)`
    /// 让所有关节同时启动，最后阻塞 `settle_wait`。
    ///
    /// # 错误
    ///
    /// - `MotionError::NotConnected`: 没有会话
    /// - `MotionError::DofMismatch`: 目标数量不等于主动自由度（无设备调用）
    /// - `MotionError::DeviceFault`: 厂商库返回错误码
    pub fn move_to(&self, request: &MotionRequest) -> Result<(), MotionError> {
        let device = self.device()?;
        program_positions(&device, request)?;
        if !request.settle_wait.is_zero() {
            std::thread::sleep(request.settle_wait);
        }
        Ok(())
    }

    /// 角度运动，校验规则同 [`move_to`](Self::move_to)
    pub fn move_to_angles(&self, request: &AngleRequest) -> Result<(), MotionError> {
        let device = self.device()?;
        program_angles(&device, request)?;
        if !request.settle_wait.is_zero() {
            std::thread::sleep(request.settle_wait);
        }
        Ok(())
    }

    /// 任一主动关节 `[1, dof_active]` 报警即为 `true`
    pub fn get_alarm(&self) -> Result<bool, MotionError> {
        let device = self.device()?;
        read_alarm(&device)
    }

    /// 清除报警并解除锁存：`Alarm → Ready`
    pub fn clear_alarm(&self) -> Result<(), MotionError> {
        let device = self.device()?;
        device.binding.clear_alarm(ALL_JOINTS)?;
        let change = {
            let mut guard = self.shared.inner.lock();
            guard.alarm_latched = false;
            if guard.state == MotionState::Alarm {
                guard.set_state(MotionState::Ready)
            } else {
                None
            }
        };
        info!("Alarm cleared");
        self.emit_state(change);
        Ok(())
    }

    /// 使能/失能全部关节（使能时切换到位置模式）
    pub fn enable_motors(&self, enable: bool) -> Result<(), MotionError> {
        let device = self.device()?;
        if enable {
            device
                .binding
                .set_control_mode(ALL_JOINTS, ControlMode::Position)?;
        }
        device.binding.set_enable(ALL_JOINTS, enable)?;
        Ok(())
    }

    /// 立即停止全部关节，不改变运动状态
    pub fn stop_motors(&self) -> Result<(), MotionError> {
        self.device()?.binding.stop_motors(ALL_JOINTS)?;
        Ok(())
    }

    // ============================================================
    // 运动生产者
    // ============================================================

    /// 回零：`Homing`，发出 `home_motors(ALL)` 后固定驻留 `wait`
    ///
    /// 驻留可以被 `stop()` 或其它生产者打断。驻留结束不代表回零一定完成。
    pub fn home(&self, wait: Duration) -> Result<(), MotionError> {
        let ticket = self.begin(ProducerKind::Home, MotionState::Homing)?;
        let _guard = self.guard(&ticket);

        info!("Homing, dwell {:?}", wait);
        ticket.device.binding.home_motors(ALL_JOINTS)?;
        if self.dwell(&ticket.cancel, wait) {
            debug!("Homing dwell elapsed");
        } else {
            info!("Homing dwell interrupted");
        }
        Ok(())
    }

    /// 在调用线程上运行循环
    pub fn run_cycle(&self, cycle: MotionCycle) -> Result<CycleReport, MotionError> {
        let (ticket, cycle_id) = self.begin_cycle(&cycle)?;
        let _guard = self.guard(&ticket);
        self.cycle_body(&ticket, cycle_id, &cycle)
    }

    /// 在独立线程上运行循环
    ///
    /// 返回时循环已经成为当前生产者（状态为 `Running`）。
    pub fn start_cycle(
        &self,
        cycle: MotionCycle,
    ) -> Result<JoinHandle<Result<CycleReport, MotionError>>, MotionError> {
        let (ticket, cycle_id) = self.begin_cycle(&cycle)?;
        let guard = self.guard(&ticket);
        let engine = self.clone();
        std::thread::Builder::new()
            .name("lhand-cycle".into())
            .spawn(move || {
                let _guard = guard;
                engine.cycle_body(&ticket, cycle_id, &cycle)
            })
            .map_err(|e| MotionError::WorkerSpawn(e.to_string()))
    }

    /// 在调用线程上运行抓握序列
    pub fn run_grasp(&self, routine: GraspRoutine) -> Result<CycleReport, MotionError> {
        let (ticket, id) = self.begin_grasp(&routine)?;
        let _guard = self.guard(&ticket);
        self.grasp_body(&ticket, id, &routine)
    }

    /// 在独立线程上运行抓握序列
    pub fn start_grasp(
        &self,
        routine: GraspRoutine,
    ) -> Result<JoinHandle<Result<CycleReport, MotionError>>, MotionError> {
        let (ticket, id) = self.begin_grasp(&routine)?;
        let guard = self.guard(&ticket);
        let engine = self.clone();
        std::thread::Builder::new()
            .name("lhand-grasp".into())
            .spawn(move || {
                let _guard = guard;
                engine.grasp_body(&ticket, id, &routine)
            })
            .map_err(|e| MotionError::WorkerSpawn(e.to_string()))
    }

    /// 进入遥操作：`TeleopActive`
    ///
    /// 遥操作没有工作线程，目标由持有租约的一方通过 [`teleop_move`](Self::teleop_move) 下发。
    pub fn start_teleop(&self) -> Result<TeleopLease, MotionError> {
        let ticket = self.begin(ProducerKind::Teleop, MotionState::TeleopActive)?;
        info!("Teleoperation started");
        Ok(TeleopLease {
            generation: ticket.generation,
        })
    }

    /// 退出遥操作：`TeleopActive → Ready`
    pub fn stop_teleop(&self) {
        let change = {
            let mut guard = self.shared.inner.lock();
            let teleop = guard
                .producer
                .as_ref()
                .is_some_and(|p| p.kind == ProducerKind::Teleop);
            if !teleop {
                return;
            }
            self.cancel_producer(&mut guard);
            let next = guard.resting_state();
            guard.set_state(next)
        };
        info!("Teleoperation stopped");
        self.emit_state(change);
    }

    /// 租约是否仍然有效
    pub fn teleop_active(&self, lease: &TeleopLease) -> bool {
        self.shared
            .inner
            .lock()
            .producer
            .as_ref()
            .is_some_and(|p| p.kind == ProducerKind::Teleop && p.generation == lease.generation)
    }

    /// 以遥操作身份下发角度目标
    ///
    /// 租约失效时返回 `Ok(false)`，不做任何设备调用。
    pub fn teleop_move(
        &self,
        lease: &TeleopLease,
        request: &AngleRequest,
    ) -> Result<bool, MotionError> {
        let device = {
            let guard = self.shared.inner.lock();
            let current = guard
                .producer
                .as_ref()
                .is_some_and(|p| p.kind == ProducerKind::Teleop && p.generation == lease.generation);
            if !current {
                return Ok(false);
            }
            guard.device.clone().ok_or(MotionError::NotConnected)?
        };
        program_angles(&device, request)?;
        if !request.settle_wait.is_zero() {
            std::thread::sleep(request.settle_wait);
        }
        Ok(true)
    }

    /// 停止一切运动并回零
    ///
    /// 1. 置取消标志并立即 `stop_motors(ALL)`
    /// 2. 等待 `stop_settle`，再有界等待工作线程确认
    /// 3. 结束遥操作
    /// 4. 回零（报警锁存时跳过）
    pub fn stop(&self) -> Result<(), MotionError> {
        let device = {
            let mut guard = self.shared.inner.lock();
            let device = guard.device.clone().ok_or(MotionError::NotConnected)?;
            self.cancel_producer(&mut guard);
            device
        };

        info!("Stopping motion");
        if let Err(e) = device.binding.stop_motors(ALL_JOINTS) {
            warn!("stop_motors failed: {}", e);
        }
        if !self.shared.config.stop_settle.is_zero() {
            std::thread::sleep(self.shared.config.stop_settle);
        }

        let (latched, change) = {
            let mut guard = self.shared.inner.lock();
            if !self.wait_producer_exit(&mut guard) {
                warn!("Motion worker did not acknowledge stop in time, detaching it");
            }
            guard.producer = None;
            let next = guard.resting_state();
            (guard.alarm_latched, guard.set_state(next))
        };
        self.emit_state(change);

        if latched {
            warn!("Alarm latched, skipping return to zero");
            return Ok(());
        }
        let zero = MotionRequest::zero(
            device.dof_active as usize,
            &self.shared.config.return_to_zero,
        );
        program_positions(&device, &zero)?;
        if !zero.settle_wait.is_zero() {
            std::thread::sleep(zero.settle_wait);
        }
        info!("Returned to zero");
        Ok(())
    }

    // ============================================================
    // 生产者互斥
    // ============================================================

    /// 成为当前生产者
    ///
    /// 先协作停止已有生产者，在 `exclusive_wait` 内等待它退出，超时返回 `Busy`。
    fn begin(&self, kind: ProducerKind, state: MotionState) -> Result<Ticket, MotionError> {
        let (ticket, change) = {
            let mut guard = self.shared.inner.lock();
            if guard.device.is_none() {
                return Err(MotionError::NotConnected);
            }
            if kind == ProducerKind::Cycle && guard.alarm_latched {
                return Err(MotionError::AlarmActive);
            }

            if let Some(previous) = self.cancel_producer(&mut guard) {
                info!("Preempting {:?} producer", previous);
            }
            if !self.wait_producer_exit(&mut guard) {
                return Err(MotionError::Busy);
            }
            let device = guard.device.clone().ok_or(MotionError::NotConnected)?;

            guard.generation += 1;
            let cancel = Arc::new(AtomicBool::new(false));
            guard.producer = Some(Producer {
                kind,
                generation: guard.generation,
                cancel: cancel.clone(),
            });
            let ticket = Ticket {
                generation: guard.generation,
                cancel,
                device,
            };
            (ticket, guard.set_state(state))
        };
        self.emit_state(change);
        Ok(ticket)
    }

    fn begin_cycle(&self, cycle: &MotionCycle) -> Result<(Ticket, u64), MotionError> {
        let device = self.device()?;
        let dof = device.dof_active as usize;
        for step in cycle.steps.iter().chain(cycle.finish.iter()) {
            check_dof(dof, step.positions.len())?;
        }
        let cycle_id = self.shared.next_sequence_id.fetch_add(1, Ordering::Relaxed);
        let ticket = self.begin(
            ProducerKind::Cycle,
            MotionState::Running {
                cycle_id,
                step_index: 0,
            },
        )?;
        Ok((ticket, cycle_id))
    }

    fn begin_grasp(&self, routine: &GraspRoutine) -> Result<(Ticket, u64), MotionError> {
        let device = self.device()?;
        let dof = device.dof_active as usize;
        for step in &routine.steps {
            check_dof(dof, step.positions.len())?;
        }
        let id = self.shared.next_sequence_id.fetch_add(1, Ordering::Relaxed);
        let ticket = self.begin(ProducerKind::Grasp, MotionState::GraspSequence { rep_index: 0 })?;
        Ok((ticket, id))
    }

    fn guard(&self, ticket: &Ticket) -> ProducerGuard {
        ProducerGuard {
            engine: self.clone(),
            generation: ticket.generation,
        }
    }

    /// 置位当前生产者的取消标志（持锁）；遥操作没有工作线程，直接移除
    fn cancel_producer(&self, guard: &mut MutexGuard<'_, EngineState>) -> Option<ProducerKind> {
        let producer = guard.producer.as_ref()?;
        producer.cancel.store(true, Ordering::Release);
        let kind = producer.kind;
        if kind == ProducerKind::Teleop {
            guard.producer = None;
        }
        self.shared.changed.notify_all();
        Some(kind)
    }

    /// 有界等待生产者退出，返回是否已退出
    fn wait_producer_exit(&self, guard: &mut MutexGuard<'_, EngineState>) -> bool {
        let deadline = Instant::now() + self.shared.config.exclusive_wait;
        while guard.producer.is_some() {
            if self.shared.changed.wait_until(guard, deadline).timed_out() {
                return guard.producer.is_none();
            }
        }
        true
    }

    fn finish_producer(&self, generation: u64) {
        let change = {
            let mut guard = self.shared.inner.lock();
            if !guard
                .producer
                .as_ref()
                .is_some_and(|p| p.generation == generation)
            {
                return;
            }
            guard.producer = None;
            self.shared.changed.notify_all();
            let next = guard.resting_state();
            guard.set_state(next)
        };
        self.emit_state(change);
    }

    /// 仅当 generation 仍是当前生产者时更新状态
    fn update_state(&self, generation: u64, state: MotionState) {
        let change = {
            let mut guard = self.shared.inner.lock();
            if !guard
                .producer
                .as_ref()
                .is_some_and(|p| p.generation == generation)
            {
                return;
            }
            guard.set_state(state)
        };
        self.emit_state(change);
    }

    /// 可中断驻留；被取消返回 `false`
    fn dwell(&self, cancel: &AtomicBool, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.shared.inner.lock();
        while !cancel.load(Ordering::Acquire) {
            if self
                .shared
                .changed
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return !cancel.load(Ordering::Acquire);
            }
        }
        false
    }

    // ============================================================
    // 工作线程主体
    // ============================================================

    /// 一步：取消检查 → 报警检查 → 运动 → 驻留
    fn step(&self, ticket: &Ticket, request: &MotionRequest) -> Result<StepResult, MotionError> {
        if ticket.cancelled() {
            return Ok(StepResult::Cancelled);
        }
        if self.shared.config.alarm_check && read_alarm(&ticket.device)? {
            self.latch_alarm(ticket);
            return Ok(StepResult::Alarm);
        }
        program_positions(&ticket.device, request)?;
        if !self.dwell(&ticket.cancel, request.settle_wait) {
            return Ok(StepResult::Cancelled);
        }
        Ok(StepResult::Done)
    }

    fn latch_alarm(&self, ticket: &Ticket) {
        error!("Joint alarm detected, halting motion");
        self.shared.inner.lock().alarm_latched = true;
        if let Err(e) = ticket.device.binding.stop_motors(ALL_JOINTS) {
            warn!("stop_motors after alarm failed: {}", e);
        }
        for observer in self.shared.observers.load().iter() {
            observer.on_alarm();
        }
    }

    fn cycle_body(
        &self,
        ticket: &Ticket,
        cycle_id: u64,
        cycle: &MotionCycle,
    ) -> Result<CycleReport, MotionError> {
        let report = |passes_completed, outcome| CycleReport {
            cycle_id,
            passes_completed,
            outcome,
        };

        if cycle.steps.is_empty() {
            warn!("Cycle {} has no steps", cycle_id);
            return Ok(report(0, CycleOutcome::Completed));
        }
        info!(
            "Cycle {} started: {} steps, {:?}",
            cycle_id,
            cycle.steps.len(),
            cycle.repeat_count
        );

        let mut passes = 0u64;
        while !cycle.repeat_count.is_done(passes) {
            for (step_index, request) in cycle.steps.iter().enumerate() {
                self.update_state(
                    ticket.generation,
                    MotionState::Running {
                        cycle_id,
                        step_index,
                    },
                );
                match self.step(ticket, request) {
                    Ok(StepResult::Done) => {},
                    Ok(StepResult::Cancelled) => {
                        info!("Cycle {} cancelled after {} passes", cycle_id, passes);
                        return Ok(report(passes, CycleOutcome::Cancelled));
                    },
                    Ok(StepResult::Alarm) => {
                        return Ok(report(passes, CycleOutcome::Alarm));
                    },
                    Err(e) => {
                        error!("Cycle {} aborted at step {}: {}", cycle_id, step_index, e);
                        return Err(e);
                    },
                }
            }
            passes += 1;
            debug!("Cycle {} pass {} complete", cycle_id, passes);
            if cycle.cycle_complete_pulse {
                for observer in self.shared.observers.load().iter() {
                    observer.on_cycle_complete(cycle_id, passes);
                }
            }
        }

        if let Some(finish) = &cycle.finish {
            match self.step(ticket, finish)? {
                StepResult::Done => {},
                StepResult::Cancelled => return Ok(report(passes, CycleOutcome::Cancelled)),
                StepResult::Alarm => return Ok(report(passes, CycleOutcome::Alarm)),
            }
        }
        info!("Cycle {} completed ({} passes)", cycle_id, passes);
        Ok(report(passes, CycleOutcome::Completed))
    }

    fn grasp_body(
        &self,
        ticket: &Ticket,
        id: u64,
        routine: &GraspRoutine,
    ) -> Result<CycleReport, MotionError> {
        let report = |passes_completed, outcome| CycleReport {
            cycle_id: id,
            passes_completed,
            outcome,
        };
        info!("Grasp routine started: {} repetitions", routine.repetitions);

        for rep_index in 0..routine.repetitions {
            self.update_state(ticket.generation, MotionState::GraspSequence { rep_index });
            for request in &routine.steps {
                match self.step(ticket, request)? {
                    StepResult::Done => {},
                    StepResult::Cancelled => {
                        info!("Grasp routine cancelled at repetition {}", rep_index);
                        return Ok(report(u64::from(rep_index), CycleOutcome::Cancelled));
                    },
                    StepResult::Alarm => {
                        return Ok(report(u64::from(rep_index), CycleOutcome::Alarm));
                    },
                }
            }
        }

        let zero = MotionRequest::zero(ticket.device.dof_active as usize, &routine.return_to_zero);
        let reps = u64::from(routine.repetitions);
        match self.step(ticket, &zero)? {
            StepResult::Done => {
                info!("Grasp routine completed, returned to zero");
                Ok(report(reps, CycleOutcome::Completed))
            },
            StepResult::Cancelled => Ok(report(reps, CycleOutcome::Cancelled)),
            StepResult::Alarm => Ok(report(reps, CycleOutcome::Alarm)),
        }
    }

    /// 按编号顺序投递状态变化
    ///
    /// 状态锁释放后才投递，两个线程的变化可能以相反顺序到达这里；
    /// 编号不大于已投递编号的变化已被更新的状态取代，丢弃。
    fn emit_state(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };
        let delivered = self.shared.delivered.lock();
        if change.seq <= delivered.get() {
            debug!(
                "Dropping stale state change {} -> {}",
                change.old, change.new
            );
            return;
        }
        delivered.set(change.seq);
        debug!("Motion state {} -> {}", change.old, change.new);
        for observer in self.shared.observers.load().iter() {
            observer.on_state_changed(change.old, change.new);
            if delivered.get() != change.seq {
                break;
            }
        }
    }
}

fn check_dof(expected: usize, actual: usize) -> Result<(), MotionError> {
    if expected != actual {
        return Err(MotionError::DofMismatch { expected, actual });
    }
    Ok(())
}

fn joint_number(index: usize) -> u8 {
    // 关节号从 1 开始，0 表示全部
    (index + 1) as u8
}

fn program_positions(device: &Device, request: &MotionRequest) -> Result<(), MotionError> {
    check_dof(device.dof_active as usize, request.positions.len())?;
    let binding = &device.binding;
    for (index, &position) in request.positions.iter().enumerate() {
        let joint = joint_number(index);
        binding.set_target_position(joint, position)?;
        binding.set_position_velocity(joint, request.velocity)?;
        binding.set_max_current(joint, request.max_current)?;
    }
    binding.move_motors(ALL_JOINTS)?;
    Ok(())
}

fn program_angles(device: &Device, request: &AngleRequest) -> Result<(), MotionError> {
    check_dof(device.dof_active as usize, request.angles.len())?;
    let binding = &device.binding;
    for (index, &angle) in request.angles.iter().enumerate() {
        let joint = joint_number(index);
        binding.set_target_angle(joint, angle)?;
        binding.set_angular_velocity(joint, request.angular_velocity)?;
        binding.set_max_current(joint, request.max_current)?;
    }
    binding.move_motors(ALL_JOINTS)?;
    Ok(())
}

fn read_alarm(device: &Device) -> Result<bool, MotionError> {
    for joint in 1..=device.dof_active {
        if device.binding.get_alarm(joint as u8)? {
            warn!("Joint {} reports an alarm", joint);
            return Ok(true);
        }
    }
    Ok(false)
}
