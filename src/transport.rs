//! Receive transport
//!
//! `RxTransport` owns one device's receive path: the bus capability, the
//! consumer (op mode), the work queue used to defer processing, the receive
//! queue and the interrupt front-end.
//!
//! ## Lifecycle
//!
//! ```text
//! new()   allocate descriptor ring, status block, cause table
//! start() fill the pool, hand buffers to the device, enable interrupts
//! stop()  disable interrupts, stop the worker, free every page
//! ```
//!
//! The platform glue wires three entry points:
//!
//! - `isr()` from the interrupt line
//! - `irq_tasklet()` when `WorkQueue::schedule_bottom_half` fires
//! - `run_replenish_work()` when `WorkQueue::schedule_replenish` fires
//!
//! Entry points that touch the receive queue do nothing unless the transport
//! is running. `start()` and `stop()` wait for the worker and any bottom half
//! in flight before they reset the queue.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::config::{Notification, RxConfig};
use crate::drivers::bus::{Bus, DmaPage};
use crate::drivers::csr::{
    IntCause, FH_RSCSR_CHNL0_RBDCB_BASE_REG, FH_RSCSR_CHNL0_STTS_WPTR_REG,
};
use crate::error::{Result, RxError};
use crate::irq::cause_table::CauseTable;
use crate::irq::{IrqEngine, IsrStats, NotificationMode};
use crate::rx::frame::{PendingCommand, RxCmdBuffer};
use crate::rx::pool::{BufferPool, PoolStats};
use crate::rx::queue::RxQueue;
use crate::rx::replenish::ReplenishMode;
use crate::rx::ring::{RingState, RxRing, RB_STATUS_WORDS};
use crate::rx::{RxEngine, RxStats};

pub use crate::irq::IrqReturn;

/// Error reported by the consumer for one frame, passed on to command
/// completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerError(pub i32);

/// Consumer of received frames and device events
///
/// Called from the bottom half. Implementations must not call back into
/// the transport's receive path.
pub trait OpMode<P: DmaPage>: Send + Sync {
    /// One received frame. `cmd` is set when the frame answers a host command
    /// whose buffer must be reclaimed.
    fn rx(
        &self,
        rxcb: &mut RxCmdBuffer<P>,
        cmd: Option<PendingCommand>,
    ) -> core::result::Result<(), HandlerError>;

    /// Reclaim the command buffer of a response (skipped if the page was
    /// stolen)
    fn command_complete(
        &self,
        rxcb: &RxCmdBuffer<P>,
        cmd: PendingCommand,
        status: core::result::Result<(), HandlerError>,
    );

    /// Device reported a hardware or firmware error
    fn nic_error(&self);

    /// RF-kill switch changed; `killed` is true when the radio must be off
    fn hw_rf_kill(&self, killed: bool);

    /// Device woke up; transmit queues should republish their pointers
    fn wake_tx_queues(&self);

    /// Control (firmware load) DMA channel finished
    fn control_tx_complete(&self);
}

/// Deferred execution supplied by the platform
pub trait WorkQueue: Send + Sync {
    /// Arrange for `RxTransport::irq_tasklet` to run soon
    fn schedule_bottom_half(&self);

    /// Arrange for `RxTransport::run_replenish_work` to run in a context
    /// that may sleep
    fn schedule_replenish(&self);
}

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;
/// `start` or `stop` is rebuilding or tearing down the queue
const STATE_CHANGING: u8 = 3;

pub struct RxTransport<B: Bus, O, W> {
    bus: B,
    op_mode: O,
    work: W,
    rx: RxEngine<B>,
    irq: IrqEngine<B::Coherent>,
    state: AtomicU8,
    /// Entry points currently touching the queue
    active: AtomicUsize,
}

/// One entry point inside the queue; see `RxTransport::enter`
struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<B, O, W> RxTransport<B, O, W>
where
    B: Bus,
    O: OpMode<B::Page>,
    W: WorkQueue,
{
    /// Allocate the device-shared structures
    ///
    /// # Errors
    ///
    /// - `InvalidConfiguration` - `config` failed validation
    /// - `OutOfMemory` - coherent memory for the ring, status block or cause
    ///   table is not available
    /// - `CauseTableMisaligned` - the cause table is not 4 KiB aligned
    pub fn new(bus: B, op_mode: O, work: W, config: RxConfig) -> Result<Self> {
        config.validate()?;

        let bd = bus
            .alloc_coherent(config.queue_size)
            .ok_or(RxError::OutOfMemory)?;
        let rb_status = bus
            .alloc_coherent(RB_STATUS_WORDS)
            .ok_or(RxError::OutOfMemory)?;
        let queue = RxQueue::new(RxRing::new(bd, rb_status), BufferPool::new(config.pool_size));

        let mode = match config.notification {
            Notification::Direct => NotificationMode::Direct,
            Notification::CauseTable => NotificationMode::CauseTable(CauseTable::allocate(&bus)?),
        };

        log::info!(
            "[RX] queue of {} descriptors, {} buffers of {} bytes, {:?} notification",
            config.queue_size,
            config.pool_size,
            config.rx_buf_size(),
            config.notification
        );

        Ok(Self {
            irq: IrqEngine::new(mode),
            rx: RxEngine::new(queue, config),
            bus,
            op_mode,
            work,
            state: AtomicU8::new(STATE_CREATED),
            active: AtomicUsize::new(0),
        })
    }

    /// Fill the pool, hand buffers to the device and enable interrupts
    ///
    /// Calling `start` on a running transport re-initializes the queue:
    /// the replenish worker and any bottom half in flight are drained first,
    /// then every page is released and the ring is refilled from scratch.
    ///
    /// # Errors
    ///
    /// - `NotRunning` - the transport was stopped and its memory released
    pub fn start(&self) -> Result<()> {
        if self.claim(STATE_CHANGING).is_none() {
            return Err(RxError::NotRunning);
        }

        self.irq.disable_interrupts(&self.bus);
        self.quiesce();
        self.rx.free_all(&self.bus);

        {
            let q = self.rx.queue().lock();
            self.bus
                .write32(FH_RSCSR_CHNL0_RBDCB_BASE_REG, (q.ring.bd_dma() >> 8) as u32);
            self.bus
                .write32(FH_RSCSR_CHNL0_STTS_WPTR_REG, (q.ring.rb_status_dma() >> 4) as u32);
        }

        self.rx.replenish_work().resume();
        self.rx
            .replenish(&self.bus, &self.work, ReplenishMode::Deferred);
        self.irq.reset_cause_table(&self.bus);

        self.state.store(STATE_RUNNING, Ordering::SeqCst);
        let ring = self.ring_state();
        log::info!(
            "[RX] started: {} buffers in ring, write pointer {}",
            ring.occupied,
            ring.write_actual
        );
        Ok(())
    }

    /// Tear down in reverse order of bring-up
    ///
    /// Safe to call more than once. After `stop` the transport cannot be
    /// started again.
    pub fn stop(&self) {
        if self.claim(STATE_CHANGING).is_none() {
            return;
        }
        self.irq.disable_interrupts(&self.bus);
        self.irq.disable_cause_table();
        self.quiesce();
        self.rx.free_all(&self.bus);
        self.irq.release_cause_table();
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
        log::info!("[RX] stopped");
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Move from created or running to `to`, waiting out a concurrent
    /// `start`/`stop`. Returns the previous state, or `None` once stopped.
    fn claim(&self, to: u8) -> Option<u8> {
        let mut cur = self.state.load(Ordering::SeqCst);
        loop {
            match cur {
                STATE_STOPPED => return None,
                STATE_CHANGING => {
                    core::hint::spin_loop();
                    cur = self.state.load(Ordering::SeqCst);
                }
                _ => match self
                    .state
                    .compare_exchange(cur, to, Ordering::SeqCst, Ordering::SeqCst)
                {
                    Ok(prev) => return Some(prev),
                    Err(now) => cur = now,
                },
            }
        }
    }

    /// Stop the replenish worker and wait until no entry point is inside
    /// the queue. The state must already be `STATE_CHANGING`, so new callers
    /// bounce off `enter`.
    fn quiesce(&self) {
        self.rx.replenish_work().shutdown();
        while self.active.load(Ordering::SeqCst) != 0 {
            core::hint::spin_loop();
        }
    }

    /// Admit a caller into the queue if the transport is running
    fn enter(&self) -> Option<Active<'_>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = Active(&self.active);
        (self.state.load(Ordering::SeqCst) == STATE_RUNNING).then_some(active)
    }

    /// Top half; call from the device's interrupt line
    pub fn isr(&self) -> IrqReturn {
        self.irq.isr(&self.bus, &self.work)
    }

    /// Bottom half; call when `schedule_bottom_half` fires
    ///
    /// Does nothing while the transport is not running.
    pub fn irq_tasklet(&self) {
        let Some(_active) = self.enter() else {
            log::debug!("[IRQ] bottom half skipped, transport not running");
            return;
        };
        self.irq
            .irq_tasklet(&self.bus, &self.rx, &self.op_mode, &self.work);
    }

    /// Worker; call when `schedule_replenish` fires
    pub fn run_replenish_work(&self) {
        self.rx.run_replenish_work(&self.bus, &self.work);
    }

    /// Process closed buffers outside the interrupt path
    pub fn rx_handle(&self) {
        if let Some(_active) = self.enter() {
            self.rx.rx_handle(&self.bus, &self.op_mode, &self.work);
        }
    }

    pub fn restock(&self) {
        if let Some(_active) = self.enter() {
            self.rx.restock(&self.bus, &self.work);
        }
    }

    pub fn replenish(&self, mode: ReplenishMode) {
        if let Some(_active) = self.enter() {
            self.rx.replenish(&self.bus, &self.work, mode);
        }
    }

    pub fn update_write_ptr(&self) {
        if let Some(_active) = self.enter() {
            self.rx.update_write_ptr(&self.bus);
        }
    }

    pub fn enable_interrupts(&self) {
        self.irq.enable_interrupts(&self.bus);
    }

    pub fn disable_interrupts(&self) {
        self.irq.disable_interrupts(&self.bus);
    }

    /// Rearm the cause table after a fatal error or device reset
    pub fn reset_cause_table(&self) {
        self.irq.reset_cause_table(&self.bus);
    }

    pub fn disable_cause_table(&self) {
        self.irq.disable_cause_table();
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.irq.interrupts_enabled()
    }

    pub fn inta_mask(&self) -> IntCause {
        self.irq.inta_mask()
    }

    pub fn stats(&self) -> RxStats {
        self.rx.stats()
    }

    pub fn isr_stats(&self) -> IsrStats {
        self.irq.stats()
    }

    pub fn ring_state(&self) -> RingState {
        self.rx.queue().lock().ring.state()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.rx.queue().lock().pool.stats()
    }

    /// Every buffer handle is in exactly one place
    pub fn check_ownership(&self) -> bool {
        self.rx.queue().lock().check_ownership()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn op_mode(&self) -> &O {
        &self.op_mode
    }

    pub fn work(&self) -> &W {
        &self.work
    }

    pub fn rx(&self) -> &RxEngine<B> {
        &self.rx
    }

    pub fn irq(&self) -> &IrqEngine<B::Coherent> {
        &self.irq
    }
}

impl<B: Bus, O, W> Drop for RxTransport<B, O, W> {
    fn drop(&mut self) {
        // Pages are unmapped here; coherent memory goes with the fields
        if self.state.load(Ordering::SeqCst) != STATE_STOPPED {
            self.irq.disable_interrupts(&self.bus);
            self.rx.replenish_work().shutdown();
            self.rx.free_all(&self.bus);
        }
    }
}
