//! Simulated device for unit tests
//!
//! - `TestBus`: register file with write log, page allocator with failure
//!   injection, coherent memory the test can poke like the device would
//! - `RecordingOpMode`: records every callback, optionally steals pages
//! - `TestWorkQueue`: counts scheduling requests; tests run the deferred
//!   entry points by hand
//! - `capture_logs`: process-wide logger that keeps every record
//!
//! Coherent allocations are recorded in order, so for a transport built by
//! `harness` index 0 is the descriptor array, 1 the status block and 2 the
//! cause table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use crate::config::{RxConfig, PAGE_SIZE};
use crate::drivers::bus::{AllocRequest, CoherentWords, DmaMemory, DmaPage, RegisterIo};
use crate::drivers::csr::{
    IntCause, CSR_FH_INT_STATUS, CSR_INT, FH_RSCSR_FRAME_ALIGN, FH_RSCSR_FRAME_INVALID,
};
use crate::rx::frame::{PendingCommand, RxCmdBuffer};
use crate::transport::{HandlerError, OpMode, RxTransport, WorkQueue};

const PAGE_DMA_BASE: u64 = 0x1000_0000;
const COHERENT_DMA_BASE: u64 = 0x8000_0000;
const COHERENT_DMA_STRIDE: u64 = 0x1_0000;

/// Builds buffer contents the way the device lays them out
pub struct FrameBuilder {
    bytes: Vec<u8>,
    offset: usize,
}

impl FrameBuilder {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            offset: 0,
        }
    }

    /// Append a frame whose length field is `len` (bytes after the status word)
    pub fn frame(mut self, cmd: u8, sequence: u16, len: u32) -> Self {
        let at = self.offset;
        self.bytes[at..at + 4].copy_from_slice(&len.to_le_bytes());
        self.bytes[at + 4] = cmd;
        self.bytes[at + 5] = 0;
        self.bytes[at + 6..at + 8].copy_from_slice(&sequence.to_le_bytes());
        let end = (at + 4 + len as usize).min(self.bytes.len());
        for b in self.bytes.iter_mut().take(end).skip(at + 8) {
            *b = cmd;
        }
        let total = len as usize + 4;
        self.offset = at + total.div_ceil(FH_RSCSR_FRAME_ALIGN) * FH_RSCSR_FRAME_ALIGN;
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        if self.offset + 4 <= self.bytes.len() {
            let at = self.offset;
            self.bytes[at..at + 4].copy_from_slice(&FH_RSCSR_FRAME_INVALID.to_le_bytes());
        }
        self.bytes
    }
}

/// Receive page; counts itself in the bus's live-page gauge
pub struct TestPage {
    bytes: Box<[u8]>,
    live: Arc<AtomicUsize>,
}

impl DmaPage for TestPage {
    fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for TestPage {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Coherent words shared between the transport and the test
#[derive(Clone)]
pub struct TestCoherent {
    words: Arc<Vec<AtomicU32>>,
    dma: u64,
}

impl CoherentWords for TestCoherent {
    fn len(&self) -> usize {
        self.words.len()
    }

    fn read(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::SeqCst)
    }

    fn write(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::SeqCst);
    }

    fn dma_addr(&self) -> u64 {
        self.dma
    }
}

#[derive(Default)]
struct Registers {
    values: HashMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    writes8: Vec<(usize, u8)>,
}

struct BusState {
    regs: Mutex<Registers>,
    coherent: Mutex<Vec<TestCoherent>>,
    template: Mutex<Vec<u8>>,
    alloc_requests: Mutex<Vec<AllocRequest>>,
    alloc_budget: Mutex<Option<usize>>,
    mapped: Mutex<HashSet<u64>>,
    next_dma: AtomicU64,
    live_pages: Arc<AtomicUsize>,
    coherent_fail: AtomicBool,
    coherent_misaligned: AtomicBool,
    map_gate: Mutex<Option<Arc<Barrier>>>,
}

#[derive(Clone)]
pub struct TestBus {
    inner: Arc<BusState>,
}

impl TestBus {
    pub fn new() -> Self {
        let template = FrameBuilder::new(PAGE_SIZE).frame(0x01, 0x8000, 16).build();
        Self {
            inner: Arc::new(BusState {
                regs: Mutex::new(Registers::default()),
                coherent: Mutex::new(Vec::new()),
                template: Mutex::new(template),
                alloc_requests: Mutex::new(Vec::new()),
                alloc_budget: Mutex::new(None),
                mapped: Mutex::new(HashSet::new()),
                next_dma: AtomicU64::new(PAGE_DMA_BASE),
                live_pages: Arc::new(AtomicUsize::new(0)),
                coherent_fail: AtomicBool::new(false),
                coherent_misaligned: AtomicBool::new(false),
                map_gate: Mutex::new(None),
            }),
        }
    }

    /// Current register value
    pub fn reg(&self, offset: usize) -> u32 {
        self.inner.regs.lock().unwrap().values.get(&offset).copied().unwrap_or(0)
    }

    /// Set a register as the device would, without logging a write
    pub fn set_reg(&self, offset: usize, value: u32) {
        self.inner.regs.lock().unwrap().values.insert(offset, value);
    }

    /// Latch interrupt causes in `CSR_INT`
    pub fn raise(&self, bits: u32) {
        *self.inner.regs.lock().unwrap().values.entry(CSR_INT).or_insert(0) |= bits;
    }

    /// Every 32-bit value written to `offset`, oldest first
    pub fn reg_writes(&self, offset: usize) -> Vec<u32> {
        let regs = self.inner.regs.lock().unwrap();
        regs.writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn reg8_writes(&self, offset: usize) -> Vec<u8> {
        let regs = self.inner.regs.lock().unwrap();
        regs.writes8
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Register writes of any width so far
    pub fn write_count(&self) -> usize {
        let regs = self.inner.regs.lock().unwrap();
        regs.writes.len() + regs.writes8.len()
    }

    /// The `index`th coherent allocation
    pub fn coherent(&self, index: usize) -> TestCoherent {
        self.inner.coherent.lock().unwrap()[index].clone()
    }

    /// Contents copied into every page allocated from now on
    pub fn set_page_template(&self, bytes: &[u8]) {
        *self.inner.template.lock().unwrap() = bytes.to_vec();
    }

    /// Let only `budget` more page allocations succeed (`None`: unlimited)
    pub fn set_alloc_budget(&self, budget: Option<usize>) {
        *self.inner.alloc_budget.lock().unwrap() = budget;
    }

    pub fn alloc_requests(&self) -> Vec<AllocRequest> {
        self.inner.alloc_requests.lock().unwrap().clone()
    }

    /// Pages allocated and not yet dropped by anyone
    pub fn live_pages(&self) -> usize {
        self.inner.live_pages.load(Ordering::SeqCst)
    }

    pub fn mapped_pages(&self) -> usize {
        self.inner.mapped.lock().unwrap().len()
    }

    pub fn set_coherent_fail(&self, fail: bool) {
        self.inner.coherent_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_coherent_misaligned(&self, misaligned: bool) {
        self.inner.coherent_misaligned.store(misaligned, Ordering::SeqCst);
    }

    /// Park the next `map_page` call on `gate`
    ///
    /// The mapping thread waits on the barrier twice: once to announce it is
    /// parked, once more to be let go. The gate fires only once.
    pub fn set_map_gate(&self, gate: Arc<Barrier>) {
        *self.inner.map_gate.lock().unwrap() = Some(gate);
    }
}

impl RegisterIo for TestBus {
    fn read32(&self, offset: usize) -> u32 {
        self.reg(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut regs = self.inner.regs.lock().unwrap();
        regs.writes.push((offset, value));
        let slot = regs.values.entry(offset).or_insert(0);
        // Status registers are write-one-to-clear
        if offset == CSR_INT || offset == CSR_FH_INT_STATUS {
            *slot &= !value;
        } else {
            *slot = value;
        }
    }

    fn write8(&self, offset: usize, value: u8) {
        let mut regs = self.inner.regs.lock().unwrap();
        regs.writes8.push((offset, value));
        regs.values.insert(offset, value as u32);
    }
}

impl DmaMemory for TestBus {
    type Page = TestPage;
    type Coherent = TestCoherent;

    fn alloc_pages(&self, request: AllocRequest) -> Option<TestPage> {
        self.inner.alloc_requests.lock().unwrap().push(request);
        {
            let mut budget = self.inner.alloc_budget.lock().unwrap();
            match budget.as_mut() {
                Some(0) => return None,
                Some(n) => *n -= 1,
                None => {}
            }
        }

        let mut bytes = vec![0u8; PAGE_SIZE << request.order].into_boxed_slice();
        let template = self.inner.template.lock().unwrap();
        let n = template.len().min(bytes.len());
        bytes[..n].copy_from_slice(&template[..n]);

        self.inner.live_pages.fetch_add(1, Ordering::SeqCst);
        Some(TestPage {
            bytes,
            live: Arc::clone(&self.inner.live_pages),
        })
    }

    fn map_page(&self, _page: &TestPage, len: usize) -> u64 {
        let gate = self.inner.map_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.wait();
            gate.wait();
        }
        let dma = self.inner.next_dma.fetch_add(len as u64, Ordering::SeqCst);
        self.inner.mapped.lock().unwrap().insert(dma);
        dma
    }

    fn unmap_page(&self, dma: u64, _len: usize) {
        let was_mapped = self.inner.mapped.lock().unwrap().remove(&dma);
        assert!(was_mapped, "unmap of 0x{:X} which is not mapped", dma);
    }

    fn alloc_coherent(&self, words: usize) -> Option<TestCoherent> {
        if self.inner.coherent_fail.load(Ordering::SeqCst) {
            return None;
        }
        let mut all = self.inner.coherent.lock().unwrap();
        let mut dma = COHERENT_DMA_BASE + all.len() as u64 * COHERENT_DMA_STRIDE;
        if self.inner.coherent_misaligned.load(Ordering::SeqCst) {
            dma += 0x40;
        }
        let region = TestCoherent {
            words: Arc::new((0..words).map(|_| AtomicU32::new(0)).collect()),
            dma,
        };
        all.push(region.clone());
        Some(region)
    }
}

/// Callback other than frame delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpEvent {
    CommandComplete { cmd: u8, index: u8, ok: bool },
    NicError,
    RfKill(bool),
    WakeTxQueues,
    ControlTxComplete,
}

/// One delivered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFrame {
    pub cmd: u8,
    pub offset: usize,
    pub reclaim: Option<PendingCommand>,
    /// Page allocations the watched bus had seen at delivery time
    pub allocs_seen: usize,
}

#[derive(Default)]
struct OpState {
    events: Mutex<Vec<OpEvent>>,
    frames: Mutex<Vec<RxFrame>>,
    steal_cmds: Mutex<Vec<u8>>,
    steal_all: AtomicBool,
    stolen: Mutex<Vec<Arc<TestPage>>>,
    bus: Mutex<Option<TestBus>>,
}

#[derive(Clone, Default)]
pub struct RecordingOpMode {
    inner: Arc<OpState>,
}

impl RecordingOpMode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the page of every frame with this command id
    pub fn steal_cmd(&self, cmd: u8) {
        self.inner.steal_cmds.lock().unwrap().push(cmd);
    }

    pub fn set_steal_all(&self, steal: bool) {
        self.inner.steal_all.store(steal, Ordering::SeqCst);
    }

    /// Record the bus's allocation count with every frame
    pub fn watch_bus(&self, bus: &TestBus) {
        *self.inner.bus.lock().unwrap() = Some(bus.clone());
    }

    pub fn events(&self) -> Vec<OpEvent> {
        self.inner.events.lock().unwrap().clone()
    }

    pub fn rx_frames(&self) -> Vec<RxFrame> {
        self.inner.frames.lock().unwrap().clone()
    }

    pub fn stolen_pages(&self) -> usize {
        self.inner.stolen.lock().unwrap().len()
    }

    fn record(&self, event: OpEvent) {
        self.inner.events.lock().unwrap().push(event);
    }
}

impl OpMode<TestPage> for RecordingOpMode {
    fn rx(
        &self,
        rxcb: &mut RxCmdBuffer<TestPage>,
        cmd: Option<PendingCommand>,
    ) -> Result<(), HandlerError> {
        let Some(hdr) = rxcb.header() else {
            return Err(HandlerError(-22));
        };
        let allocs_seen = self
            .inner
            .bus
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |bus| bus.alloc_requests().len());
        self.inner.frames.lock().unwrap().push(RxFrame {
            cmd: hdr.cmd,
            offset: rxcb.offset(),
            reclaim: cmd,
            allocs_seen,
        });

        let steal = self.inner.steal_all.load(Ordering::SeqCst)
            || self.inner.steal_cmds.lock().unwrap().contains(&hdr.cmd);
        if steal && !rxcb.page_stolen() {
            let page = rxcb.steal_page();
            self.inner.stolen.lock().unwrap().push(page);
        }
        Ok(())
    }

    fn command_complete(
        &self,
        _rxcb: &RxCmdBuffer<TestPage>,
        cmd: PendingCommand,
        status: Result<(), HandlerError>,
    ) {
        self.record(OpEvent::CommandComplete {
            cmd: cmd.cmd,
            index: cmd.index,
            ok: status.is_ok(),
        });
    }

    fn nic_error(&self) {
        self.record(OpEvent::NicError);
    }

    fn hw_rf_kill(&self, killed: bool) {
        self.record(OpEvent::RfKill(killed));
    }

    fn wake_tx_queues(&self) {
        self.record(OpEvent::WakeTxQueues);
    }

    fn control_tx_complete(&self) {
        self.record(OpEvent::ControlTxComplete);
    }
}

#[derive(Clone, Default)]
pub struct TestWorkQueue {
    bottom_half: Arc<AtomicUsize>,
    replenish: Arc<AtomicUsize>,
}

impl TestWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bottom_half_requests(&self) -> usize {
        self.bottom_half.load(Ordering::SeqCst)
    }

    pub fn replenish_requests(&self) -> usize {
        self.replenish.load(Ordering::SeqCst)
    }
}

impl WorkQueue for TestWorkQueue {
    fn schedule_bottom_half(&self) {
        self.bottom_half.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule_replenish(&self) {
        self.replenish.fetch_add(1, Ordering::SeqCst);
    }
}

pub type TestTransport = RxTransport<TestBus, RecordingOpMode, TestWorkQueue>;

/// Transport plus handles on its simulated collaborators
pub struct Harness {
    pub transport: TestTransport,
    pub bus: TestBus,
    pub op: RecordingOpMode,
    pub work: TestWorkQueue,
}

impl Harness {
    /// Device closes the next `n` descriptors
    pub fn device_close(&self, n: usize) {
        let status = self.bus.coherent(1);
        let closed = status.read(0) & 0xFFFF;
        status.write(0, (closed + n as u32) & 0x0FFF);
    }

    /// Device closes up to `want` descriptors, stopping where hardware
    /// would: at the published write pointer or an empty slot
    ///
    /// Holds the queue lock while it updates the status block, so a
    /// concurrent restart cannot slip in between.
    pub fn close_published(&self, want: usize) -> usize {
        let q = self.transport.rx().queue().lock();
        let size = q.ring.size();
        let limit = q.ring.write_actual();
        let mut at = q.ring.closed_index();
        let mut n = 0;
        while n < want && at != limit && q.ring.slots()[at].is_some() {
            at = (at + 1) & (size - 1);
            n += 1;
        }
        self.device_close(n);
        n
    }

    /// Device signals receive completion through the configured path
    pub fn raise_rx(&self) {
        match self.transport.irq().cause_table_cursor() {
            Some(cursor) if self.transport.irq().cause_table_enabled() => {
                // FH_RX is bit 15 in the table's compressed layout
                self.bus.coherent(2).write(cursor, 0x8000);
            }
            _ => self.bus.raise(IntCause::FH_RX.bits()),
        }
    }
}

/// Transport over a fresh simulated device, not started
pub fn harness(config: RxConfig) -> Harness {
    let bus = TestBus::new();
    let op = RecordingOpMode::new();
    let work = TestWorkQueue::new();
    let transport = RxTransport::new(bus.clone(), op.clone(), work.clone(), config)
        .expect("transport construction");
    Harness {
        transport,
        bus,
        op,
        work,
    }
}

/// Same as `harness`, with `start()` already called
pub fn started(config: RxConfig) -> Harness {
    let t = harness(config);
    t.transport.start().expect("transport start");
    t
}

struct CaptureLog {
    records: Mutex<Vec<(log::Level, String)>>,
}

impl log::Log for CaptureLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        self.records
            .lock()
            .unwrap()
            .push((record.level(), record.args().to_string()));
    }

    fn flush(&self) {}
}

static CAPTURE: CaptureLog = CaptureLog {
    records: Mutex::new(Vec::new()),
};

/// Install the capturing logger for this test process
///
/// Tests run in parallel and share it, so look for your own messages rather
/// than counting everything.
pub fn capture_logs() {
    if log::set_logger(&CAPTURE).is_ok() {
        log::set_max_level(log::LevelFilter::Trace);
    }
}

/// Captured records whose text contains `needle`
pub fn logged(needle: &str) -> Vec<(log::Level, String)> {
    CAPTURE
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, text)| text.contains(needle))
        .cloned()
        .collect()
}
