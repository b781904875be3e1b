use isp_devices::pattern_gen::{
    IrqStatus, PatternGenStatus, PATTERN_FILL_BYTE, REG_ENABLE, REG_IRQ, REG_OUT_ADDR_LO_0,
    REG_OUT_FORMAT, REG_OUT_HEIGHT, REG_OUT_WIDTH, REG_VBLANK_DURATION, REG_VVALID_DURATION,
};
use isp_devices::{IrqRecorder, IspDeviceTimer, IspIpOps, PatternGen};
use isp_time::{Clock, ManualClock, TimerQueue};
use memory::{GuestMemory, GuestMemoryResult, VecGuestMemory};

const OUT_ADDR: u64 = 0x2000;
const VBLANK_US: u32 = 1_000;
const VVALID_US: u32 = 2_000;

/// Guest memory wrapper counting DMA-style writes.
struct CountingMem {
    inner: VecGuestMemory,
    writes: usize,
}

impl CountingMem {
    fn new(size: usize) -> Self {
        Self {
            inner: VecGuestMemory::new(size),
            writes: 0,
        }
    }
}

impl GuestMemory for CountingMem {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        self.inner.read_into(paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        self.writes += 1;
        self.inner.write_from(paddr, src)
    }
}

fn new_device(
    timers: &mut TimerQueue<IspDeviceTimer>,
    clock: &ManualClock,
) -> PatternGen<ManualClock> {
    let mut dev = PatternGen::new(clock.clone());
    dev.mmio_write(REG_OUT_ADDR_LO_0, OUT_ADDR as u32, timers)
        .unwrap();
    dev.mmio_write(REG_OUT_FORMAT, 0, timers).unwrap();
    dev.mmio_write(REG_OUT_WIDTH, 4, timers).unwrap();
    dev.mmio_write(REG_OUT_HEIGHT, 4, timers).unwrap();
    dev.mmio_write(REG_VBLANK_DURATION, VBLANK_US, timers).unwrap();
    dev.mmio_write(REG_VVALID_DURATION, VVALID_US, timers).unwrap();
    dev
}

fn drain_due(
    dev: &mut PatternGen<ManualClock>,
    timers: &mut TimerQueue<IspDeviceTimer>,
    clock: &ManualClock,
    mem: &mut dyn GuestMemory,
    irq: &mut IrqRecorder,
) {
    while let Some((_, event)) = timers.pop_due(clock.now_ns()) {
        dev.handle_timer_event(event, timers, mem, irq);
    }
}

#[test]
fn full_cycle_matches_the_programmed_timing() {
    let clock = ManualClock::new();
    let mut timers = TimerQueue::new();
    let mut mem = VecGuestMemory::new(0x4000);
    let mut irq = IrqRecorder::new();
    let mut dev = new_device(&mut timers, &clock);

    // t=0: enable -> Blanking, no interrupt yet.
    dev.mmio_write(REG_ENABLE, 1, &mut timers).unwrap();
    assert_eq!(dev.status(), PatternGenStatus::Blanking);
    assert!(irq.take_events().is_empty());

    // t=1000us: frame start. IRQ first, then the pattern lands in memory.
    clock.advance_us(u64::from(VBLANK_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
    assert_eq!(dev.status(), PatternGenStatus::FrameValid);
    assert_eq!(irq.take_events(), vec![IrqStatus::FRAME_START.bits()]);

    let mut frame = [0u8; 16];
    mem.read_into(OUT_ADDR, &mut frame).unwrap();
    assert_eq!(frame, [PATTERN_FILL_BYTE; 16]);
    // Nothing written past the configured plane length.
    assert_eq!(mem.read_u8(OUT_ADDR + 16).unwrap(), 0);

    // Host acknowledges by clearing the status word.
    dev.mmio_write(REG_IRQ, 0, &mut timers).unwrap();

    // t=3000us: frame end -> back to Blanking.
    clock.advance_us(u64::from(VVALID_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
    assert_eq!(dev.status(), PatternGenStatus::Blanking);
    assert_eq!(irq.take_events(), vec![IrqStatus::FRAME_END.bits()]);
    dev.mmio_write(REG_IRQ, 0, &mut timers).unwrap();

    // t=4000us: the cycle repeats.
    clock.advance_us(u64::from(VBLANK_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
    assert_eq!(dev.status(), PatternGenStatus::FrameValid);
    assert_eq!(irq.take_events(), vec![IrqStatus::FRAME_START.bits()]);
}

#[test]
fn interrupt_flags_alternate_across_cycles() {
    let clock = ManualClock::new();
    let mut timers = TimerQueue::new();
    let mut mem = VecGuestMemory::new(0x4000);
    let mut irq = IrqRecorder::new();
    let mut dev = new_device(&mut timers, &clock);

    dev.mmio_write(REG_ENABLE, 1, &mut timers).unwrap();

    let mut delivered = Vec::new();
    for _ in 0..3 {
        clock.advance_us(u64::from(VBLANK_US));
        drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
        delivered.extend(irq.take_events());
        dev.mmio_write(REG_IRQ, 0, &mut timers).unwrap();

        clock.advance_us(u64::from(VVALID_US));
        drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
        delivered.extend(irq.take_events());
        dev.mmio_write(REG_IRQ, 0, &mut timers).unwrap();
    }

    let fs = IrqStatus::FRAME_START.bits();
    let fe = IrqStatus::FRAME_END.bits();
    assert_eq!(delivered, vec![fs, fe, fs, fe, fs, fe]);
}

#[test]
fn irq_bits_are_sticky_until_the_host_clears_them() {
    let clock = ManualClock::new();
    let mut timers = TimerQueue::new();
    let mut mem = VecGuestMemory::new(0x4000);
    let mut irq = IrqRecorder::new();
    let mut dev = new_device(&mut timers, &clock);

    dev.mmio_write(REG_ENABLE, 1, &mut timers).unwrap();

    clock.advance_us(u64::from(VBLANK_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
    clock.advance_us(u64::from(VVALID_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);

    // Without a host clear, frame-end is delivered on top of the still-set
    // frame-start bit.
    let fs = IrqStatus::FRAME_START.bits();
    assert_eq!(
        irq.take_events(),
        vec![fs, (IrqStatus::FRAME_START | IrqStatus::FRAME_END).bits()]
    );
    assert!(dev.irq_status().frame_start());
    assert!(dev.irq_status().frame_end());
    assert!(!dev.irq_status().error());
}

#[test]
fn dma_write_happens_exactly_once_per_frame_start() {
    let clock = ManualClock::new();
    let mut timers = TimerQueue::new();
    let mut mem = CountingMem::new(0x4000);
    let mut irq = IrqRecorder::new();
    let mut dev = new_device(&mut timers, &clock);

    dev.mmio_write(REG_ENABLE, 1, &mut timers).unwrap();
    assert_eq!(mem.writes, 0);

    for frame in 1..=4usize {
        clock.advance_us(u64::from(VBLANK_US));
        drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
        assert_eq!(mem.writes, frame);

        clock.advance_us(u64::from(VVALID_US));
        drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
        assert_eq!(mem.writes, frame);
    }
}

#[test]
fn failed_dma_write_drops_the_frame_but_keeps_cycling() {
    let clock = ManualClock::new();
    let mut timers = TimerQueue::new();
    // Too small for the configured destination: every copy fails.
    let mut mem = VecGuestMemory::new(0x100);
    let mut irq = IrqRecorder::new();
    let mut dev = new_device(&mut timers, &clock);

    dev.mmio_write(REG_ENABLE, 1, &mut timers).unwrap();

    clock.advance_us(u64::from(VBLANK_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
    assert_eq!(dev.status(), PatternGenStatus::FrameValid);

    clock.advance_us(u64::from(VVALID_US));
    drain_due(&mut dev, &mut timers, &clock, &mut mem, &mut irq);
    assert_eq!(dev.status(), PatternGenStatus::Blanking);

    // Both boundary interrupts were still delivered.
    assert_eq!(irq.take_events().len(), 2);
    assert!(timers.next_deadline().is_some());
}
