//! Synthetic test-pattern generator.
//!
//! Once enabled through its register interface the device alternates between
//! blanking and frame-valid phases on the virtual clock, delivering a cached
//! fixed pattern to guest memory at every frame start and raising an
//! interrupt at both frame boundaries, the way an image sensor's vertical
//! sync timing would look from the receiving side.

use bitflags::bitflags;
use isp_time::{Clock, TimerId, TimerQueue};
use memory::GuestMemory;

use crate::irq::IrqLine;
use crate::module::{DmaDescriptor, DmaPlane, DmaState, IspError, IspIpOps, IspModule};
use crate::IspDeviceTimer;

// Register map (byte offsets; 32-bit registers).
pub const REG_ENABLE: u32 = 0x00;
pub const REG_OUT_ADDR_LO_0: u32 = 0x08;
pub const REG_OUT_ADDR_HI_0: u32 = 0x0C;
pub const REG_OUT_ADDR_LO_1: u32 = 0x10;
pub const REG_OUT_ADDR_HI_1: u32 = 0x14;
pub const REG_OUT_FORMAT: u32 = 0x18;
pub const REG_OUT_WIDTH: u32 = 0x1C;
pub const REG_OUT_HEIGHT: u32 = 0x20;
/// Read-only; holds a [`PatternGenStatus`] value.
pub const REG_OUT_STATUS: u32 = 0x24;
/// Frame-valid phase duration, microseconds.
pub const REG_VVALID_DURATION: u32 = 0x28;
/// Blanking phase duration, microseconds.
pub const REG_VBLANK_DURATION: u32 = 0x2C;
/// Interrupt status word; see [`IrqStatus`]. The device only ever sets bits;
/// clearing them is the host's job via a plain register write.
pub const REG_IRQ: u32 = 0x30;

/// The DMA channel carrying generated frames (the only one this device drives).
pub const OUT_DMA_CHANNEL: usize = 0;

/// Byte the synthetic test image is filled with.
pub const PATTERN_FILL_BYTE: u8 = 0xDE;

/// Advisory floor for the configured phase durations. Shorter intervals are
/// accepted but tend to starve the host scheduler.
pub const MIN_RECOMMENDED_INTERVAL_US: u32 = 8 * 1000;

/// Value enumeration of [`REG_OUT_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PatternGenStatus {
    Idle = 0,
    FrameValid = 1,
    Blanking = 2,
}

impl PatternGenStatus {
    fn from_reg(raw: u32) -> Self {
        match raw {
            0 => PatternGenStatus::Idle,
            1 => PatternGenStatus::FrameValid,
            2 => PatternGenStatus::Blanking,
            // The status register is read-only from the outside; only this
            // device ever stores to it.
            _ => unreachable!("corrupt status register value {raw:#x}"),
        }
    }
}

/// Value enumeration of [`REG_OUT_FORMAT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PixelFormat {
    /// 8-bit single-plane raw Bayer raster; the only supported format.
    Raw8 = 0,
}

impl PixelFormat {
    fn from_reg(raw: u32) -> Result<Self, IspError> {
        match raw {
            0 => Ok(PixelFormat::Raw8),
            _ => Err(IspError::InvalidConfig("unsupported pixel format")),
        }
    }

    fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Raw8 => 1,
        }
    }
}

bitflags! {
    /// [`REG_IRQ`] layout, wire-compatible with the register bank via
    /// [`IrqStatus::bits`] / [`IrqStatus::from_bits_retain`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrqStatus: u32 {
        const FRAME_START = 1 << 0;
        const FRAME_END = 1 << 1;
        const ERROR = 1 << 2;
    }
}

impl IrqStatus {
    pub fn frame_start(self) -> bool {
        self.contains(Self::FRAME_START)
    }

    pub fn frame_end(self) -> bool {
        self.contains(Self::FRAME_END)
    }

    pub fn error(self) -> bool {
        self.contains(Self::ERROR)
    }
}

/// Pattern-generator device instance.
///
/// Single-threaded and event-driven: register writes and timer callbacks run
/// to completion, and every phase change schedules the next boundary on the
/// host timer queue rather than blocking.
pub struct PatternGen<C: Clock> {
    module: IspModule,
    clock: C,

    // Created lazily on first enable and re-armed every cycle after that.
    fs_timer: Option<TimerId>,
    fe_timer: Option<TimerId>,

    /// Disable requests are honored at the next timer boundary, never
    /// mid-cycle.
    stop_requested: bool,

    /// Exists exactly while the device is outside `Idle` (or committed to
    /// leaving it). Written once at enable, read-only during DMA delivery.
    pattern_cache: Option<Vec<u8>>,
}

impl<C: Clock> PatternGen<C> {
    pub fn new(clock: C) -> Self {
        Self {
            module: IspModule::new(),
            clock,
            fs_timer: None,
            fe_timer: None,
            stop_requested: false,
            pattern_cache: None,
        }
    }

    pub fn status(&self) -> PatternGenStatus {
        PatternGenStatus::from_reg(self.module.regs().get(REG_OUT_STATUS))
    }

    pub fn irq_status(&self) -> IrqStatus {
        IrqStatus::from_bits_retain(self.module.regs().get(REG_IRQ))
    }

    pub fn pattern_cache(&self) -> Option<&[u8]> {
        self.pattern_cache.as_deref()
    }

    /// Returns the device to `Idle`, releases per-cycle resources, and
    /// disarms any pending frame timer so a stale deadline cannot fire into
    /// an idle device. Register contents and timer handles survive a reset.
    pub fn reset(&mut self, timers: &mut TimerQueue<IspDeviceTimer>) {
        self.set_status(PatternGenStatus::Idle);
        self.stop_requested = false;
        self.pattern_cache = None;
        self.module.set_dma_enabled(OUT_DMA_CHANNEL, false);
        for id in [self.fs_timer, self.fe_timer].into_iter().flatten() {
            timers.disarm(id);
        }
    }

    fn set_status(&mut self, status: PatternGenStatus) {
        self.module.regs_mut().set(REG_OUT_STATUS, status as u32);
    }

    fn out_addr(&self, lo_reg: u32, hi_reg: u32) -> u64 {
        let regs = self.module.regs();
        (u64::from(regs.get(hi_reg)) << 32) | u64::from(regs.get(lo_reg))
    }

    fn frame_len_bytes(&self) -> Result<u32, IspError> {
        let regs = self.module.regs();
        let format = PixelFormat::from_reg(regs.get(REG_OUT_FORMAT))?;
        regs.get(REG_OUT_WIDTH)
            .checked_mul(regs.get(REG_OUT_HEIGHT))
            .and_then(|px| px.checked_mul(format.bytes_per_pixel()))
            .ok_or(IspError::InvalidConfig("frame dimensions overflow"))
    }

    /// Derives the output channel descriptor from the configuration
    /// registers, without installing it. Plane 1 is configurable but never
    /// written by the current single-plane format.
    fn output_descriptor(&self) -> Result<DmaDescriptor, IspError> {
        let len = self.frame_len_bytes()?;
        let plane0 = DmaPlane {
            addr: self.out_addr(REG_OUT_ADDR_LO_0, REG_OUT_ADDR_HI_0),
            len,
        };
        let addr1 = self.out_addr(REG_OUT_ADDR_LO_1, REG_OUT_ADDR_HI_1);
        let plane1 = DmaPlane {
            addr: addr1,
            len: if addr1 != 0 { len } else { 0 },
        };
        Ok(DmaDescriptor {
            planes: [plane0, plane1],
        })
    }

    fn init_pattern_cache(&mut self) -> Result<(), IspError> {
        if self.pattern_cache.is_some() {
            // A live cache means the previous teardown never finished;
            // refuse rather than double-allocate.
            return Err(IspError::InvalidState {
                status: self.status() as u32,
            });
        }
        let len = self.frame_len_bytes()? as usize;
        self.pattern_cache = Some(vec![PATTERN_FILL_BYTE; len]);
        Ok(())
    }

    fn enable(&mut self, timers: &mut TimerQueue<IspDeviceTimer>) -> Result<(), IspError> {
        if self.status() != PatternGenStatus::Idle {
            return Err(IspError::InvalidState {
                status: self.status() as u32,
            });
        }
        // Validated before anything is installed: a failed enable must leave
        // the channel table untouched.
        let desc = self.output_descriptor()?;
        desc.validate(1)?;

        // Timer handles are created once and re-armed on every cycle.
        if self.fs_timer.is_none() {
            self.fs_timer = Some(
                timers
                    .create(IspDeviceTimer::PatternGenFrameStart)
                    .ok_or(IspError::ResourceExhausted("no free frame-start timer"))?,
            );
        }
        if self.fe_timer.is_none() {
            self.fe_timer = Some(
                timers
                    .create(IspDeviceTimer::PatternGenFrameEnd)
                    .ok_or(IspError::ResourceExhausted("no free frame-end timer"))?,
            );
        }

        self.init_pattern_cache()?;
        self.module.configure_dma(OUT_DMA_CHANNEL, desc)?;
        self.module.set_dma_enabled(OUT_DMA_CHANNEL, true);

        self.set_status(PatternGenStatus::Blanking);
        self.arm_frame_start(timers);
        Ok(())
    }

    fn disable(&mut self) {
        if self.status() == PatternGenStatus::Idle {
            // Idempotent: releasing an already-released cache is a no-op.
            self.pattern_cache = None;
        } else {
            // The in-flight cycle runs to its next timer boundary; the cache
            // must not be torn down under a potential DMA transfer.
            self.stop_requested = true;
        }
    }

    fn arm_frame_start(&mut self, timers: &mut TimerQueue<IspDeviceTimer>) {
        let vblank_us = u64::from(self.module.regs().get(REG_VBLANK_DURATION));
        let id = self.fs_timer.expect("frame-start timer exists while enabled");
        timers.schedule(id, self.clock.now_ns() + vblank_us * 1_000);
    }

    fn arm_frame_end(&mut self, timers: &mut TimerQueue<IspDeviceTimer>) {
        let vvalid_us = u64::from(self.module.regs().get(REG_VVALID_DURATION));
        let id = self.fe_timer.expect("frame-end timer exists while enabled");
        timers.schedule(id, self.clock.now_ns() + vvalid_us * 1_000);
    }

    fn stop_cycle(&mut self) {
        self.set_status(PatternGenStatus::Idle);
        self.pattern_cache = None;
        self.module.set_dma_enabled(OUT_DMA_CHANNEL, false);
        // Cleared here so a later enable starts a fresh cycle.
        self.stop_requested = false;
    }

    fn raise_irq(&mut self, flag: IrqStatus, irq: &mut dyn IrqLine) {
        let status = self.irq_status() | flag;
        self.module.regs_mut().set(REG_IRQ, status.bits());
        self.module.set_irq(irq, status.bits());
    }

    /// Frame-start boundary: `Blanking` -> `FrameValid`, or `Blanking` ->
    /// `Idle` when a stop is pending.
    fn frame_start(
        &mut self,
        timers: &mut TimerQueue<IspDeviceTimer>,
        mem: &mut dyn GuestMemory,
        irq: &mut dyn IrqLine,
    ) {
        let status = self.status();
        assert_eq!(
            status,
            PatternGenStatus::Blanking,
            "frame-start timer fired while device status is {status:?}"
        );

        if self.stop_requested {
            self.stop_cycle();
            return;
        }

        self.set_status(PatternGenStatus::FrameValid);
        self.raise_irq(IrqStatus::FRAME_START, irq);
        self.arm_frame_end(timers);

        // The copy has to land before the frame-end boundary. A failure is a
        // dropped frame, not a reason to stall the cycle.
        let cache = self
            .pattern_cache
            .as_deref()
            .expect("pattern cache exists outside idle");
        if let Err(err) = self.module.dma_write(mem, OUT_DMA_CHANNEL, cache, 0) {
            tracing::warn!(%err, "pattern dma write failed; frame dropped");
        }
    }

    /// Frame-end boundary: `FrameValid` -> `Blanking`, or `FrameValid` ->
    /// `Idle` when a stop is pending.
    fn frame_end(&mut self, timers: &mut TimerQueue<IspDeviceTimer>, irq: &mut dyn IrqLine) {
        let status = self.status();
        assert_eq!(
            status,
            PatternGenStatus::FrameValid,
            "frame-end timer fired while device status is {status:?}"
        );

        let dma_state = self.module.dma_state(OUT_DMA_CHANNEL);
        if dma_state != DmaState::Idle {
            // The configured durations are supposed to leave the copy
            // finished well inside the frame-valid window.
            tracing::error!(?dma_state, "dma still busy at frame end; check configured durations");
        }

        if self.stop_requested {
            self.stop_cycle();
            return;
        }

        self.set_status(PatternGenStatus::Blanking);
        self.raise_irq(IrqStatus::FRAME_END, irq);
        self.arm_frame_start(timers);
    }

    /// Dispatches a fired timer back into the state machine.
    pub fn handle_timer_event(
        &mut self,
        event: IspDeviceTimer,
        timers: &mut TimerQueue<IspDeviceTimer>,
        mem: &mut dyn GuestMemory,
        irq: &mut dyn IrqLine,
    ) {
        match event {
            IspDeviceTimer::PatternGenFrameStart => self.frame_start(timers, mem, irq),
            IspDeviceTimer::PatternGenFrameEnd => self.frame_end(timers, irq),
        }
    }
}

impl<C: Clock> IspIpOps for PatternGen<C> {
    type TimerEvent = IspDeviceTimer;

    fn module(&self) -> &IspModule {
        &self.module
    }

    fn module_mut(&mut self) -> &mut IspModule {
        &mut self.module
    }

    fn reg_write(
        &mut self,
        addr: u32,
        value: u32,
        timers: &mut TimerQueue<IspDeviceTimer>,
    ) -> Result<(), IspError> {
        match addr {
            REG_ENABLE => {
                if value != 0 {
                    self.enable(timers)
                } else {
                    self.disable();
                    Ok(())
                }
            }
            // Configuration is stored as written; it is only validated
            // against at the next enable.
            REG_OUT_ADDR_LO_0
            | REG_OUT_ADDR_HI_0
            | REG_OUT_ADDR_LO_1
            | REG_OUT_ADDR_HI_1
            | REG_OUT_FORMAT
            | REG_OUT_WIDTH
            | REG_OUT_HEIGHT
            | REG_VVALID_DURATION
            | REG_VBLANK_DURATION
            | REG_IRQ => Ok(()),
            // OUT_STATUS is read-only; everything else in the window is
            // unmapped.
            _ => Err(IspError::InvalidAddress { offset: addr }),
        }
    }
}
