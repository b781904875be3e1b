//! Shared ISP device framework: the single funnel for register traffic and
//! DMA writes for the whole peripheral family. Frame timing lives in the
//! concrete devices, never here.

use isp_time::TimerQueue;
use memory::{GuestMemory, GuestMemoryError};
use thiserror::Error;

use crate::irq::IrqLine;
use crate::regs::RegisterBank;

/// Maximum memory planes a DMA channel can carry.
pub const MAX_PLANES: usize = 2;

pub const MAX_IN_DMA_CHANNELS: usize = 3;
pub const MAX_OUT_DMA_CHANNELS: usize = 3;
pub const MAX_DMA_CHANNELS: usize = MAX_IN_DMA_CHANNELS + MAX_OUT_DMA_CHANNELS;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IspError {
    /// Register offset outside the I/O window, unaligned, or not a writable
    /// register of the selected device.
    #[error("invalid register offset {offset:#x}")]
    InvalidAddress { offset: u32 },
    /// Operation attempted while the device state machine is in the wrong
    /// state. Carries the raw status-register value at the time of the call.
    #[error("operation not permitted while device status is {status}")]
    InvalidState { status: u32 },
    /// DMA channel not configured for the operation, or unsupported output
    /// configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Timer-handle or buffer allocation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// The address-space write behind a DMA transfer did not complete cleanly.
    #[error("dma write failed: {0}")]
    DmaFailure(#[from] GuestMemoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaState {
    Idle,
    Generating,
    /// Reported for out-of-range channel indices.
    Invalid,
}

/// One memory plane of a DMA destination: where to write and how much.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaPlane {
    pub addr: u64,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaDescriptor {
    pub planes: [DmaPlane; MAX_PLANES],
}

impl DmaDescriptor {
    /// Precondition gate before starting generation: every required plane
    /// must carry a non-zero destination address and length.
    pub fn validate(&self, plane_count: usize) -> Result<(), IspError> {
        if plane_count > MAX_PLANES {
            return Err(IspError::InvalidConfig(
                "plane count exceeds the supported maximum",
            ));
        }
        for plane in &self.planes[..plane_count] {
            if plane.addr == 0 || plane.len == 0 {
                return Err(IspError::InvalidConfig(
                    "dma plane missing destination address or length",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct DmaChannel {
    desc: DmaDescriptor,
    enabled: bool,
    state: DmaState,
}

impl DmaChannel {
    fn new() -> Self {
        Self {
            desc: DmaDescriptor::default(),
            enabled: false,
            state: DmaState::Idle,
        }
    }
}

/// Register bank plus DMA channel table of one device instance.
///
/// Concrete devices own an `IspModule` by composition and drive it from
/// their [`IspIpOps`] implementation and timer callbacks.
#[derive(Debug)]
pub struct IspModule {
    regs: RegisterBank,
    dma: [DmaChannel; MAX_DMA_CHANNELS],
}

impl IspModule {
    pub fn new() -> Self {
        Self {
            regs: RegisterBank::new(),
            dma: std::array::from_fn(|_| DmaChannel::new()),
        }
    }

    pub fn regs(&self) -> &RegisterBank {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterBank {
        &mut self.regs
    }

    /// Installs a channel descriptor, resetting the channel to disabled/idle.
    pub fn configure_dma(&mut self, chan: usize, desc: DmaDescriptor) -> Result<(), IspError> {
        let channel = self
            .dma
            .get_mut(chan)
            .ok_or(IspError::InvalidConfig("dma channel index out of range"))?;
        channel.desc = desc;
        channel.enabled = false;
        channel.state = DmaState::Idle;
        Ok(())
    }

    pub fn set_dma_enabled(&mut self, chan: usize, enabled: bool) {
        if let Some(channel) = self.dma.get_mut(chan) {
            channel.enabled = enabled;
        }
    }

    pub fn dma_enabled(&self, chan: usize) -> bool {
        self.dma.get(chan).map(|c| c.enabled).unwrap_or(false)
    }

    /// [`DmaDescriptor::validate`] for the channel's installed descriptor.
    pub fn validate_dma_config(&self, chan: usize, plane_count: usize) -> Result<(), IspError> {
        let channel = self
            .dma
            .get(chan)
            .ok_or(IspError::InvalidConfig("dma channel index out of range"))?;
        channel.desc.validate(plane_count)
    }

    pub fn dma_state(&self, chan: usize) -> DmaState {
        self.dma
            .get(chan)
            .map(|c| c.state)
            .unwrap_or(DmaState::Invalid)
    }

    /// Copies `buf` to the plane's configured destination address.
    ///
    /// The channel reads back as `Generating` for the duration of the copy
    /// and returns to `Idle` regardless of the outcome; a failed copy is
    /// logged and surfaced to the caller but never leaves the channel stuck.
    pub fn dma_write(
        &mut self,
        mem: &mut dyn GuestMemory,
        chan: usize,
        buf: &[u8],
        plane: usize,
    ) -> Result<(), IspError> {
        let channel = self
            .dma
            .get_mut(chan)
            .ok_or(IspError::InvalidConfig("dma channel index out of range"))?;
        let dest = channel
            .desc
            .planes
            .get(plane)
            .copied()
            .ok_or(IspError::InvalidConfig("dma plane index out of range"))?;

        channel.state = DmaState::Generating;
        let result = mem.write_from(dest.addr, buf);
        channel.state = DmaState::Idle;

        result.map_err(|err| {
            tracing::warn!(chan, plane, addr = dest.addr, len = buf.len(), %err, "dma write failed");
            IspError::DmaFailure(err)
        })
    }

    /// Forwards the raw interrupt-status value to the host's line. No state
    /// is kept here.
    pub fn set_irq(&self, line: &mut dyn IrqLine, value: u32) {
        line.set_irq(value);
    }
}

impl Default for IspModule {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-device register semantics, plugged into the framework's MMIO funnel.
///
/// The framework validates every offset against the I/O window, forwards the
/// access to the device hook, and on a successful write stores the raw value
/// into the register bank. A failing hook leaves the bank unmodified.
pub trait IspIpOps {
    /// Timer-event type this device schedules on the host timer queue.
    type TimerEvent: Copy;

    fn module(&self) -> &IspModule;
    fn module_mut(&mut self) -> &mut IspModule;

    /// Device-specific write handler. Side effects (arming timers, state
    /// transitions) happen here; the raw value is stored by the framework
    /// afterwards.
    fn reg_write(
        &mut self,
        addr: u32,
        value: u32,
        timers: &mut TimerQueue<Self::TimerEvent>,
    ) -> Result<(), IspError>;

    /// Device-specific read hook; the default returns the raw bank value.
    fn reg_read(&mut self, addr: u32) -> u32 {
        self.module().regs().get(addr)
    }

    fn mmio_read(&mut self, offset: u32) -> Result<u32, IspError> {
        RegisterBank::check_offset(offset)?;
        Ok(self.reg_read(offset))
    }

    fn mmio_write(
        &mut self,
        offset: u32,
        value: u32,
        timers: &mut TimerQueue<Self::TimerEvent>,
    ) -> Result<(), IspError> {
        RegisterBank::check_offset(offset)?;
        self.reg_write(offset, value, timers)?;
        self.module_mut().regs_mut().set(offset, value);
        Ok(())
    }
}
