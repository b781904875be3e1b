//! Virtual ISP peripheral family.
//!
//! The `module` layer is the shared device framework: a bounds-checked
//! register bank, a fixed DMA channel table with descriptor validation, and
//! interrupt-line forwarding. Concrete IP blocks (currently only the test
//! pattern generator) compose an [`IspModule`] and plug their register
//! semantics in through [`IspIpOps`].

#![forbid(unsafe_code)]

pub mod irq;
pub mod module;
pub mod pattern_gen;
pub mod regs;

pub use irq::{IrqLine, IrqRecorder, NoIrq};
pub use module::{DmaDescriptor, DmaPlane, DmaState, IspError, IspIpOps, IspModule};
pub use pattern_gen::PatternGen;
pub use regs::{RegisterBank, ISP_IOMEM_SIZE};

/// Deferred callbacks scheduled by devices in this family.
///
/// The host owns a single `TimerQueue<IspDeviceTimer>` and routes fired
/// events back to the owning device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspDeviceTimer {
    PatternGenFrameStart,
    PatternGenFrameEnd,
}
