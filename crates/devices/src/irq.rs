/// A single device interrupt line.
///
/// Devices deliver their raw interrupt-status word as-is; the consumer on the
/// other end of the line interprets the bits.
pub trait IrqLine {
    fn set_irq(&mut self, value: u32);
}

/// Sink for devices with no interrupt line wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIrq;

impl IrqLine for NoIrq {
    fn set_irq(&mut self, _value: u32) {}
}

/// Records every value delivered to the line, for tests and harnesses.
#[derive(Debug, Default)]
pub struct IrqRecorder {
    level: u32,
    events: Vec<u32>,
}

impl IrqRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value delivered to the line.
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn take_events(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.events)
    }
}

impl IrqLine for IrqRecorder {
    fn set_irq(&mut self, value: u32) {
        self.level = value;
        self.events.push(value);
    }
}
