use crate::module::IspError;

/// Size of the I/O window every ISP IP block responds to.
pub const ISP_IOMEM_SIZE: u32 = 0x400;

const REG_COUNT: usize = (ISP_IOMEM_SIZE / 4) as usize;

/// Fixed register file shared by every ISP IP block.
///
/// Registers are 32-bit, native endian, addressed by 4-byte-aligned byte
/// offset and accessed in 4-byte units only. The bank is zero-initialized at
/// construction and never resized.
#[derive(Debug, Clone)]
pub struct RegisterBank {
    regs: Vec<u32>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            regs: vec![0; REG_COUNT],
        }
    }

    /// Validates an externally supplied register offset against the I/O
    /// window. MMIO dispatch calls this before touching any handler.
    pub fn check_offset(offset: u32) -> Result<(), IspError> {
        if offset >= ISP_IOMEM_SIZE || offset % 4 != 0 {
            return Err(IspError::InvalidAddress { offset });
        }
        Ok(())
    }

    // Internal accessors take offsets that have already been validated (or
    // are compile-time register constants); a violation here is a model bug.
    fn index(offset: u32) -> usize {
        assert!(
            offset < ISP_IOMEM_SIZE && offset % 4 == 0,
            "register offset {offset:#x} outside the i/o window"
        );
        (offset / 4) as usize
    }

    pub fn get(&self, offset: u32) -> u32 {
        self.regs[Self::index(offset)]
    }

    pub fn set(&mut self, offset: u32, value: u32) {
        self.regs[Self::index(offset)] = value;
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}
