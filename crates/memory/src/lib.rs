#![forbid(unsafe_code)]

mod phys;

pub use phys::{GuestMemory, GuestMemoryError, GuestMemoryResult, VecGuestMemory};
