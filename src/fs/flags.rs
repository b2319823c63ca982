//! Descriptor-flags and open-flags bitsets for the filesystem host
//! (SPEC_FULL.md §4.E), in the bitflags idiom the teacher crate uses for
//! its own access/open flag types.

use bitflags::bitflags;

bitflags! {
    /// Flags passed to `open-at`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct OpenFlags: u32 {
        const CREATE    = 0b0000_0001;
        const DIRECTORY = 0b0000_0010;
        const EXCLUSIVE = 0b0000_0100;
        const TRUNCATE  = 0b0000_1000;
    }
}

bitflags! {
    /// Flags describing how a descriptor was (or should be) opened.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct DescriptorFlags: u32 {
        const READ       = 0b0000_0001;
        const WRITE      = 0b0000_0010;
        const APPEND     = 0b0000_0100;
        const NO_FOLLOW  = 0b0000_1000;
    }
}

impl DescriptorFlags {
    pub fn is_write_capable(self) -> bool {
        self.contains(DescriptorFlags::WRITE)
    }
}
