//! Version field decoding.

/// Top bits that mark a signaling version.
pub const VERSIONBITS_TOP_BITS: u32 = 0x2000_0000;

/// Mask selecting the top three bits of the version.
pub const VERSIONBITS_TOP_MASK: u32 = 0xE000_0000;

/// Highest bit index that can carry a signal.
pub const MAX_SIGNAL_BIT: u8 = 27;

/// Returns true if the top three bits of `version` are `001`.
pub fn is_signaling_version(version: u32) -> bool {
    (version & VERSIONBITS_TOP_MASK) == VERSIONBITS_TOP_BITS
}

/// Set signal bits of `version`, in ascending order.
///
/// Only bits `0..=27` are considered. The order is the order in which a
/// block's signals are counted, so it must stay ascending.
pub fn active_bits(version: u32) -> Vec<u8> {
    (0..=MAX_SIGNAL_BIT)
        .filter(|&bit| version & (1u32 << bit) != 0)
        .collect()
}
