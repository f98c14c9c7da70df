/// Mix `value` into `seed` (the well-known boost `hash_combine` formula).
///
/// Order matters: combining the same values in a different order yields a
/// different result, which makes it suitable for structural graph hashes.
pub fn hash_combine(seed: &mut u64, value: u64) {
    *seed ^= value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}
