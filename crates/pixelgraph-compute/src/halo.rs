//! Halo-radius rules shared by test operators and the dirty-ROI planner
//! (spec.md §4.7.5, §4.9). The default path for most operators is the
//! registry's `IdentityHaloPropagator` with a zero `halo_hint`; operators
//! whose footprint depends on a runtime parameter (a blur's `ksize`) use
//! these helpers from a custom `DirtyPropagator` instead.

/// Radius an odd-sized convolution kernel needs read on each side:
/// `(ksize - 1) / 2`, clipped to the input elsewhere by the caller.
pub fn gaussian_halo(ksize: u32) -> u32 {
    ksize.saturating_sub(1) / 2
}

/// General convolution halo: at least the kernel's own radius, at least
/// `(kernel_size - 1) / 2`, and never zero for a genuinely local operator.
pub fn convolution_halo(kernel_radius: u32, kernel_size: u32) -> u32 {
    kernel_radius.max(kernel_size.saturating_sub(1) / 2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 0)]
    #[case(3, 1)]
    #[case(5, 2)]
    #[case(9, 4)]
    #[case(21, 10)]
    fn gaussian_halo_is_kernel_radius(#[case] ksize: u32, #[case] expected_halo: u32) {
        assert_eq!(gaussian_halo(ksize), expected_halo);
    }

    #[rstest]
    #[case(0, 1, 1)]
    #[case(0, 5, 2)]
    #[case(3, 5, 3)]
    #[case(6, 5, 6)]
    fn convolution_halo_never_undercuts_kernel_size_or_drops_to_zero(#[case] kernel_radius: u32, #[case] kernel_size: u32, #[case] expected: u32) {
        assert_eq!(convolution_halo(kernel_radius, kernel_size), expected);
    }
}
