//! Deadband between the regulator and the actuator.

/// Decide which command to actually send.
///
/// Returns `previous` when the candidate is within `margin` of it, otherwise
/// the candidate. With no previous command the candidate always wins, and a
/// zero margin disables the filter.
#[inline]
pub fn apply(previous: Option<u8>, candidate: u8, margin: u8) -> u8 {
    match previous {
        Some(prev) if prev.abs_diff(candidate) < margin => prev,
        _ => candidate,
    }
}

/// Round a regulator output to a whole percent within `[min, max]`.
#[inline]
pub fn to_percent(output: f32, min: u8, max: u8) -> u8 {
    if !output.is_finite() {
        return min;
    }
    output.round().clamp(f32::from(min), f32::from(max)) as u8
}
