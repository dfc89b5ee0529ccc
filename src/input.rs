// Operator input shaping

/// Stick values smaller than this are treated as centered
pub const DEADBAND: f64 = 0.05;

/// Zero small inputs, pass everything else through unchanged
pub fn deadband(value: f64) -> f64 {
    if value.abs() < DEADBAND { 0.0 } else { value }
}
