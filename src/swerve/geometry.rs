// Swerve module placement on the chassis

use serde::{Deserialize, Serialize};

/// Number of swerve modules on the platform
pub const MODULE_COUNT: usize = 4;

/// Where a module sits on the chassis
///
/// The order of `ModulePosition::ALL` is the order of every per-module array
/// in the crate (geometry, kinematics output, controllers, telemetry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulePosition {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
}

impl ModulePosition {
    pub const ALL: [ModulePosition; MODULE_COUNT] = [
        ModulePosition::FrontLeft,
        ModulePosition::FrontRight,
        ModulePosition::BackLeft,
        ModulePosition::BackRight,
    ];

    /// Stable name, also used as the calibration storage key
    pub fn key(&self) -> &'static str {
        match self {
            ModulePosition::FrontLeft => "front_left",
            ModulePosition::FrontRight => "front_right",
            ModulePosition::BackLeft => "back_left",
            ModulePosition::BackRight => "back_right",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ModulePosition::FrontLeft => 0,
            ModulePosition::FrontRight => 1,
            ModulePosition::BackLeft => 2,
            ModulePosition::BackRight => 3,
        }
    }
}

impl std::fmt::Display for ModulePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Fixed offset of one module from the robot center
///
/// `x` points forward and `y` points left, both in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleGeometry {
    pub position: ModulePosition,
    pub x: f64,
    pub y: f64,
}

impl ModuleGeometry {
    pub fn new(position: ModulePosition, x: f64, y: f64) -> Self {
        Self { position, x, y }
    }

    /// Distance from the robot center
    pub fn radius(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Standard rectangular layout
///
/// # Arguments
/// * `wheel_base` - Front-to-back distance between module axes (m)
/// * `track_width` - Left-to-right distance between module axes (m)
pub fn rectangular(wheel_base: f64, track_width: f64) -> [ModuleGeometry; MODULE_COUNT] {
    let hx = wheel_base / 2.0;
    let hy = track_width / 2.0;
    [
        ModuleGeometry::new(ModulePosition::FrontLeft, hx, hy),
        ModuleGeometry::new(ModulePosition::FrontRight, hx, -hy),
        ModuleGeometry::new(ModulePosition::BackLeft, -hx, hy),
        ModuleGeometry::new(ModulePosition::BackRight, -hx, -hy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_layout_order() {
        let modules = rectangular(0.5334, 0.4826);
        for (i, module) in modules.iter().enumerate() {
            assert_eq!(module.position, ModulePosition::ALL[i]);
            assert_eq!(module.position.index(), i);
        }
        assert!(modules[0].x > 0.0 && modules[0].y > 0.0);
        assert!(modules[1].x > 0.0 && modules[1].y < 0.0);
        assert!(modules[2].x < 0.0 && modules[2].y > 0.0);
        assert!(modules[3].x < 0.0 && modules[3].y < 0.0);
    }

    #[test]
    fn test_square_modules_share_radius() {
        let modules = rectangular(1.0, 1.0);
        let r = modules[0].radius();
        assert!(modules.iter().all(|m| (m.radius() - r).abs() < 1e-12));
    }

    #[test]
    fn test_position_keys_are_unique() {
        let keys: std::collections::HashSet<_> =
            ModulePosition::ALL.iter().map(|p| p.key()).collect();
        assert_eq!(keys.len(), MODULE_COUNT);
    }
}
