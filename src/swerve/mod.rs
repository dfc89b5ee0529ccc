// Swerve drive: kinematics, module control, coordination
pub mod angle;
pub mod azimuth;
pub mod calibration;
pub mod drive;
pub mod geometry;
pub mod heading;
pub mod kinematics;
pub mod module;
pub mod normalizer;

pub use calibration::{CalibrationError, CalibrationStore, JsonFileStore, MemoryStore};
pub use drive::{CommandSender, SwerveDrive};
pub use geometry::{MODULE_COUNT, ModuleGeometry, ModulePosition};
pub use heading::{FeedGyro, Gyro, GyroError, Heading, SimGyro};
pub use kinematics::{ChassisSpeeds, ChassisVelocity, ModuleState, SwerveKinematics};
pub use module::{AzimuthControl, DriveMode, ModuleHardware, ModuleInversion, SwerveModule};
