// Robot heading from the gyro collaborator, with a re-zeroable offset

use std::sync::{Arc, Mutex};

use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum GyroError {
    #[error("No heading received yet")]
    NoData,

    #[error("Gyro fault: {0}")]
    Fault(String),
}

/// Source of the accumulated yaw angle
pub trait Gyro: Send {
    /// Accumulated yaw in degrees, not wrapped
    fn angle(&mut self) -> Result<f64, GyroError>;
}

/// Heading as seen by the drive: raw gyro angle minus a zero offset
///
/// Counter-clockwise positive. Gyros that count clockwise are flipped with
/// `inverted`.
#[derive(Debug, Clone, Default)]
pub struct Heading {
    zero_offset: f64,
    inverted: bool,
    last_raw: f64,
}

impl Heading {
    pub fn new(inverted: bool) -> Self {
        Self {
            inverted,
            ..Default::default()
        }
    }

    /// Record a gyro reading and return the resulting heading
    pub fn update(&mut self, raw_deg: f64) -> f64 {
        self.last_raw = raw_deg;
        self.degrees()
    }

    /// Heading from the last recorded reading
    pub fn degrees(&self) -> f64 {
        let relative = self.last_raw - self.zero_offset;
        if self.inverted { -relative } else { relative }
    }

    /// Make the given raw reading the new zero
    pub fn zero(&mut self, raw_deg: f64) {
        self.zero_offset = raw_deg;
        self.last_raw = raw_deg;
    }

    pub fn zero_offset(&self) -> f64 {
        self.zero_offset
    }
}

/// Gyro fed by the latest value on a watch channel
///
/// The runtime pushes every heading sample it receives into the sender.
pub struct FeedGyro {
    rx: watch::Receiver<Option<f64>>,
}

impl FeedGyro {
    pub fn channel() -> (watch::Sender<Option<f64>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }
}

impl Gyro for FeedGyro {
    fn angle(&mut self) -> Result<f64, GyroError> {
        (*self.rx.borrow()).ok_or(GyroError::NoData)
    }
}

/// Gyro with a settable angle, for tests and simulation
#[derive(Debug, Clone, Default)]
pub struct SimGyro {
    angle: Arc<Mutex<Option<f64>>>,
}

impl SimGyro {
    pub fn new(angle: f64) -> Self {
        Self {
            angle: Arc::new(Mutex::new(Some(angle))),
        }
    }

    /// Set the angle, or `None` to simulate a dropped reading
    pub fn set(&self, angle: Option<f64>) {
        if let Ok(mut a) = self.angle.lock() {
            *a = angle;
        }
    }
}

impl Gyro for SimGyro {
    fn angle(&mut self) -> Result<f64, GyroError> {
        let angle = self
            .angle
            .lock()
            .map_err(|_| GyroError::Fault("lock poisoned".to_string()))?;
        angle.ok_or(GyroError::NoData)
    }
}
