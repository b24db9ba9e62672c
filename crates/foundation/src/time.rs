/// Engine time in seconds.
///
/// Time is always passed in explicitly; nothing here reads a wall clock.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Default)]
pub struct Time(pub f64);

impl Time {
    pub const ZERO: Time = Time(0.0);

    pub fn from_millis(ms: u64) -> Self {
        Time(ms as f64 / 1000.0)
    }

    pub fn after_millis(self, ms: u64) -> Self {
        Time(self.0 + ms as f64 / 1000.0)
    }
}
