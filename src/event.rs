//! Reasons the monitor decides to power off.

/// A detected shutdown condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Every group of the panic chord is held.
    PanicChord,
    /// A watched block device was removed (or an optical one changed).
    /// Holds the device's short name as it appeared in the uevent.
    DeviceRemoved(Vec<u8>),
    /// The uevent socket failed in a way that may mean the root device is gone.
    UeventChannelLost,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::PanicChord => write!(f, "panic chord pressed"),
            Trigger::DeviceRemoved(name) => {
                write!(f, "device '{}' removed", String::from_utf8_lossy(name))
            }
            Trigger::UeventChannelLost => write!(f, "uevent channel failed"),
        }
    }
}
