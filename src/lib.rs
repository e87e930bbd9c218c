//! Emergency shutdown monitor for portable Linux installations.
//!
//! This crate powers the machine off immediately when either
//!
//! - a watched block device disappears (the USB stick holding the root
//!   filesystem is pulled, or an optical disc is ejected), or
//! - a configured panic chord is held down on a keyboard.
//!
//! Once the root device is gone very little of the running system still works,
//! so everything the monitor needs is set up before the loop starts: input
//! devices are opened once, the kernel uevent socket is bound once, and the
//! loop itself only reads descriptors and calls `reboot(2)`.
//!
//! # Example
//!
//! ```no_run
//! use emerg_shutdown::{parse_chord, MonitorBuilder, TargetDevice};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut builder = MonitorBuilder::new().add_target(TargetDevice::open("/dev/sda3")?);
//!     for group in parse_chord("KEY_LEFTCTRL,KEY_LEFTALT,KEY_POWER")?.groups() {
//!         builder = builder.add_group(group.clone());
//!     }
//!
//!     // Never returns unless an input device or the poll itself fails.
//!     let never = builder.build()?.run()?;
//!     match never {}
//! }
//! ```
//!
//! # Linux Requirements
//!
//! The monitor must run as root: it reads `/dev/input/event*`, binds a
//! `NETLINK_KOBJECT_UEVENT` socket and calls `reboot(2)`.

mod chord;
mod config;
mod event;
mod key;
mod target;
mod uevent;

pub mod logging;

#[cfg(target_os = "linux")]
mod input;
#[cfg(target_os = "linux")]
mod monitor;
#[cfg(target_os = "linux")]
mod netlink;
#[cfg(target_os = "linux")]
mod shutdown;

pub use chord::{parse_chord, Chord, ChordTracker, KeyGroup};
pub use config::Config;
pub use event::Trigger;
pub use key::{KeyCode, UnknownKey};
pub use target::{DevicePathError, TargetDevice, TargetSet};
pub use uevent::UeventDecoder;

#[cfg(target_os = "linux")]
pub use input::{find_panic_devices, InputDevice, KeyCapabilities};
#[cfg(target_os = "linux")]
pub use monitor::{Monitor, MonitorBuilder};
#[cfg(target_os = "linux")]
pub use shutdown::power_off;
