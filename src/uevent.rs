//! Kernel uevent decoding.
//!
//! `NETLINK_KOBJECT_UEVENT` messages don't follow the usual netlink framing.
//! A kernel uevent is a plain list of NUL-terminated strings:
//!
//! ```text
//! remove@/devices/.../block/sda/sda3\0ACTION=remove\0DEVPATH=...\0DEVNAME=sda3\0...
//! ```
//!
//! systemd-udevd rebroadcasts its own events on the same transport in a binary
//! format that starts with `libudev\0`; those are dropped without looking at
//! the rest of the message.

use crate::event::Trigger;
use crate::target::{TargetSet, OPTICAL_PREFIX};
use std::collections::TryReserveError;
use std::thread;
use std::time::Duration;

/// Datagrams shorter than this can't carry anything we act on.
pub const MIN_DATAGRAM_LEN: usize = 8;

/// Leading tag of udevd-originated messages.
pub const UDEV_TAG: &[u8; 8] = b"libudev\0";

const DEVNAME_PREFIX: &[u8] = b"DEVNAME=";

const ALLOC_RETRY_LIMIT: u32 = 30;
const ALLOC_RETRY_DELAY: Duration = Duration::from_secs(1);

/// State collected while walking one datagram.
#[derive(Debug, Default)]
struct UeventRecord {
    removed: bool,
    changed: bool,
}

/// Decides whether a uevent datagram reports the loss of a watched device.
#[derive(Debug, Clone)]
pub struct UeventDecoder {
    targets: TargetSet,
}

impl UeventDecoder {
    pub fn new(targets: TargetSet) -> Self {
        Self { targets }
    }

    /// Decode one datagram, returning a trigger if a watched device went away.
    ///
    /// The action line always precedes `DEVNAME=` within a kernel uevent, so a
    /// name seen before any recognised action is ignored.
    pub fn decode(&self, datagram: &[u8]) -> Option<Trigger> {
        if datagram.len() < MIN_DATAGRAM_LEN || datagram.starts_with(UDEV_TAG) {
            return None;
        }

        let mut record = UeventRecord::default();
        for field in datagram.split(|b| *b == 0) {
            match field {
                b"ACTION=remove" => record.removed = true,
                b"ACTION=change" => record.changed = true,
                _ => {
                    if let Some(value) = field.strip_prefix(DEVNAME_PREFIX) {
                        if let Some(trigger) = self.check_devname(&record, value) {
                            return Some(trigger);
                        }
                    }
                }
            }
        }

        None
    }

    fn check_devname(&self, record: &UeventRecord, value: &[u8]) -> Option<Trigger> {
        if !record.removed && !record.changed {
            return None;
        }

        let name = devname_value(value)?;

        // Opening or closing a disc tray shows up as "change", not "remove".
        if record.changed && !name.starts_with(OPTICAL_PREFIX.as_bytes()) {
            return None;
        }

        let name = copy_with_retry(name)?;
        if self.targets.contains(&name) {
            Some(Trigger::DeviceRemoved(name))
        } else {
            None
        }
    }
}

/// First non-empty `=`-separated token of a `DEVNAME=` value.
fn devname_value(value: &[u8]) -> Option<&[u8]> {
    value.split(|b| *b == b'=').find(|token| !token.is_empty())
}

/// Copy a device name, waiting out transient allocation failures.
///
/// Giving up only skips this line: running out of memory must neither
/// suppress the check forever nor force a shutdown on its own.
fn copy_with_retry(name: &[u8]) -> Option<Vec<u8>> {
    copy_with_retry_using(
        name,
        |buf, len| buf.try_reserve_exact(len),
        ALLOC_RETRY_DELAY,
    )
}

fn copy_with_retry_using<F>(name: &[u8], mut reserve: F, delay: Duration) -> Option<Vec<u8>>
where
    F: FnMut(&mut Vec<u8>, usize) -> Result<(), TryReserveError>,
{
    for attempt in 1..=ALLOC_RETRY_LIMIT {
        let mut owned = Vec::new();
        match reserve(&mut owned, name.len()) {
            Ok(()) => {
                owned.extend_from_slice(name);
                return Some(owned);
            }
            Err(e) => {
                log::warn!(
                    "Out of memory while parsing devname ({}), retrying in one second [{}/{}]",
                    e,
                    attempt,
                    ALLOC_RETRY_LIMIT
                );
                thread::sleep(delay);
            }
        }
    }

    log::error!("Out of memory while parsing devname, skipping uevent field");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetDevice;

    fn decoder(names: &[&str]) -> UeventDecoder {
        UeventDecoder::new(TargetSet::new(
            names.iter().map(|n| TargetDevice::from_name(*n)).collect(),
        ))
    }

    fn uevent(fields: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        for field in fields {
            buf.extend_from_slice(field.as_bytes());
            buf.push(0);
        }
        buf
    }

    fn removal(devname: &str) -> Vec<u8> {
        uevent(&[
            "remove@/devices/pci0000:00/usb1/1-1/block/sda/sda3",
            "ACTION=remove",
            "DEVPATH=/devices/pci0000:00/usb1/1-1/block/sda/sda3",
            "SUBSYSTEM=block",
            &format!("DEVNAME={}", devname),
            "DEVTYPE=partition",
            "SEQNUM=4242",
        ])
    }

    #[test]
    fn test_remove_of_target_triggers() {
        let d = decoder(&["sda3"]);
        assert_eq!(
            d.decode(&removal("sda3")),
            Some(Trigger::DeviceRemoved(b"sda3".to_vec()))
        );
    }

    #[test]
    fn test_remove_of_other_device_ignored() {
        let d = decoder(&["sda3"]);
        assert_eq!(d.decode(&removal("sdb1")), None);
        assert_eq!(d.decode(&removal("sda")), None);
    }

    #[test]
    fn test_any_target_matches() {
        let d = decoder(&["nvme0n1p2", "sda3"]);
        assert!(d.decode(&removal("sda3")).is_some());
        assert!(d.decode(&removal("nvme0n1p2")).is_some());
    }

    #[test]
    fn test_change_of_non_optical_ignored() {
        let d = decoder(&["sda3"]);
        let msg = uevent(&["change@/block/sda/sda3", "ACTION=change", "DEVNAME=sda3"]);
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_change_of_optical_triggers() {
        let d = decoder(&["sr0"]);
        let msg = uevent(&["change@/block/sr0", "ACTION=change", "DEVNAME=sr0", "DISK_EJECT_REQUEST=1"]);
        assert_eq!(d.decode(&msg), Some(Trigger::DeviceRemoved(b"sr0".to_vec())));
    }

    #[test]
    fn test_change_of_untargeted_optical_ignored() {
        let d = decoder(&["sr0"]);
        let msg = uevent(&["change@/block/sr1", "ACTION=change", "DEVNAME=sr1"]);
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_other_actions_ignored() {
        let d = decoder(&["sda3"]);
        let msg = uevent(&["add@/block/sda/sda3", "ACTION=add", "DEVNAME=sda3"]);
        assert_eq!(d.decode(&msg), None);
        let msg = uevent(&["bind@/block/sda/sda3", "ACTION=bind", "DEVNAME=sda3"]);
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_devname_before_action_ignored() {
        let d = decoder(&["sda3"]);
        let msg = uevent(&["remove@/block/sda/sda3", "DEVNAME=sda3", "ACTION=remove"]);
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_action_must_match_exactly() {
        let d = decoder(&["sda3"]);
        let msg = uevent(&["x@/block/sda/sda3", "ACTION=removed", "DEVNAME=sda3"]);
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_udev_message_discarded() {
        let d = decoder(&["sda3"]);
        let mut msg = UDEV_TAG.to_vec();
        msg.extend_from_slice(&uevent(&["ACTION=remove", "DEVNAME=sda3"]));
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_short_datagram_discarded() {
        let d = decoder(&["sda"]);
        assert_eq!(d.decode(b"DEVNAM\0"), None);
        assert_eq!(d.decode(b""), None);
    }

    #[test]
    fn test_empty_devname_ignored() {
        let d = decoder(&["sda3"]);
        let msg = uevent(&["remove@/block/sda/sda3", "ACTION=remove", "DEVNAME=", "DEVNAME=sdb"]);
        assert_eq!(d.decode(&msg), None);
    }

    #[test]
    fn test_devname_uses_first_token() {
        assert_eq!(devname_value(b"sda3"), Some(&b"sda3"[..]));
        assert_eq!(devname_value(b"=sda3=x"), Some(&b"sda3"[..]));
        assert_eq!(devname_value(b""), None);
        assert_eq!(devname_value(b"=="), None);
    }

    #[test]
    fn test_unterminated_last_field() {
        let d = decoder(&["sda3"]);
        let msg = b"remove@/block/sda/sda3\0ACTION=remove\0DEVNAME=sda3";
        assert!(d.decode(msg).is_some());
    }

    #[test]
    fn test_no_targets_never_triggers() {
        let d = decoder(&[]);
        assert_eq!(d.decode(&removal("sda3")), None);
    }

    #[test]
    fn test_copy_with_retry() {
        assert_eq!(copy_with_retry(b"sr0"), Some(b"sr0".to_vec()));
    }

    fn reserve_error() -> TryReserveError {
        Vec::<u8>::new().try_reserve(usize::MAX).unwrap_err()
    }

    #[test]
    fn test_copy_gives_up_when_memory_stays_exhausted() {
        let mut attempts = 0;
        let copied = copy_with_retry_using(
            b"sda3",
            |_, _| {
                attempts += 1;
                Err(reserve_error())
            },
            Duration::ZERO,
        );
        assert_eq!(copied, None);
        assert_eq!(attempts, ALLOC_RETRY_LIMIT);
    }

    #[test]
    fn test_copy_recovers_after_transient_failures() {
        let mut attempts = 0;
        let copied = copy_with_retry_using(
            b"sda3",
            |buf, len| {
                attempts += 1;
                if attempts < 3 {
                    Err(reserve_error())
                } else {
                    buf.try_reserve_exact(len)
                }
            },
            Duration::ZERO,
        );
        assert_eq!(copied, Some(b"sda3".to_vec()));
        assert_eq!(attempts, 3);
    }
}
