//! Input device discovery and raw event decoding (Linux, evdev).

use crate::chord::Chord;
use crate::key::KeyCode;
use anyhow::{anyhow, bail, Context, Result};
use evdev::{Device, EventType};
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::{Path, PathBuf};

/// Highest `/dev/input/eventN` index probed at startup.
pub const MAX_INPUT_INDEX: u32 = 255;

const INPUT_PATH_PREFIX: &str = "/dev/input/event";

/// Size of one kernel `struct input_event` record.
pub const INPUT_EVENT_SIZE: usize = mem::size_of::<libc::input_event>();

/// Records fetched per read.
pub const EVENT_BUFFER_RECORDS: usize = 64;

/// Convert our key code to an evdev key.
fn to_evdev_key(key: KeyCode) -> evdev::Key {
    evdev::Key::new(key.0)
}

/// What the matcher needs to know about a device.
pub trait KeyCapabilities {
    /// Whether the device reports `EV_KEY` events at all.
    fn reports_keys(&self) -> bool;

    /// Whether the device can report `key`.
    fn supports_key(&self, key: KeyCode) -> bool;
}

impl KeyCapabilities for Device {
    fn reports_keys(&self) -> bool {
        self.supported_events().contains(EventType::KEY)
    }

    fn supports_key(&self, key: KeyCode) -> bool {
        self.supported_keys()
            .map(|keys| keys.contains(to_evdev_key(key)))
            .unwrap_or(false)
    }
}

/// Whether `device` can report every key of every group in `chord`.
///
/// A device that could only ever produce part of the chord is rejected, even
/// if it covers some groups completely.
pub fn supports_chord<D: KeyCapabilities + ?Sized>(device: &D, chord: &Chord) -> bool {
    device.reports_keys() && chord.all_keys().into_iter().all(|k| device.supports_key(k))
}

/// Keep the candidates that can report the whole chord, in order.
pub fn select_capable<D: KeyCapabilities>(
    candidates: impl IntoIterator<Item = D>,
    chord: &Chord,
) -> Vec<D> {
    candidates
        .into_iter()
        .filter(|device| supports_chord(device, chord))
        .collect()
}

/// Like [`select_capable`], but finding nothing is an error: the chord could
/// never be pressed.
pub fn require_capable<D: KeyCapabilities>(
    candidates: impl IntoIterator<Item = D>,
    chord: &Chord,
) -> Result<Vec<D>> {
    let devices = select_capable(candidates, chord);
    if devices.is_empty() {
        bail!("Failed to find any input device supporting panic keys!");
    }
    Ok(devices)
}

/// An opened `/dev/input/eventN` device.
pub struct InputDevice {
    path: PathBuf,
    device: Device,
}

impl InputDevice {
    /// Open a device node. evdev tries read-write before falling back to
    /// read-only; nothing is ever written to the descriptor.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let device = Device::open(&path)?;
        Ok(Self { path, device })
    }

    pub fn name(&self) -> &str {
        self.device.name().unwrap_or("unknown")
    }
}

/// A readable source of raw `input_event` records.
pub trait RecordSource {
    /// Path used in diagnostics.
    fn path(&self) -> &Path;

    /// One `read(2)` into `buf`.
    fn read_raw(&self, buf: &mut [u8]) -> nix::Result<usize>;
}

impl RecordSource for InputDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self, buf: &mut [u8]) -> nix::Result<usize> {
        nix::unistd::read(self.as_raw_fd(), buf)
    }
}

/// Read as many records as fit into `buf`.
///
/// Returns `Ok(None)` on a spurious wake (`EAGAIN`/`EINTR`). A zero-length
/// read means the device is gone and is reported as an error.
pub fn read_records<'a, S: RecordSource + ?Sized>(
    source: &S,
    buf: &'a mut [u8],
) -> Result<Option<&'a [u8]>> {
    match source.read_raw(buf) {
        Ok(0) => Err(anyhow!(
            "Input device {} returned no data",
            source.path().display()
        )),
        Ok(n) => Ok(Some(&buf[..n])),
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => Ok(None),
        Err(e) => Err(e).with_context(|| {
            format!("Error reading from input device {}", source.path().display())
        }),
    }
}

impl KeyCapabilities for InputDevice {
    fn reports_keys(&self) -> bool {
        self.device.reports_keys()
    }

    fn supports_key(&self, key: KeyCode) -> bool {
        self.device.supports_key(key)
    }
}

impl AsRawFd for InputDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.device.as_raw_fd()
    }
}

impl AsFd for InputDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor is owned by `self.device`, which outlives the borrow.
        unsafe { BorrowedFd::borrow_raw(self.device.as_raw_fd()) }
    }
}

/// Probe `/dev/input/event0..=255` for devices that can report `chord`.
pub fn find_panic_devices(chord: &Chord) -> Result<Vec<InputDevice>> {
    let candidates = (0..=MAX_INPUT_INDEX).filter_map(|idx| {
        let path = format!("{}{}", INPUT_PATH_PREFIX, idx);
        match InputDevice::open(&path) {
            Ok(device) => Some(device),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    log::debug!("Skipping {}: {}", path, e);
                }
                None
            }
        }
    });

    let devices = require_capable(candidates, chord)?;
    for device in &devices {
        log::debug!("Watching {:?} at {}", device.name(), device.path().display());
    }

    set_nonblocking(&devices)?;
    Ok(devices)
}

/// Set non-blocking mode on input devices.
fn set_nonblocking(devices: &[InputDevice]) -> Result<()> {
    for device in devices {
        let fd = device.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).context("Failed to get fd flags")?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags)).context("Failed to set non-blocking")?;
    }
    Ok(())
}

/// A key press or release decoded from an input record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: KeyCode,
    /// Autorepeat (value 2) counts as pressed.
    pub pressed: bool,
}

/// Decode the key events in a buffer of raw `input_event` records.
///
/// Fails if the buffer doesn't hold a whole number of records. Non-key
/// records (`EV_SYN`, `EV_MSC`, ...) are skipped.
pub fn decode_key_events(buf: &[u8]) -> Result<impl Iterator<Item = KeyEvent> + '_> {
    if buf.len() % INPUT_EVENT_SIZE != 0 {
        bail!(
            "Error reading from input device: {} bytes is not a multiple of the {} byte event size",
            buf.len(),
            INPUT_EVENT_SIZE
        );
    }

    Ok(buf.chunks_exact(INPUT_EVENT_SIZE).filter_map(|chunk| {
        // SAFETY: `chunk` is exactly one record long and `read_unaligned`
        // has no alignment requirement.
        let raw: libc::input_event = unsafe { std::ptr::read_unaligned(chunk.as_ptr().cast()) };
        (raw.type_ == EventType::KEY.0).then(|| KeyEvent {
            key: KeyCode(raw.code),
            pressed: raw.value != 0,
        })
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::parse_chord;

    #[derive(Debug)]
    struct FakeDevice {
        name: &'static str,
        reports_keys: bool,
        keys: Vec<KeyCode>,
    }

    impl KeyCapabilities for FakeDevice {
        fn reports_keys(&self) -> bool {
            self.reports_keys
        }

        fn supports_key(&self, key: KeyCode) -> bool {
            self.keys.contains(&key)
        }
    }

    fn keyboard(name: &'static str, keys: &[&str]) -> FakeDevice {
        FakeDevice {
            name,
            reports_keys: true,
            keys: keys.iter().map(|k| KeyCode::parse(k).unwrap()).collect(),
        }
    }

    fn record(type_: u16, code: u16, value: i32) -> Vec<u8> {
        let ev = libc::input_event {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            type_,
            code,
            value,
        };
        // SAFETY: input_event is plain old data.
        let bytes = unsafe {
            std::slice::from_raw_parts(&ev as *const libc::input_event as *const u8, INPUT_EVENT_SIZE)
        };
        bytes.to_vec()
    }

    #[test]
    fn test_device_must_support_every_group() {
        let chord = parse_chord("KEY_LEFTCTRL,KEY_POWER").unwrap();
        let full = keyboard("full", &["KEY_LEFTCTRL", "KEY_POWER", "KEY_A"]);
        let partial = keyboard("partial", &["KEY_LEFTCTRL", "KEY_A"]);
        assert!(supports_chord(&full, &chord));
        assert!(!supports_chord(&partial, &chord));
    }

    #[test]
    fn test_device_must_support_every_alternative() {
        let chord = parse_chord("KEY_LEFTCTRL|KEY_RIGHTCTRL").unwrap();
        let left_only = keyboard("left", &["KEY_LEFTCTRL"]);
        assert!(!supports_chord(&left_only, &chord));
    }

    #[test]
    fn test_device_without_key_events_rejected() {
        let chord = parse_chord("KEY_POWER").unwrap();
        let mut device = keyboard("mouse", &["KEY_POWER"]);
        device.reports_keys = false;
        assert!(!supports_chord(&device, &chord));
    }

    #[test]
    fn test_select_keeps_order() {
        let chord = parse_chord("KEY_POWER").unwrap();
        let selected = select_capable(
            vec![
                keyboard("a", &["KEY_POWER"]),
                keyboard("b", &["KEY_A"]),
                keyboard("c", &["KEY_POWER", "KEY_A"]),
            ],
            &chord,
        );
        let names: Vec<_> = selected.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_select_none() {
        let chord = parse_chord("KEY_LEFTCTRL,KEY_POWER").unwrap();
        let selected = select_capable(
            vec![keyboard("a", &["KEY_LEFTCTRL"]), keyboard("b", &["KEY_POWER"])],
            &chord,
        );
        assert!(selected.is_empty());
    }

    #[test]
    fn test_require_capable_fails_without_devices() {
        let chord = parse_chord("KEY_LEFTCTRL,KEY_POWER").unwrap();
        let err = require_capable(
            vec![keyboard("a", &["KEY_LEFTCTRL"]), keyboard("b", &["KEY_POWER"])],
            &chord,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to find any input device"));

        assert!(require_capable(Vec::<FakeDevice>::new(), &chord).is_err());
    }

    #[test]
    fn test_require_capable_returns_matches() {
        let chord = parse_chord("KEY_POWER").unwrap();
        let devices = require_capable(vec![keyboard("a", &["KEY_POWER"])], &chord).unwrap();
        assert_eq!(devices.len(), 1);
    }

    struct FakeReader {
        path: PathBuf,
        result: nix::Result<usize>,
    }

    impl FakeReader {
        fn new(result: nix::Result<usize>) -> Self {
            Self {
                path: PathBuf::from("/dev/input/event3"),
                result,
            }
        }
    }

    impl RecordSource for FakeReader {
        fn path(&self) -> &Path {
            &self.path
        }

        fn read_raw(&self, buf: &mut [u8]) -> nix::Result<usize> {
            let n = self.result?;
            buf[..n].fill(0);
            Ok(n)
        }
    }

    #[test]
    fn test_read_records_returns_filled_prefix() {
        let mut buf = [1u8; 64];
        let records = read_records(&FakeReader::new(Ok(24)), &mut buf).unwrap();
        assert_eq!(records.map(|r| r.len()), Some(24));
    }

    #[test]
    fn test_zero_byte_read_is_an_error() {
        let mut buf = [0u8; 64];
        let err = read_records(&FakeReader::new(Ok(0)), &mut buf).unwrap_err();
        assert!(err.to_string().contains("/dev/input/event3"));
    }

    #[test]
    fn test_spurious_wake_is_ignored() {
        let mut buf = [0u8; 64];
        assert!(read_records(&FakeReader::new(Err(Errno::EAGAIN)), &mut buf)
            .unwrap()
            .is_none());
        assert!(read_records(&FakeReader::new(Err(Errno::EINTR)), &mut buf)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_hard_read_error_is_an_error() {
        let mut buf = [0u8; 64];
        let err = read_records(&FakeReader::new(Err(Errno::ENODEV)), &mut buf).unwrap_err();
        assert_eq!(err.downcast_ref::<Errno>(), Some(&Errno::ENODEV));
    }

    #[test]
    fn test_decode_key_events() {
        let mut buf = record(EventType::KEY.0, 116, 1);
        buf.extend(record(EventType::SYNCHRONIZATION.0, 0, 0));
        buf.extend(record(EventType::KEY.0, 116, 2));
        buf.extend(record(EventType::MISC.0, 4, 458854));
        buf.extend(record(EventType::KEY.0, 116, 0));

        let events: Vec<_> = decode_key_events(&buf).unwrap().collect();
        assert_eq!(
            events,
            vec![
                KeyEvent { key: KeyCode(116), pressed: true },
                KeyEvent { key: KeyCode(116), pressed: true },
                KeyEvent { key: KeyCode(116), pressed: false },
            ]
        );
    }

    #[test]
    fn test_decode_rejects_partial_record() {
        let mut buf = record(EventType::KEY.0, 116, 1);
        buf.pop();
        assert!(decode_key_events(&buf).is_err());

        let mut buf = record(EventType::KEY.0, 116, 1);
        buf.push(0);
        assert!(decode_key_events(&buf).is_err());
    }

    #[test]
    fn test_decode_empty_buffer() {
        assert_eq!(decode_key_events(&[]).unwrap().count(), 0);
    }
}
