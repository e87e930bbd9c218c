//! Validated monitor configuration.

use crate::chord::{parse_chord, Chord};
use crate::target::{TargetDevice, TargetSet};
use anyhow::{bail, Result};

/// What to watch, built from the `--devices` and `--keys` option values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub targets: TargetSet,
    pub chord: Chord,
}

impl Config {
    /// Validate raw option values.
    ///
    /// `devices` is a comma-separated list of device paths, each of which must
    /// exist. `keys` is a comma-separated list of key groups with `|` between
    /// alternatives. At least one of the two must be given.
    pub fn from_args(devices: Option<&str>, keys: Option<&str>) -> Result<Self> {
        if devices.is_none() && keys.is_none() {
            bail!("Invalid number of arguments!");
        }

        let targets = match devices {
            Some(list) => parse_targets(list)?,
            None => TargetSet::default(),
        };
        let chord = match keys {
            Some(list) => parse_chord(list)?,
            None => Chord::default(),
        };

        Ok(Self { targets, chord })
    }
}

fn parse_targets(list: &str) -> Result<TargetSet> {
    let devices = list
        .split(',')
        .filter(|part| !part.is_empty())
        .map(TargetDevice::open)
        .collect::<Result<Vec<_>, _>>()?;

    if devices.is_empty() {
        bail!("Empty device list");
    }

    Ok(TargetSet::new(devices))
}
