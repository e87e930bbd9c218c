use anyhow::Result;
use clap::Parser;

/// Power the machine off immediately when a device is removed or a panic
/// chord is pressed.
#[derive(Parser, Debug)]
#[command(
    name = "emerg-shutdown",
    version,
    after_help = "Example:\n  emerg-shutdown --devices=/dev/sda3 --keys=KEY_POWER"
)]
struct Cli {
    /// Block devices whose removal forces a shutdown, e.g. /dev/sda3.
    #[arg(long, value_name = "DEVICE1[,DEVICE2...]")]
    devices: Option<String>,

    /// Panic chord: comma-separated groups that must all be held; `|`
    /// separates alternative keys within a group.
    #[arg(long, value_name = "KEY_1[,KEY_2|KEY_3...]")]
    keys: Option<String>,
}

#[cfg(target_os = "linux")]
fn main() -> Result<()> {
    use anyhow::bail;
    use emerg_shutdown::{Config, MonitorBuilder};

    emerg_shutdown::logging::init();
    let cli = Cli::parse();

    if !nix::unistd::getuid().is_root() {
        bail!("This program must be run as root!");
    }

    let config = Config::from_args(cli.devices.as_deref(), cli.keys.as_deref())?;

    let mut builder = MonitorBuilder::new();
    for target in config.targets.iter() {
        builder = builder.add_target(target.clone());
    }
    for group in config.chord.groups() {
        builder = builder.add_group(group.clone());
    }

    let monitor = builder.build()?;
    log::debug!("Monitoring {} input device(s)", monitor.devices().len());

    let never = monitor.run()?;
    match never {}
}

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    let _ = Cli::parse();
    anyhow::bail!("Emergency shutdown is only supported on Linux")
}
