//! Input device enumeration and selection
//!
//! The capture device is picked by name prefix (e.g. "BlackHole" for the
//! loopback driver). No match is a normal, representable result rather
//! than an error - the caller decides whether to fall back to the
//! default device.

use cpal::traits::{DeviceTrait, HostTrait};
use tracing::{debug, warn};

/// An enumerated audio input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    /// Position in the host's input device enumeration
    pub index: usize,
    /// Device name as reported by the host
    pub name: String,
}

/// Resolve the capture device whose name starts with `name_prefix`
///
/// Enumerates input devices once, in host order, and returns the first
/// match (case-sensitive). Returns `None` when nothing matches or the
/// enumeration comes back empty.
pub(crate) fn resolve_device(name_prefix: &str) -> Option<CaptureDevice> {
    let host = cpal::default_host();
    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Could not enumerate input devices: {}", e);
            return None;
        }
    };

    let named = devices
        .enumerate()
        .filter_map(|(index, device)| device.name().ok().map(|name| (index, name)));

    match_by_prefix(named, name_prefix)
}

/// First device whose name starts with the prefix, in enumeration order
fn match_by_prefix(
    devices: impl IntoIterator<Item = (usize, String)>,
    name_prefix: &str,
) -> Option<CaptureDevice> {
    devices.into_iter().find_map(|(index, name)| {
        if name.starts_with(name_prefix) {
            debug!("Matched input device #{}: {}", index, name);
            Some(CaptureDevice { index, name })
        } else {
            None
        }
    })
}
