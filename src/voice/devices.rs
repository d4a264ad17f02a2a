use cpal::traits::{DeviceTrait, HostTrait};
use std::fmt;
use std::iter::Enumerate;
use tracing::{debug, warn};

use crate::error::DeviceEnumerationError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeviceDescriptor {
    /// Position in the host's full device list (inputs included).
    pub index: usize,
    pub name: String,
    pub sample_rate: u32,
}

impl fmt::Display for OutputDeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device {}: {} ({}Hz)", self.index, self.name, self.sample_rate)
    }
}

/// Output devices of the default host.
///
/// Nothing is queried until iteration starts, and every new iteration queries
/// again, so hot-plugged devices show up without restarting.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputDevices;

pub fn list_output_devices() -> OutputDevices {
    OutputDevices
}

impl OutputDevices {
    pub fn iter(&self) -> OutputDeviceIter {
        OutputDeviceIter { devices: None }
    }
}

impl IntoIterator for OutputDevices {
    type Item = OutputDeviceDescriptor;
    type IntoIter = OutputDeviceIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &OutputDevices {
    type Item = OutputDeviceDescriptor;
    type IntoIter = OutputDeviceIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct OutputDeviceIter {
    // None until the first call to next().
    devices: Option<Option<Enumerate<cpal::Devices>>>,
}

impl Iterator for OutputDeviceIter {
    type Item = OutputDeviceDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let devices = self.devices.get_or_insert_with(|| match query_devices() {
            Ok(devices) => Some(devices.enumerate()),
            Err(e) => {
                warn!("{}", e);
                None
            }
        });
        let devices = devices.as_mut()?;

        for (index, device) in devices.by_ref() {
            if let Some(descriptor) = describe_output(index, &device) {
                return Some(descriptor);
            }
        }
        None
    }
}

fn query_devices() -> Result<cpal::Devices, DeviceEnumerationError> {
    Ok(cpal::default_host().devices()?)
}

fn describe_output(index: usize, device: &cpal::Device) -> Option<OutputDeviceDescriptor> {
    let config = device.default_output_config().ok()?;
    if config.channels() == 0 {
        return None;
    }
    let name = device
        .name()
        .unwrap_or_else(|_| format!("Unknown device {}", index));
    Some(OutputDeviceDescriptor {
        index,
        name,
        sample_rate: config.sample_rate().0,
    })
}

/// Looks up the output device for a selection made from
/// [`list_output_devices`]. A device that disappeared since it was listed
/// resolves to the system default instead of failing.
pub fn resolve_output_device(index: Option<usize>) -> Option<cpal::Device> {
    let host = cpal::default_host();
    if let Some(index) = index {
        let found = host
            .devices()
            .ok()
            .and_then(|mut devices| devices.nth(index))
            .filter(|device| describe_output(index, device).is_some());
        match found {
            Some(device) => {
                debug!(index, "Resolved output device");
                return Some(device);
            }
            None => warn!(index, "Selected output device is gone, using default"),
        }
    }
    host.default_output_device()
}
