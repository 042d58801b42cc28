use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use voxline_foundation::AudioError;

/// Thin wrapper over the default cpal host for opening the two devices the
/// pipeline owns: one input (capture) and one output (playback).
pub struct DeviceManager {
    host: Host,
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    pub fn host_id(&self) -> cpal::HostId {
        self.host.id()
    }

    /// Open an input device by name, or the host default when `name` is
    /// `None`. A missing device is fatal: the caller must not run with a
    /// silent microphone.
    pub fn open_input(&self, name: Option<&str>) -> Result<Device, AudioError> {
        match name {
            Some(wanted) => {
                for device in self.host.input_devices()? {
                    if device.name().map(|n| n == wanted).unwrap_or(false) {
                        return Ok(device);
                    }
                }
                Err(AudioError::DeviceNotFound {
                    name: Some(wanted.to_string()),
                })
            }
            None => self
                .host
                .default_input_device()
                .ok_or(AudioError::DeviceNotFound { name: None }),
        }
    }

    pub fn open_output(&self) -> Result<Device, AudioError> {
        self.host
            .default_output_device()
            .ok_or(AudioError::NoOutputDevice)
    }
}
