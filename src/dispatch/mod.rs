//! Host hardware profile used to bound the vector width of generated kernels.

pub mod device_profile;

pub use device_profile::{DeviceProfile, IsaLevel};

use std::sync::OnceLock;

static PROFILE: OnceLock<DeviceProfile> = OnceLock::new();

/// Get the global device profile (detected once, cached for process lifetime).
pub fn device_profile() -> &'static DeviceProfile {
    PROFILE.get_or_init(DeviceProfile::detect)
}
