use crate::config::AppConfig;
use crate::core::hardware::HardwareAdapter;

mod linux;
mod simulated;

pub use linux::{LinuxAdapter, PROC_MOUNTS};
pub use simulated::SimulatedAdapter;

pub fn get_adapter(config: &AppConfig) -> Box<dyn HardwareAdapter> {
    if !config.simulated_mounts.is_empty() {
        return Box::new(SimulatedAdapter::new(
            config.simulated_mounts.clone(),
            config.filesystem.clone(),
        ));
    }

    Box::new(LinuxAdapter::new(config.mount_table.clone()))
}
