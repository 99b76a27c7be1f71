use super::{ConfigError, KernelConfig};
use std::path::Path;

/// Reads and checks the kernel configuration; graph and catalog validation happen when
/// they are built from it.
pub fn load_kernel_config(path: &Path) -> Result<KernelConfig, ConfigError> {
    let config = KernelConfig::from_path(path)?;
    config.routing.validate()?;
    Ok(config)
}
