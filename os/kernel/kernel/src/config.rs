//! Runtime knobs.

use kernel_info::process::HZ;

/// Kernel settings that are not part of the memory layout.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelConfig {
    /// Timer interrupt frequency the machine is programmed for.
    pub hz: u32,
    /// Run the memory-usage audit on a trap once this many ticks have passed
    /// since the last one. Zero disables the periodic audit; the idle audit
    /// in the scheduler still runs.
    pub audit_interval_ticks: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            hz: HZ,
            audit_interval_ticks: u64::from(HZ / 2),
        }
    }
}
