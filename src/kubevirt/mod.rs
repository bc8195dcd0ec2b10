//! KubeVirt integration module
//!
//! VM lifecycle, VMI monitoring, live migration and serial console access.

mod console;
mod migration;
mod vm;
mod vmi;

pub use console::{
    with_console, CommandOutput, Console, ConsoleError, ConsoleLauncher, ConsoleOptions, ConsoleSession, ConsoleSpawner,
    ConsoleTarget, ExpectOutcome, RexpectSpawner,
};
pub use migration::{new_migration, MigrationManager, VirtualMachineInstanceMigration};
pub use vm::{
    new_pod_anti_affinity, CloudInitNoCloud, LabelSelector, RunStrategy, VirtualMachine,
    VirtualMachineManager, VmConfig,
};
pub use vmi::{VirtualMachineInstance, VmiManager, CONDITION_AGENT_CONNECTED};

#[cfg(test)]
pub(crate) use console::fake;
