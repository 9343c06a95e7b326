//! BMC backends: `ipmitool`/`racadm` for Dell iDRAC, a simulated BMC, and
//! notification transports.

pub mod command;
pub mod error;
pub mod ipmi;
pub mod ntfy;
pub mod parse;
pub mod sim;

pub use command::{CommandRunner, CommandSpec, SystemRunner};
pub use error::HwError;
pub use ipmi::{IpmiConfig, IpmiTool};
pub use ntfy::{LogNotifier, NtfyNotifier};
pub use sim::{SimParams, SimulatedBmc};
