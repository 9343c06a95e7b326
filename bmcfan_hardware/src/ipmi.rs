//! Dell iDRAC backend: `ipmitool` over LAN for sensors and fan control,
//! `racadm` over ssh for the PCIe cooling override.
//!
//! Passwords travel through the environment (`IPMI_PASSWORD` for
//! `ipmitool -E`, `SSHPASS` for `sshpass -e`) and never appear in argv.

use std::time::Duration;

use bmcfan_traits::{Actuator, BoxError, Sampler};

use crate::command::{CommandRunner, CommandSpec, SystemRunner};
use crate::error::{HwError, Result};
use crate::parse;

/// Connection and sensor settings for one BMC.
#[derive(Debug, Clone)]
pub struct IpmiConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub interface: String,
    pub ipmitool: String,
    pub sshpass: String,
    pub fan_sensor: String,
    pub temperature_prefix: String,
    /// Timeout for actuation commands; sampling uses the caller's timeout.
    pub command_timeout: Duration,
}

pub struct IpmiTool<R = SystemRunner> {
    cfg: IpmiConfig,
    runner: R,
}

impl IpmiTool<SystemRunner> {
    pub fn new(cfg: IpmiConfig) -> Self {
        Self::with_runner(cfg, SystemRunner)
    }
}

impl<R: CommandRunner> IpmiTool<R> {
    pub fn with_runner(cfg: IpmiConfig, runner: R) -> Self {
        Self { cfg, runner }
    }

    fn ipmi<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.cfg.ipmitool)
            .args(["-I", self.cfg.interface.as_str(), "-H", self.cfg.host.as_str()])
            .args(["-U", self.cfg.username.as_str(), "-E"])
            .env("IPMI_PASSWORD", &self.cfg.password)
            .args(args)
    }

    fn racadm<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(&self.cfg.sshpass)
            .args(["-e", "ssh", "-o", "StrictHostKeyChecking=no"])
            .arg(format!("{}@{}", self.cfg.username, self.cfg.host))
            .arg("racadm")
            .env("SSHPASS", &self.cfg.password)
            .args(args)
    }

    fn exec(&mut self, cmd: &CommandSpec, timeout: Duration) -> Result<String> {
        let out = self.runner.run(cmd, timeout);
        if let Err(e) = &out {
            tracing::debug!(command = %cmd.display(), error = %e, "bmc command failed");
        }
        out
    }

    fn raw_fan(&mut self, bytes: &[&str]) -> Result<()> {
        let cmd = self.ipmi(["raw", "0x30", "0x30"]).args(bytes.iter().copied());
        let timeout = self.cfg.command_timeout;
        self.exec(&cmd, timeout).map(drop)
    }

    pub fn temperature(&mut self, timeout: Duration) -> Result<f32> {
        let cmd = self.ipmi(["sdr", "type", "temperature"]);
        let out = self.exec(&cmd, timeout)?;
        parse::max_temperature(&out, &self.cfg.temperature_prefix)
    }

    pub fn fan_rpm(&mut self, timeout: Duration) -> Result<u32> {
        let sensor = self.cfg.fan_sensor.clone();
        let cmd = self.ipmi(["sdr", "get", sensor.as_str()]);
        let out = self.exec(&cmd, timeout)?;
        parse::fan_rpm(&out)
    }

    pub fn set_speed(&mut self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(HwError::InvalidArgument(format!(
                "fan speed {percent}% is above 100%"
            )));
        }
        let hex = format!("{percent:#04x}");
        self.raw_fan(&["0x02", "0xff", hex.as_str()])
    }

    /// Set `lfmmode disabled` on every PCIe slot the BMC reports. All slots
    /// are attempted; the first failure is returned.
    pub fn disable_pcie_cooling_response(&mut self) -> Result<usize> {
        let timeout = self.cfg.command_timeout;
        let cmd = self.racadm(["get", "system.pcieslotlfm"]);
        let slots = parse::pcie_slot_count(&self.exec(&cmd, timeout)?);
        let mut first_err = None;
        for slot in 1..=slots {
            let key = format!("system.pcieslotlfm.{slot}.lfmmode");
            let cmd = self.racadm(["set", key.as_str(), "disabled"]);
            match self.exec(&cmd, timeout) {
                Ok(_) => tracing::info!(slot, "pcie cooling response disabled"),
                Err(e) => {
                    tracing::warn!(slot, error = %e, "could not disable pcie cooling response");
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        first_err.map_or(Ok(slots), Err)
    }
}

impl<R: CommandRunner> Sampler for IpmiTool<R> {
    fn read_temperature(&mut self, timeout: Duration) -> std::result::Result<f32, BoxError> {
        Ok(self.temperature(timeout)?)
    }

    fn read_fan_rpm(&mut self, timeout: Duration) -> std::result::Result<u32, BoxError> {
        Ok(self.fan_rpm(timeout)?)
    }
}

impl<R: CommandRunner> Actuator for IpmiTool<R> {
    fn set_fan_speed(&mut self, percent: u8) -> std::result::Result<(), BoxError> {
        Ok(self.set_speed(percent)?)
    }

    fn enable_manual_control(&mut self) -> std::result::Result<(), BoxError> {
        Ok(self.raw_fan(&["0x01", "0x00"])?)
    }

    fn revert_to_default_control(&mut self) -> std::result::Result<(), BoxError> {
        Ok(self.raw_fan(&["0x01", "0x01"])?)
    }

    fn disable_vendor_cooling_override(&mut self) -> std::result::Result<(), BoxError> {
        self.disable_pcie_cooling_response()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Records every command and replies from a queue.
    #[derive(Default)]
    struct Scripted {
        seen: Vec<CommandSpec>,
        replies: VecDeque<Result<String>>,
    }

    impl CommandRunner for Scripted {
        fn run(&mut self, cmd: &CommandSpec, _timeout: Duration) -> Result<String> {
            self.seen.push(cmd.clone());
            self.replies.pop_front().unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn tool(replies: Vec<Result<String>>) -> IpmiTool<Scripted> {
        IpmiTool::with_runner(
            IpmiConfig {
                host: "10.0.0.5".into(),
                username: "root".into(),
                password: "calvin".into(),
                interface: "lanplus".into(),
                ipmitool: "ipmitool".into(),
                sshpass: "sshpass".into(),
                fan_sensor: "Fan1".into(),
                temperature_prefix: "Temp".into(),
                command_timeout: Duration::from_secs(1),
            },
            Scripted {
                seen: Vec::new(),
                replies: replies.into(),
            },
        )
    }

    #[test]
    fn set_speed_sends_hex_percent_without_password_in_argv() {
        let mut t = tool(vec![]);
        t.set_fan_speed(30).unwrap();
        let cmd = &t.runner.seen[0];
        assert_eq!(
            cmd.display(),
            "ipmitool -I lanplus -H 10.0.0.5 -U root -E raw 0x30 0x30 0x02 0xff 0x1e"
        );
        assert_eq!(cmd.env, vec![("IPMI_PASSWORD".to_owned(), "calvin".to_owned())]);
    }

    #[test]
    fn control_mode_commands() {
        let mut t = tool(vec![]);
        t.enable_manual_control().unwrap();
        t.revert_to_default_control().unwrap();
        assert!(t.runner.seen[0].display().ends_with("raw 0x30 0x30 0x01 0x00"));
        assert!(t.runner.seen[1].display().ends_with("raw 0x30 0x30 0x01 0x01"));
    }

    #[test]
    fn rejects_speed_above_100() {
        let mut t = tool(vec![]);
        assert!(t.set_speed(101).is_err());
        assert!(t.runner.seen.is_empty());
    }

    #[test]
    fn reads_sensors() {
        let mut t = tool(vec![
            Ok("Temp | 0Eh | ok | 3.1 | 48 degrees C\n".into()),
            Ok(" Sensor Reading : 3360 (+/- 120) RPM\n".into()),
        ]);
        assert_eq!(t.read_temperature(Duration::from_secs(1)).unwrap(), 48.0);
        assert_eq!(t.read_fan_rpm(Duration::from_secs(1)).unwrap(), 3360);
        assert!(t.runner.seen[1].display().ends_with("sdr get Fan1"));
    }

    #[test]
    fn disables_every_pcie_slot_via_racadm() {
        let mut t = tool(vec![
            Ok("System.pcieslotlfm.1\nSystem.pcieslotlfm.2\n".into()),
            Ok(String::new()),
            Err(HwError::InvalidArgument("slot busy".into())),
        ]);
        assert!(t.disable_pcie_cooling_response().is_err());
        let seen: Vec<String> = t.runner.seen.iter().map(CommandSpec::display).collect();
        assert_eq!(
            seen,
            vec![
                "sshpass -e ssh -o StrictHostKeyChecking=no root@10.0.0.5 racadm get system.pcieslotlfm",
                "sshpass -e ssh -o StrictHostKeyChecking=no root@10.0.0.5 racadm set system.pcieslotlfm.1.lfmmode disabled",
                "sshpass -e ssh -o StrictHostKeyChecking=no root@10.0.0.5 racadm set system.pcieslotlfm.2.lfmmode disabled",
            ]
        );
        assert_eq!(t.runner.seen[0].env[0].0, "SSHPASS");
    }

    #[test]
    fn timeout_survives_the_trait_boundary() {
        let mut t = tool(vec![Err(HwError::Timeout {
            program: "ipmitool".into(),
            timeout_ms: 1000,
        })]);
        let err = t.read_temperature(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HwError>(),
            Some(HwError::Timeout { .. })
        ));
    }
}
