//! Human-readable error descriptions and structured JSON error formatting.

use std::fmt;

use bmcfan_core::error::ControlError;

use crate::cli::LAST_LIMITS;

/// Context attached when the controller could not take fan control at all.
#[derive(Debug, Clone, Copy)]
pub struct StartupFailed;

impl fmt::Display for StartupFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("could not take manual fan control")
    }
}

pub fn control_error_name(e: &ControlError) -> &'static str {
    match e {
        ControlError::SamplingUnavailable(_) => "SamplingUnavailable",
        ControlError::ActuationFailed(_) => "ActuationFailed",
        ControlError::PersistenceFailed(_) => "PersistenceFailed",
        ControlError::ConfigInvalid(_) => "ConfigInvalid",
        ControlError::Timeout => "Timeout",
        ControlError::NotificationFailed(_) => "NotificationFailed",
        ControlError::FailSafe(_) => "FailSafe",
    }
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if err.downcast_ref::<StartupFailed>().is_some() {
        let detail = err.root_cause();
        return format!(
            "What happened: Could not switch the BMC to manual fan control ({detail}).\n\
             Likely causes: Wrong bmc.host or credentials, IPMI over LAN disabled in iDRAC, \
             or ipmitool not installed.\n\
             How to fix: Run `bmcfan self-check` to test connectivity, enable IPMI over LAN, \
             and check that {} or bmc.password holds the right password.",
            bmcfan_config::BMC_PASSWORD_ENV
        );
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::ConfigInvalid(msg) => format!(
                "What happened: Invalid configuration ({msg}).\n\
                 Likely causes: Missing [bmc] section, or out-of-range values in the TOML.\n\
                 How to fix: Edit the config file, then rerun."
            ),
            ControlError::FailSafe(msg) => format!(
                "What happened: Fail-safe engaged ({msg}).\n\
                 Likely causes: The BMC stopped answering sensor queries, the network to \
                 the iDRAC is down, or ipmitool hangs.\n\
                 How to fix: Fans were handed back to the BMC. Check the iDRAC, then restart \
                 the service.{}",
                LAST_LIMITS
                    .get()
                    .map(|l| format!(
                        " Raise control.max_consecutive_failures (now {}) to tolerate longer outages.",
                        l.max_consecutive_failures
                    ))
                    .unwrap_or_default()
            ),
            ControlError::Timeout => {
                let limit = LAST_LIMITS
                    .get()
                    .map(|l| format!(" (limit {} ms)", l.command_timeout_ms))
                    .unwrap_or_default();
                format!(
                    "What happened: A BMC command timed out{limit}.\n\
                     Likely causes: iDRAC busy or unreachable, or the timeout is too low.\n\
                     How to fix: Check network access to the iDRAC and consider raising \
                     bmc.command_timeout_ms."
                )
            }
            ControlError::SamplingUnavailable(msg) => format!(
                "What happened: Could not read sensors ({msg}).\n\
                 Likely causes: Wrong bmc.temperature_prefix or bmc.fan_sensor, or the BMC \
                 rejected the query.\n\
                 How to fix: Compare `ipmitool sdr type temperature` output with the config."
            ),
            ControlError::ActuationFailed(msg) => format!(
                "What happened: A fan command was rejected ({msg}).\n\
                 Likely causes: The BMC firmware does not accept raw fan commands, or the \
                 user lacks administrator privileges.\n\
                 How to fix: Use an iDRAC account with administrator rights."
            ),
            ControlError::PersistenceFailed(msg) => format!(
                "What happened: The fan curve could not be saved ({msg}).\n\
                 Likely causes: The directory of curve.path is missing or read-only.\n\
                 How to fix: Create the directory or point curve.path somewhere writable."
            ),
            ControlError::NotificationFailed(msg) => format!(
                "What happened: Notification was not delivered ({msg}).\n\
                 Likely causes: Wrong notify.host or notify.topic, missing token, or no \
                 internet access.\n\
                 How to fix: Check the [notify] section and the token in {}.",
                bmcfan_config::NTFY_TOKEN_ENV
            ),
        };
    }

    // String-based heuristics for errors that never went through ControlError
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read fan curve") || lower.contains("parse fan curve") {
        return format!(
            "What happened: {msg}.\n\
             Likely causes: No scan has been run yet, or the file was edited by hand.\n\
             How to fix: Run `bmcfan run --scan`, or fix the file to have a \
             `speed_percent,rpm` header."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 config invalid, 3 fail-safe, 4 startup actuation failure, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<StartupFailed>().is_some() {
        return 4;
    }
    match err.downcast_ref::<ControlError>() {
        Some(ControlError::ConfigInvalid(_)) => 2,
        Some(ControlError::FailSafe(_)) => 3,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    let code = exit_code_for_error(err);
    if err.downcast_ref::<StartupFailed>().is_some() {
        return json!({ "reason": "StartupFailed", "exit_code": code, "message": msg })
            .to_string();
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        let details = match ce {
            ControlError::FailSafe(_) => LAST_LIMITS
                .get()
                .map(|l| json!({ "max_consecutive_failures": l.max_consecutive_failures })),
            ControlError::Timeout => LAST_LIMITS
                .get()
                .map(|l| json!({ "command_timeout_ms": l.command_timeout_ms })),
            _ => None,
        };
        let mut obj = json!({
            "reason": control_error_name(ce),
            "exit_code": code,
            "message": msg,
        });
        if let Some(d) = details {
            obj["details"] = d;
        }
        return obj.to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "exit_code": code, "message": msg }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    fn startup_error() -> eyre::Report {
        Err::<(), _>(eyre::Report::new(ControlError::ActuationFailed("rc 1".into())))
            .wrap_err("enable manual fan control")
            .wrap_err(StartupFailed)
            .unwrap_err()
    }

    #[test]
    fn exit_codes_are_stable() {
        let cfg = eyre::Report::new(ControlError::ConfigInvalid("bmc.host".into()));
        let fs = eyre::Report::new(ControlError::FailSafe("3 reads".into()));
        let other = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&cfg), 2);
        assert_eq!(exit_code_for_error(&fs), 3);
        assert_eq!(exit_code_for_error(&startup_error()), 4);
        assert_eq!(exit_code_for_error(&other), 1);
    }

    #[test]
    fn startup_failure_still_exposes_the_control_error() {
        let e = startup_error();
        assert!(matches!(
            e.downcast_ref::<ControlError>(),
            Some(ControlError::ActuationFailed(_))
        ));
        assert!(humanize(&e).contains("manual fan control"));
    }

    #[test]
    fn json_carries_reason_and_code() {
        let e = eyre::Report::new(ControlError::ConfigInvalid("bmc.host".into()));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&e)).unwrap();
        assert_eq!(v["reason"], "ConfigInvalid");
        assert_eq!(v["exit_code"], 2);
        assert!(v["message"].as_str().unwrap().contains("bmc.host"));
    }
}
