//! Parsers for `ipmitool` and `racadm` text output.

use crate::error::{HwError, Result};

/// Highest reading among `sdr type temperature` rows whose name starts with
/// `prefix`.
///
/// ```text
/// Temp             | 0Eh | ok  |  3.1 | 45 degrees C
/// ```
///
/// Rows without a numeric reading (`disabled`, `no reading`) are ignored.
pub fn max_temperature(output: &str, prefix: &str) -> Result<f32> {
    let mut seen = 0usize;
    let mut best: Option<f32> = None;
    for line in output.lines().filter(|l| l.trim_start().starts_with(prefix)) {
        seen += 1;
        let Some(value) = line
            .rsplit('|')
            .next()
            .and_then(|field| field.split_whitespace().next())
            .and_then(|tok| tok.parse::<f32>().ok())
            .filter(|v| v.is_finite())
        else {
            tracing::debug!(line, "temperature row without reading");
            continue;
        };
        best = Some(best.map_or(value, |b: f32| b.max(value)));
    }
    best.ok_or_else(|| HwError::Parse {
        what: "temperature",
        detail: if seen == 0 {
            format!("no sensor rows starting with {prefix:?}")
        } else {
            format!("{seen} {prefix:?} rows but none had a reading")
        },
    })
}

/// RPM from `sdr get <fan>` output.
///
/// ```text
///  Sensor Reading        : 3360 (+/- 120) RPM
/// ```
pub fn fan_rpm(output: &str) -> Result<u32> {
    let line = output
        .lines()
        .find(|l| l.contains("Sensor Reading"))
        .ok_or_else(|| HwError::Parse {
            what: "fan",
            detail: "no 'Sensor Reading' line".into(),
        })?;
    let value = line
        .split_once(':')
        .map(|(_, rest)| rest.split('(').next().unwrap_or(rest).trim())
        .and_then(|v| v.split_whitespace().next())
        .ok_or_else(|| HwError::Parse {
            what: "fan",
            detail: format!("unexpected sensor line {line:?}"),
        })?;
    if let Ok(rpm) = value.parse::<u32>() {
        return Ok(rpm);
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 && v <= f64::from(u32::MAX) => Ok(v.round() as u32),
        _ => Err(HwError::Parse {
            what: "fan",
            detail: format!("reading {value:?} is not a number"),
        }),
    }
}

/// Number of PCIe slot entries in `racadm get system.pcieslotlfm` output.
pub fn pcie_slot_count(output: &str) -> usize {
    output
        .lines()
        .filter(|l| l.to_ascii_lowercase().contains("system.pcieslotlfm."))
        .count()
}
