#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `bmcfan`: closed-loop fan control for Dell iDRAC servers.

mod cli;
mod error_fmt;

use std::path::Path;
use std::time::Duration;

use bmcfan_config::Config;
use bmcfan_core::hw_error::{Op, map_hw_error};
use bmcfan_core::{
    ControlError, ControlLoop, ControlSettings, FanCurve, FanCurveStore, RunSummary, StopReason,
};
use bmcfan_hardware::{IpmiConfig, IpmiTool, LogNotifier, NtfyNotifier, SimParams, SimulatedBmc};
use bmcfan_traits::{Actuator, Clock, MonotonicClock, Notifier, Priority, Sampler};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use eyre::{Result, WrapErr};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

use crate::cli::{Cli, CliLimits, Commands, CurveCommand, LAST_LIMITS};
use crate::error_fmt::{StartupFailed, exit_code_for_error, format_error_json, humanize};

type Backend = (Box<dyn Sampler>, Box<dyn Actuator>);

fn main() {
    let cli = Cli::parse();
    let _ = color_eyre::install();

    let code = run_cli(cli);
    std::process::exit(code);
}

/// Everything that needs the log file guard alive; it is dropped (and the
/// file flushed) before the process exits.
fn run_cli(cli: Cli) -> i32 {
    let loaded = if cli.cmd.needs_config() {
        Some(load_config(&cli.config))
    } else {
        None
    };
    let logging = match &loaded {
        Some(Ok(cfg)) => Some(&cfg.logging),
        _ => None,
    };
    let _guard = match init_tracing(cli.json, cli.log_level.as_deref(), logging) {
        Ok(g) => g,
        Err(e) => {
            // Logging is optional; keep going with whatever subscriber exists.
            eprintln!("warning: logging setup failed: {e}");
            None
        }
    };

    let result = match loaded {
        Some(Ok(cfg)) => dispatch(&cli, Some(&cfg)),
        Some(Err(e)) => Err(e),
        None => dispatch(&cli, None),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            if cli.json {
                println!("{}", format_error_json(&e));
            } else {
                eprintln!("{}", humanize(&e));
            }
            exit_code_for_error(&e)
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let cfg = bmcfan_config::load_file(path)
        .map_err(|e| eyre::Report::new(ControlError::ConfigInvalid(format!("{e:#}"))))?;
    let _ = LAST_LIMITS.set(CliLimits {
        max_consecutive_failures: cfg.control.max_consecutive_failures,
        command_timeout_ms: cfg.bmc.command_timeout_ms,
    });
    Ok(cfg)
}

/// Console layer (pretty or JSON) plus an optional JSON file layer.
///
/// Level precedence: `RUST_LOG`, then `--log-level`, then `logging.level`,
/// then `info`.
fn init_tracing(
    json: bool,
    cli_level: Option<&str>,
    logging: Option<&bmcfan_config::Logging>,
) -> Result<Option<WorkerGuard>> {
    let level = cli_level
        .or_else(|| logging.and_then(|l| l.level.as_deref()))
        .unwrap_or("info");
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid log level {level:?}"))?,
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let console = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if json {
        layers.push(console.json().boxed());
    } else {
        layers.push(console.with_target(false).boxed());
    }

    let mut guard = None;
    if let Some(file) = logging.and_then(|l| l.file.as_deref()) {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file {file:?} has no file name"))?;
        std::fs::create_dir_all(dir)
            .wrap_err_with(|| format!("create log directory {}", dir.display()))?;
        let appender = match logging.and_then(|l| l.rotation.as_deref()) {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| eyre::eyre!("{e}"))?;
    Ok(guard)
}

fn dispatch(cli: &Cli, cfg: Option<&Config>) -> Result<()> {
    match (&cli.cmd, cfg) {
        (Commands::Curve { action: CurveCommand::Show { path: Some(p) } }, _) => {
            show_curve(p, cli.json)
        }
        (_, None) => Err(eyre::Report::new(ControlError::ConfigInvalid(
            "no configuration loaded".into(),
        ))),
        (
            Commands::Run {
                sim,
                scan,
                once,
                ticks,
            },
            Some(cfg),
        ) => {
            let max_ticks = if *once { Some(1) } else { *ticks };
            run_controller(cfg, *sim, *scan, max_ticks, cli.json)
        }
        (Commands::Curve { action: CurveCommand::Show { path: None } }, Some(cfg)) => {
            show_curve(Path::new(&cfg.curve.path), cli.json)
        }
        (Commands::SelfCheck { sim }, Some(cfg)) => self_check(cfg, *sim, cli.json),
        (Commands::NotifyTest, Some(cfg)) => notify_test(cfg),
    }
}

fn bmc_password(cfg: &Config) -> Result<String> {
    if let Some(p) = cfg.bmc.password.as_ref().filter(|p| !p.is_empty()) {
        return Ok(p.clone());
    }
    match std::env::var(bmcfan_config::BMC_PASSWORD_ENV) {
        Ok(p) if !p.is_empty() => Ok(p),
        _ => Err(eyre::Report::new(ControlError::ConfigInvalid(format!(
            "bmc.password is not set and {} is empty",
            bmcfan_config::BMC_PASSWORD_ENV
        )))),
    }
}

fn backend(cfg: &Config, sim: bool) -> Result<Backend> {
    if sim {
        let bmc = SimulatedBmc::new(SimParams::from_env());
        tracing::info!("using simulated BMC");
        return Ok((Box::new(bmc.clone()), Box::new(bmc)));
    }
    let ipmi = IpmiConfig {
        host: cfg.bmc.host.clone(),
        username: cfg.bmc.username.clone(),
        password: bmc_password(cfg)?,
        interface: cfg.bmc.interface.clone(),
        ipmitool: cfg.bmc.ipmitool.clone(),
        sshpass: cfg.bmc.sshpass.clone(),
        fan_sensor: cfg.bmc.fan_sensor.clone(),
        temperature_prefix: cfg.bmc.temperature_prefix.clone(),
        command_timeout: Duration::from_millis(cfg.bmc.command_timeout_ms),
    };
    tracing::info!(host = %ipmi.host, interface = %ipmi.interface, "using ipmitool backend");
    Ok((
        Box::new(IpmiTool::new(ipmi.clone())),
        Box::new(IpmiTool::new(ipmi)),
    ))
}

fn notifier(cfg: &Config) -> Result<Box<dyn Notifier>> {
    let n = &cfg.notify;
    if !n.enabled {
        return Ok(Box::new(LogNotifier));
    }
    let token = n
        .token
        .clone()
        .or_else(|| std::env::var(bmcfan_config::NTFY_TOKEN_ENV).ok());
    let ntfy = NtfyNotifier::new(&n.host, &n.topic, token, Duration::from_millis(n.timeout_ms))
        .map_err(|e| eyre::Report::new(ControlError::NotificationFailed(e.to_string())))
        .wrap_err("build ntfy client")?;
    tracing::info!(url = ntfy.url(), "ntfy notifications enabled");
    Ok(Box::new(ntfy))
}

fn run_controller(
    cfg: &Config,
    sim: bool,
    scan: bool,
    max_ticks: Option<u64>,
    json: bool,
) -> Result<()> {
    let mut settings = ControlSettings::from(cfg);
    if scan {
        settings.scan.enabled = true;
    }
    let (sampler, actuator) = backend(cfg, sim)?;
    let mut notifier = notifier(cfg)?;
    if cfg.notify.test_on_start {
        bmcfan_core::notify::send_best_effort(
            &mut *notifier,
            "Fan controller starting",
            &format!(
                "Target {:.1}°C, ceiling {:.1}°C",
                cfg.control.desired_temp, cfg.safety.max_temp
            ),
            Priority::Low,
        );
    }
    let store = FanCurveStore::load_or_fallback(&cfg.curve.path, FanCurve::from(&cfg.curve));

    let mut ctl = ControlLoop::new(
        settings,
        sampler,
        actuator,
        notifier,
        MonotonicClock::new(),
        store,
    );
    let rx = take_control(&mut ctl, |tx| {
        ctrlc::set_handler(move || {
            let _ = tx.try_send(());
        })
        .map_err(eyre::Report::new)
    })?;

    let summary = bmcfan_core::run(&mut ctl, &rx, max_ticks)?;
    print_summary(&summary, ctl.safety_state(), json);
    Ok(())
}

/// Install the SIGINT/SIGTERM handler, then switch the fans to manual.
///
/// The handler must exist before manual mode does: a signal in between
/// would otherwise end the process with the BMC still in manual mode.
/// Signals that arrive during bootstrap wait in the returned channel.
fn take_control<S, A, N, C>(
    ctl: &mut ControlLoop<S, A, N, C>,
    install: impl FnOnce(Sender<()>) -> Result<()>,
) -> Result<Receiver<()>>
where
    S: Sampler,
    A: Actuator,
    N: Notifier,
    C: Clock,
{
    let (tx, rx) = crossbeam_channel::bounded::<()>(1);
    install(tx).wrap_err("install signal handler")?;
    if let Err(e) = ctl.bootstrap() {
        if let Err(revert) = ctl.shutdown() {
            tracing::error!(error = %revert, "revert after failed startup also failed");
        }
        return Err(e.wrap_err(StartupFailed));
    }
    Ok(rx)
}

fn print_summary(s: &RunSummary, safety: bmcfan_core::SafetyState, json: bool) {
    let reason = match s.reason {
        StopReason::Shutdown => "shutdown",
        StopReason::TickLimit => "tick limit",
    };
    if json {
        let out = serde_json::json!({
            "ticks": s.ticks,
            "reason": reason,
            "last_percent": s.last_percent,
            "safety": format!("{safety:?}"),
        });
        println!("{out}");
    } else {
        let fans = s
            .last_percent
            .map_or_else(|| "never commanded".to_owned(), |p| format!("last at {p}%"));
        println!(
            "stopped after {} tick(s) ({reason}); fans {fans}; control returned to BMC",
            s.ticks
        );
    }
}

fn show_curve(path: &Path, json: bool) -> Result<()> {
    let store = FanCurveStore::load(path)?;
    let curve = store.curve();
    if json {
        let rows: Vec<_> = curve
            .entries()
            .map(|e| serde_json::json!({ "speed_percent": e.speed_percent, "rpm": e.rpm }))
            .collect();
        println!("{}", serde_json::Value::Array(rows));
        return Ok(());
    }
    println!("speed_percent,rpm");
    for e in curve.entries() {
        println!("{},{}", e.speed_percent, e.rpm);
    }
    for (lo, hi) in curve.monotonic_violations() {
        println!(
            "# warning: rpm drops from {} at {}% to {} at {}%",
            lo.rpm, lo.speed_percent, hi.rpm, hi.speed_percent
        );
    }
    Ok(())
}

fn self_check(cfg: &Config, sim: bool, json: bool) -> Result<()> {
    let (mut sampler, _) = backend(cfg, sim)?;
    let timeout = Duration::from_millis(cfg.bmc.command_timeout_ms);
    let temp_c = sampler
        .read_temperature(timeout)
        .map_err(|e| eyre::Report::new(map_hw_error(&*e, Op::Sample)))
        .wrap_err("read temperature")?;
    let rpm = sampler
        .read_fan_rpm(timeout)
        .map_err(|e| eyre::Report::new(map_hw_error(&*e, Op::Sample)))
        .wrap_err("read fan rpm")?;
    tracing::info!(temp_c, rpm, "self-check ok");
    if json {
        println!("{}", serde_json::json!({ "ok": true, "temp_c": temp_c, "rpm": rpm }));
    } else {
        println!("OK: temperature {temp_c:.1}°C, {} at {rpm} rpm", cfg.bmc.fan_sensor);
    }
    Ok(())
}

fn notify_test(cfg: &Config) -> Result<()> {
    let mut n = notifier(cfg)?;
    n.send(
        "bmcfan test",
        &format!("Test notification from the fan controller for {}", cfg.bmc.host),
        Priority::Default,
    )
    .map_err(|e| eyre::Report::new(map_hw_error(&*e, Op::Notify)))
    .wrap_err("send test notification")?;
    if cfg.notify.enabled {
        println!("notification sent to {}/{}", cfg.notify.host, cfg.notify.topic);
    } else {
        println!("notifications disabled; test message written to the log");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmcfan_core::mocks::{Call, FakeBmc, RecordingNotifier};
    use bmcfan_traits::ManualClock;

    type TestLoop = ControlLoop<FakeBmc, FakeBmc, RecordingNotifier, ManualClock>;

    fn control_loop(bmc: &FakeBmc) -> TestLoop {
        let cfg = bmcfan_config::load_toml(
            "[bmc]\nhost = \"idrac.test\"\nusername = \"root\"\n\n[control]\nstep_delay_ms = 1\n",
        )
        .unwrap();
        let path = std::env::temp_dir().join("bmcfan-take-control.csv");
        ControlLoop::new(
            ControlSettings::from(&cfg),
            bmc.clone(),
            bmc.clone(),
            RecordingNotifier::default(),
            ManualClock::new(),
            FanCurveStore::new(path, FanCurve::new()),
        )
    }

    #[test]
    fn handler_failure_leaves_fans_untouched() {
        let bmc = FakeBmc::default();
        let mut ctl = control_loop(&bmc);
        let err = take_control(&mut ctl, |_| Err(eyre::eyre!("handler already set")))
            .unwrap_err();
        assert!(format!("{err:#}").contains("install signal handler"));
        assert_eq!(bmc.count(&Call::EnableManualControl), 0);
        assert!(bmc.calls().is_empty());
    }

    #[test]
    fn signal_during_startup_still_reverts() {
        let bmc = FakeBmc::default();
        let mut ctl = control_loop(&bmc);
        let rx = take_control(&mut ctl, |tx| {
            tx.try_send(()).unwrap();
            Ok(())
        })
        .unwrap();
        assert_eq!(bmc.count(&Call::EnableManualControl), 1);

        let summary = bmcfan_core::run(&mut ctl, &rx, None).unwrap();
        assert_eq!(summary.reason, StopReason::Shutdown);
        assert_eq!(summary.ticks, 0);
        assert_eq!(bmc.count(&Call::RevertToDefaultControl), 1);
    }

    #[test]
    fn failed_bootstrap_is_a_startup_failure() {
        let bmc = FakeBmc::default();
        bmc.fail_enable_manual();
        let mut ctl = control_loop(&bmc);
        let err = take_control(&mut ctl, |_| Ok(())).unwrap_err();
        assert!(err.downcast_ref::<StartupFailed>().is_some());
        assert_eq!(bmc.count(&Call::RevertToDefaultControl), 1);
    }
}
