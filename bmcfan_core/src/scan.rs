//! Fan curve scan.
//!
//! Drives the fans through a fixed list of speeds, waits for each one to
//! settle, reads the tachometer and builds a fresh [`FanCurve`]. While a
//! session is active it owns actuation; the PID regulator is not consulted.
//!
//! ```text
//! Idle -> Stepping -> Settling -> Recording -> Stepping ... -> Done -> Idle
//! ```
//!
//! One call to [`ScanEngine::advance`] performs at most one speed command
//! and one RPM read, and never sleeps: settling is a deadline checked on
//! later calls. The stored curve is only replaced when the whole list has
//! been measured; an aborted or abandoned scan leaves it untouched.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bmcfan_traits::{Actuator, Clock, Notifier, Priority, Sampler};

use crate::config::ScanCfg;
use crate::curve::{FanCurve, FanCurveStore};
use crate::hw_error::{Op, map_hw_error};
use crate::notify::send_best_effort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Stepping,
    Settling,
    Recording,
    Done,
}

/// What a call to `advance` did.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanStatus {
    /// No session.
    Idle,
    /// A new speed was commanded.
    Commanded { speed: u8 },
    /// Still waiting for the fan to settle.
    Settling { speed: u8, remaining: Duration },
    /// A step failed; it is retried on the next call.
    Retrying { speed: u8, failures: u32 },
    /// Every speed measured; `persisted` is false if the file write failed.
    Completed { entries: usize, persisted: bool },
    /// Too many failures on one step; the scan was dropped.
    Abandoned { speed: u8 },
}

#[derive(Debug)]
struct ScanSession {
    remaining: VecDeque<u8>,
    current: Option<u8>,
    settle_deadline: Option<Instant>,
    phase: ScanPhase,
    failures: u32,
    curve: FanCurve,
}

#[derive(Debug)]
pub struct ScanEngine {
    cfg: ScanCfg,
    session: Option<ScanSession>,
    last_commanded: Option<u8>,
}

impl ScanEngine {
    pub fn new(cfg: ScanCfg) -> Self {
        Self {
            cfg,
            session: None,
            last_commanded: None,
        }
    }

    /// Begin a scan over the configured speeds. Returns false (and does
    /// nothing) when the list is empty or a session is already running.
    pub fn start(&mut self) -> bool {
        if self.session.is_some() {
            return false;
        }
        if self.cfg.speeds.is_empty() {
            tracing::warn!("scan requested with no speeds, ignoring");
            return false;
        }
        tracing::info!(
            speeds = ?self.cfg.speeds,
            settle_ms = self.cfg.settle.as_millis() as u64,
            "fan curve scan started"
        );
        self.session = Some(ScanSession {
            remaining: self.cfg.speeds.iter().copied().collect(),
            current: None,
            settle_deadline: None,
            phase: ScanPhase::Stepping,
            failures: 0,
            curve: FanCurve::new(),
        });
        true
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn phase(&self) -> ScanPhase {
        self.session.as_ref().map_or(ScanPhase::Idle, |s| s.phase)
    }

    /// Last speed this engine sent to the actuator.
    pub fn last_commanded(&self) -> Option<u8> {
        self.last_commanded
    }

    /// Drop the session without recording the step in progress.
    pub fn abort(&mut self, reason: &str) {
        if let Some(s) = self.session.take() {
            tracing::warn!(
                reason,
                speed = ?s.current,
                measured = s.curve.len(),
                "fan curve scan aborted"
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn advance<S, A, N, C>(
        &mut self,
        sampler: &mut S,
        actuator: &mut A,
        notifier: &mut N,
        store: &mut FanCurveStore,
        clock: &C,
        timeout: Duration,
    ) -> ScanStatus
    where
        S: Sampler + ?Sized,
        A: Actuator + ?Sized,
        N: Notifier + ?Sized,
        C: Clock + ?Sized,
    {
        let Some(session) = self.session.as_mut() else {
            return ScanStatus::Idle;
        };

        if session.phase == ScanPhase::Settling {
            let deadline = session.settle_deadline.unwrap_or_else(|| clock.now());
            let now = clock.now();
            if now < deadline {
                return ScanStatus::Settling {
                    speed: session.current.unwrap_or_default(),
                    remaining: deadline - now,
                };
            }
            session.phase = ScanPhase::Recording;
        }

        if session.phase == ScanPhase::Recording {
            let speed = session.current.unwrap_or_default();
            match sampler.read_fan_rpm(timeout) {
                Ok(rpm) => {
                    tracing::info!(speed, rpm, "scan step recorded");
                    session.curve.insert(speed, rpm);
                    session.failures = 0;
                    session.current = None;
                    session.phase = if session.remaining.is_empty() {
                        ScanPhase::Done
                    } else {
                        ScanPhase::Stepping
                    };
                }
                Err(e) => {
                    let err = map_hw_error(&*e, Op::Sample);
                    tracing::warn!(speed, error = %err, "scan rpm read failed");
                    return self.step_failed(speed, notifier);
                }
            }
        }

        let session = match self.session.as_mut() {
            Some(s) => s,
            None => return ScanStatus::Idle,
        };

        if session.phase == ScanPhase::Stepping {
            let speed = match session.current {
                Some(s) => s,
                None => match session.remaining.pop_front() {
                    Some(s) => {
                        session.current = Some(s);
                        s
                    }
                    None => {
                        session.phase = ScanPhase::Done;
                        return self.finish(notifier, store);
                    }
                },
            };
            return match actuator.set_fan_speed(speed) {
                Ok(()) => {
                    tracing::info!(percent = speed, "scan step commanded");
                    session.settle_deadline = Some(clock.now() + self.cfg.settle);
                    session.phase = ScanPhase::Settling;
                    session.failures = 0;
                    self.last_commanded = Some(speed);
                    ScanStatus::Commanded { speed }
                }
                Err(e) => {
                    let err = map_hw_error(&*e, Op::Actuate);
                    tracing::warn!(percent = speed, error = %err, "scan speed command failed");
                    self.step_failed(speed, notifier)
                }
            };
        }

        self.finish(notifier, store)
    }

    fn step_failed<N: Notifier + ?Sized>(&mut self, speed: u8, notifier: &mut N) -> ScanStatus {
        let Some(session) = self.session.as_mut() else {
            return ScanStatus::Idle;
        };
        session.failures += 1;
        let failures = session.failures;
        if failures < self.cfg.max_step_failures.max(1) {
            return ScanStatus::Retrying { speed, failures };
        }
        self.session = None;
        tracing::error!(speed, failures, "fan curve scan abandoned");
        let body = format!(
            "Scan gave up at {speed}% after {failures} consecutive failures. \
             The stored fan curve was not changed."
        );
        send_best_effort(notifier, "Fan curve scan abandoned", &body, Priority::High);
        ScanStatus::Abandoned { speed }
    }

    fn finish<N: Notifier + ?Sized>(
        &mut self,
        notifier: &mut N,
        store: &mut FanCurveStore,
    ) -> ScanStatus {
        let Some(session) = self.session.take() else {
            return ScanStatus::Idle;
        };
        let entries = session.curve.len();
        let table = session
            .curve
            .entries()
            .map(|e| format!("{}%: {} rpm", e.speed_percent, e.rpm))
            .collect::<Vec<_>>()
            .join("\n");
        let persisted = match store.replace(session.curve) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    path = %store.path().display(),
                    "fan curve not saved, keeping it in memory"
                );
                false
            }
        };
        tracing::info!(entries, persisted, "fan curve scan complete");
        let body = if persisted {
            format!("{table}\nSaved to {}", store.path().display())
        } else {
            format!(
                "{table}\nSaving to {} FAILED; the curve is only kept in memory.",
                store.path().display()
            )
        };
        send_best_effort(notifier, "Fan curve scan complete", &body, Priority::Default);
        ScanStatus::Completed { entries, persisted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{Call, FakeBmc, RecordingNotifier};
    use bmcfan_traits::ManualClock;

    const SETTLE: Duration = Duration::from_secs(10);

    fn engine(speeds: &[u8]) -> ScanEngine {
        ScanEngine::new(ScanCfg {
            enabled: true,
            speeds: speeds.to_vec(),
            settle: SETTLE,
            max_step_failures: 2,
        })
    }

    struct Rig {
        bmc: FakeBmc,
        notifier: RecordingNotifier,
        store: FanCurveStore,
        clock: ManualClock,
        _dir: tempfile::TempDir,
    }

    impl Rig {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                bmc: FakeBmc::default(),
                notifier: RecordingNotifier::default(),
                store: FanCurveStore::new(dir.path().join("curve.csv"), FanCurve::new()),
                clock: ManualClock::new(),
                _dir: dir,
            }
        }

        fn advance(&mut self, eng: &mut ScanEngine) -> ScanStatus {
            let mut s = self.bmc.clone();
            let mut a = self.bmc.clone();
            eng.advance(
                &mut s,
                &mut a,
                &mut self.notifier,
                &mut self.store,
                &self.clock,
                Duration::from_secs(1),
            )
        }
    }

    #[test]
    fn no_rpm_read_while_settling() {
        let mut rig = Rig::new();
        let mut eng = engine(&[20]);
        assert!(eng.start());
        assert_eq!(rig.advance(&mut eng), ScanStatus::Commanded { speed: 20 });
        rig.clock.advance(Duration::from_secs(4));
        assert_eq!(
            rig.advance(&mut eng),
            ScanStatus::Settling {
                speed: 20,
                remaining: Duration::from_secs(6)
            }
        );
        assert_eq!(rig.bmc.count(&Call::ReadFanRpm), 0);
        assert_eq!(eng.phase(), ScanPhase::Settling);
    }

    #[test]
    fn records_then_commands_next_speed_in_one_call() {
        let mut rig = Rig::new();
        let mut eng = engine(&[20, 30]);
        eng.start();
        rig.advance(&mut eng);
        rig.clock.advance(SETTLE);
        assert_eq!(rig.advance(&mut eng), ScanStatus::Commanded { speed: 30 });
        assert_eq!(
            rig.bmc.calls(),
            vec![Call::SetFanSpeed(20), Call::ReadFanRpm, Call::SetFanSpeed(30)]
        );
        assert_eq!(eng.last_commanded(), Some(30));
    }

    #[test]
    fn rpm_failures_retry_then_abandon() {
        let mut rig = Rig::new();
        rig.store = FanCurveStore::new(rig.store.path(), FanCurve::from_points([(50, 7000)]));
        let mut eng = engine(&[20, 30]);
        eng.start();
        rig.advance(&mut eng);
        rig.clock.advance(SETTLE);
        rig.bmc.fail_rpm_reads(5);
        assert_eq!(
            rig.advance(&mut eng),
            ScanStatus::Retrying {
                speed: 20,
                failures: 1
            }
        );
        assert_eq!(rig.advance(&mut eng), ScanStatus::Abandoned { speed: 20 });
        assert!(!eng.is_active());
        assert_eq!(rig.store.curve().get(50), Some(7000));
        assert_eq!(rig.notifier.count_at(Priority::High), 1);
    }

    #[test]
    fn abort_leaves_store_untouched() {
        let mut rig = Rig::new();
        let mut eng = engine(&[20, 30]);
        eng.start();
        rig.advance(&mut eng);
        eng.abort("overheat");
        assert_eq!(rig.advance(&mut eng), ScanStatus::Idle);
        assert!(rig.store.curve().is_empty());
        assert!(!rig.store.path().exists());
    }

    #[test]
    fn empty_speed_list_does_not_start() {
        let mut eng = engine(&[]);
        assert!(!eng.start());
        assert_eq!(eng.phase(), ScanPhase::Idle);
    }
}
