//! Empirical fan curve: commanded percent to measured RPM.
//!
//! `FanCurve` is the in-memory table, keyed and ordered by speed.
//! `FanCurveStore` ties it to a file and replaces that file atomically on
//! every save, so a reader (or a crash) never observes a half-written table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bmcfan_config::{CurveRow, parse_curve_csv, render_curve_csv};

use crate::atomic::write_atomic;
use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanCurveEntry {
    pub speed_percent: u8,
    pub rpm: u32,
}

/// Ordered speed to RPM table with unique speeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanCurve {
    points: BTreeMap<u8, u32>,
}

impl FanCurve {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(speed, rpm)` pairs; a later pair for the same speed wins.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = (u8, u32)>,
    {
        Self {
            points: points.into_iter().collect(),
        }
    }

    /// Insert or overwrite; returns the previous RPM for that speed.
    pub fn insert(&mut self, speed_percent: u8, rpm: u32) -> Option<u32> {
        self.points.insert(speed_percent, rpm)
    }

    pub fn get(&self, speed_percent: u8) -> Option<u32> {
        self.points.get(&speed_percent).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Entries in ascending speed order.
    pub fn entries(&self) -> impl Iterator<Item = FanCurveEntry> + '_ {
        self.points.iter().map(|(&speed_percent, &rpm)| FanCurveEntry {
            speed_percent,
            rpm,
        })
    }

    /// Adjacent pairs where a higher speed measured fewer RPM.
    ///
    /// Real fans are monotonic; a hit here usually means the scan read the
    /// tachometer before the fan settled, or the wrong sensor.
    pub fn monotonic_violations(&self) -> Vec<(FanCurveEntry, FanCurveEntry)> {
        let entries: Vec<FanCurveEntry> = self.entries().collect();
        entries
            .windows(2)
            .filter(|w| w[1].rpm < w[0].rpm)
            .map(|w| (w[0], w[1]))
            .collect()
    }

    fn as_f32_points(&self) -> Vec<(f32, f32)> {
        self.points
            .iter()
            .map(|(&s, &r)| (f32::from(s), r as f32))
            .collect()
    }

    /// Expected RPM at `percent`, interpolated linearly between neighbours
    /// and clamped to the end points. `None` for an empty curve.
    pub fn rpm_for_percent(&self, percent: f32) -> Option<f32> {
        let pts = self.as_f32_points();
        let (first, last) = (*pts.first()?, *pts.last()?);
        if !percent.is_finite() || percent <= first.0 {
            return Some(first.1);
        }
        if percent >= last.0 {
            return Some(last.1);
        }
        pts.windows(2)
            .find(|w| percent <= w[1].0)
            .map(|w| lerp(w[0], w[1], percent))
    }

    /// Inverse lookup: which percent produces `rpm`. Walks the segments in
    /// speed order and takes the first one that brackets `rpm`; readings
    /// outside the measured range clamp to the lowest or highest speed.
    pub fn percent_for_rpm(&self, rpm: u32) -> Option<f32> {
        let pts = self.as_f32_points();
        let (first, last) = (*pts.first()?, *pts.last()?);
        let r = rpm as f32;
        if pts.len() == 1 || r <= first.1 {
            return Some(first.0);
        }
        if r >= last.1 {
            return Some(last.0);
        }
        for w in pts.windows(2) {
            let ((s0, r0), (s1, r1)) = (w[0], w[1]);
            if r >= r0.min(r1) && r <= r0.max(r1) {
                if (r1 - r0).abs() < f32::EPSILON {
                    return Some(s0);
                }
                return Some(lerp((r0, s0), (r1, s1), r));
            }
        }
        Some(last.0)
    }
}

/// y at `x` on the line through `a` and `b` (points as `(x, y)`).
#[inline]
fn lerp(a: (f32, f32), b: (f32, f32), x: f32) -> f32 {
    let span = b.0 - a.0;
    if span.abs() < f32::EPSILON {
        return a.1;
    }
    a.1 + (x - a.0) * (b.1 - a.1) / span
}

/// A fan curve plus the file it is persisted to.
#[derive(Debug, Clone)]
pub struct FanCurveStore {
    path: PathBuf,
    curve: FanCurve,
}

impl FanCurveStore {
    pub fn new(path: impl Into<PathBuf>, curve: FanCurve) -> Self {
        Self {
            path: path.into(),
            curve,
        }
    }

    /// Read the curve file. Fails if it is missing or malformed.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| eyre::eyre!("read fan curve {}: {}", path.display(), e))?;
        let rows = parse_curve_csv(&text)
            .map_err(|e| eyre::eyre!("parse fan curve {}: {}", path.display(), e))?;
        let curve = FanCurve::from_points(rows.into_iter().map(|r| (r.speed_percent, r.rpm)));
        warn_violations(&curve);
        tracing::info!(path = %path.display(), entries = curve.len(), "fan curve loaded");
        Ok(Self { path, curve })
    }

    /// Like [`load`](Self::load), but any failure falls back to `fallback`.
    pub fn load_or_fallback(path: impl Into<PathBuf>, fallback: FanCurve) -> Self {
        let path = path.into();
        match Self::load(path.clone()) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    entries = fallback.len(),
                    "fan curve unavailable, using configured fallback"
                );
                Self::new(path, fallback)
            }
        }
    }

    pub fn curve(&self) -> &FanCurve {
        &self.curve
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Swap in a new curve and persist it.
    ///
    /// The in-memory curve is replaced even if the write fails; the error
    /// is `ControlError::PersistenceFailed` and the old file stays intact.
    pub fn replace(&mut self, curve: FanCurve) -> Result<()> {
        self.curve = curve;
        warn_violations(&self.curve);
        self.persist()
    }

    /// Atomically rewrite the backing file from the in-memory curve.
    pub fn persist(&self) -> Result<()> {
        let rows = self.curve.entries().map(|e| CurveRow {
            speed_percent: e.speed_percent,
            rpm: e.rpm,
        });
        let bytes = render_curve_csv(rows)
            .map_err(|e| eyre::Report::new(ControlError::PersistenceFailed(e.to_string())))?;
        write_atomic(&self.path, &bytes).map_err(|e| {
            eyre::Report::new(ControlError::PersistenceFailed(format!(
                "{}: {}",
                self.path.display(),
                e
            )))
        })?;
        tracing::info!(path = %self.path.display(), entries = self.curve.len(), "fan curve saved");
        Ok(())
    }
}

fn warn_violations(curve: &FanCurve) {
    for (lo, hi) in curve.monotonic_violations() {
        tracing::warn!(
            speed_lo = lo.speed_percent,
            rpm_lo = lo.rpm,
            speed_hi = hi.speed_percent,
            rpm_hi = hi.rpm,
            "fan curve is not monotonic"
        );
    }
}
