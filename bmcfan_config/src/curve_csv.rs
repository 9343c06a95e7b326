//! Fan curve table format.
//!
//! Current layout, one entry per row, ascending by speed:
//!
//! ```text
//! speed_percent,rpm
//! 20,3360
//! 30,4440
//! ```
//!
//! The older transposed layout (first line speeds, second line RPMs, no
//! header) is still accepted on read so existing files keep working; writes
//! always produce the row layout.
use serde::{Deserialize, Serialize};

pub const CURVE_HEADERS: [&str; 2] = ["speed_percent", "rpm"];

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct CurveRow {
    pub speed_percent: u8,
    pub rpm: u32,
}

/// Parse curve text into rows in file order.
///
/// Rejects speeds above 100 and duplicate speeds; ordering is left to the
/// caller.
pub fn parse_curve_csv(text: &str) -> eyre::Result<Vec<CurveRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| eyre::eyre!("invalid fan curve line {}: {}", idx + 1, e))?;
        if rec.iter().all(str::is_empty) {
            continue;
        }
        records.push(rec);
    }

    let Some(first) = records.first() else {
        eyre::bail!("fan curve file is empty");
    };

    let rows = if first.iter().eq(CURVE_HEADERS) {
        let mut rows = Vec::with_capacity(records.len() - 1);
        for (idx, rec) in records.iter().enumerate().skip(1) {
            if rec.len() != 2 {
                eyre::bail!(
                    "invalid fan curve row {}: expected 2 fields, got {}",
                    idx + 1,
                    rec.len()
                );
            }
            let row: CurveRow = rec
                .deserialize(None)
                .map_err(|e| eyre::eyre!("invalid fan curve row {}: {}", idx + 1, e))?;
            rows.push(row);
        }
        rows
    } else {
        parse_legacy(&records)?
    };

    let mut seen = [false; 101];
    for row in &rows {
        let idx = usize::from(row.speed_percent);
        if idx > 100 {
            eyre::bail!("fan curve speed {} is out of range [0, 100]", row.speed_percent);
        }
        if seen[idx] {
            eyre::bail!("fan curve has duplicate speed {}", row.speed_percent);
        }
        seen[idx] = true;
    }
    Ok(rows)
}

fn parse_legacy(records: &[csv::StringRecord]) -> eyre::Result<Vec<CurveRow>> {
    if records.len() != 2 {
        eyre::bail!(
            "fan curve must have headers 'speed_percent,rpm' (or two legacy lines), got {} lines",
            records.len()
        );
    }
    let (speeds, rpms) = (&records[0], &records[1]);
    if speeds.len() != rpms.len() {
        eyre::bail!(
            "legacy fan curve lines differ in length ({} speeds, {} rpms)",
            speeds.len(),
            rpms.len()
        );
    }
    speeds
        .iter()
        .zip(rpms.iter())
        .enumerate()
        .map(|(col, (s, r))| {
            let speed_percent = s
                .parse::<u8>()
                .map_err(|e| eyre::eyre!("invalid legacy speed in column {}: {}", col + 1, e))?;
            let rpm = r
                .parse::<u32>()
                .map_err(|e| eyre::eyre!("invalid legacy rpm in column {}: {}", col + 1, e))?;
            Ok(CurveRow { speed_percent, rpm })
        })
        .collect()
}

/// Render rows (already in the desired order) with the standard header.
pub fn render_curve_csv<I>(rows: I) -> eyre::Result<Vec<u8>>
where
    I: IntoIterator<Item = CurveRow>,
{
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    let mut wrote_any = false;
    for row in rows {
        wtr.serialize(row)
            .map_err(|e| eyre::eyre!("serialize fan curve row: {e}"))?;
        wrote_any = true;
    }
    if !wrote_any {
        // serialize() emits the header lazily; an empty curve still gets one
        wtr.write_record(CURVE_HEADERS)
            .map_err(|e| eyre::eyre!("write fan curve header: {e}"))?;
    }
    wtr.into_inner()
        .map_err(|e| eyre::eyre!("flush fan curve: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_layout_round_trips_through_render() {
        let rows = vec![
            CurveRow { speed_percent: 20, rpm: 3360 },
            CurveRow { speed_percent: 30, rpm: 4440 },
        ];
        let bytes = render_curve_csv(rows.clone()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "speed_percent,rpm\n20,3360\n30,4440\n");
        assert_eq!(parse_curve_csv(&text).unwrap(), rows);
    }

    #[test]
    fn empty_curve_still_has_header() {
        let bytes = render_curve_csv(Vec::new()).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "speed_percent,rpm\n");
        assert!(parse_curve_csv("speed_percent,rpm\n").unwrap().is_empty());
    }
}
