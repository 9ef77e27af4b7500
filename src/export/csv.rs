use anyhow::Result;
use std::io::Write;

use crate::state::Sample;

/// Export the sample history to CSV format
pub fn export_csv<W: Write>(history: &[Sample], mut writer: W) -> Result<()> {
    writeln!(writer, "time,round_trip_ms,status")?;

    for sample in history {
        // 0 marks a probe with no measurement
        let status = if sample.round_trip > 0 { "ok" } else { "failed" };
        writeln!(
            writer,
            "{},{},{}",
            sample.time.format("%H:%M:%S"),
            sample.round_trip,
            status
        )?;
    }

    Ok(())
}
