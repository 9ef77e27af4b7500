use chrono::{DateTime, Utc};
use std::io::Write;

use crate::state::Statistics;

/// Render the stat panel as text
pub fn generate_report<W: Write>(
    stats: &Statistics,
    target: &str,
    created_at: Option<DateTime<Utc>>,
    mut writer: W,
) -> std::io::Result<()> {
    writeln!(writer, "pingwatch report for {}", target)?;
    if let Some(created) = created_at {
        writeln!(writer, "Snapshot: {}", created.format("%Y-%m-%d %H:%M:%S UTC"))?;
    }
    writeln!(writer)?;

    let (min, min_at) = if stats.has_samples() {
        (
            format!("{} ms", stats.min.value),
            stats.min.time.format("%H:%M:%S").to_string(),
        )
    } else {
        ("-".to_string(), String::new())
    };
    let (max, max_at) = if stats.has_samples() {
        (
            format!("{} ms", stats.max.value),
            stats.max.time.format("%H:%M:%S").to_string(),
        )
    } else {
        ("-".to_string(), String::new())
    };

    writeln!(writer, "{:<16} {:>10}", "Threshold", format!("{} ms", stats.round_trip_threshold))?;
    writeln!(writer, "{:<16} {:>10}", "Average", format!("{} ms", stats.average))?;
    writeln!(writer, "{:<16} {:>10}  {}", "Min", min, min_at)?;
    writeln!(writer, "{:<16} {:>10}  {}", "Max", max, max_at)?;
    writeln!(writer, "{:<16} {:>10}", "Over threshold", stats.over_threshold)?;
    writeln!(
        writer,
        "{:<16} {:>10}  ({:.1}%)",
        "Failed",
        stats.failed_requests,
        stats.loss_pct()
    )?;
    writeln!(writer, "{:<16} {:>10}", "Total", stats.total_requests)?;

    Ok(())
}

/// Generate report to string
pub fn generate_report_string(
    stats: &Statistics,
    target: &str,
    created_at: Option<DateTime<Utc>>,
) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail
    let _ = generate_report(stats, target, created_at, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
