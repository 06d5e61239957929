//! Per-domain Xen statistics from `xentop` batch output.

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{PluginError, Result};
use crate::graph::{Graph, GraphMetric};
use crate::plugin::Plugin;
use crate::reading::{Reading, Unit};
use crate::state_store::CacheKey;

pub const DEFAULT_COMMAND: &str = "xentop";
pub const DEFAULT_XEN_VERSION: u32 = 4;

// dom0 reports MAXMEM(k) as "no limit", which splits into two fields.
const SHIFT_FROM: &str = "MAXMEM(%)";

/// Column positions taken from the `NAME ...` header row.
struct ColumnIndex(HashMap<String, usize>);

impl ColumnIndex {
    fn from_header(fields: &[&str]) -> Self {
        Self(
            fields
                .iter()
                .enumerate()
                .map(|(i, f)| (f.to_string(), i))
                .collect(),
        )
    }

    /// Position of `column` in a row; `shifted` rows carry an extra field
    /// before MAXMEM(%).
    fn position(&self, column: &str, shifted: bool) -> Option<usize> {
        let pos = *self.0.get(column)?;
        let pivot = self.0.get(SHIFT_FROM).copied().unwrap_or(usize::MAX);
        Some(if shifted && pos >= pivot { pos + 1 } else { pos })
    }
}

fn field(row: &[&str], index: &ColumnIndex, column: &str, shifted: bool) -> Result<f64> {
    let raw = index
        .position(column, shifted)
        .and_then(|pos| row.get(pos))
        .ok_or_else(|| PluginError::Parse {
            field: column.to_string(),
            value: row.join(" "),
        })?;

    raw.parse::<f64>().map_err(|_| PluginError::Parse {
        field: column.to_string(),
        value: raw.to_string(),
    })
}

/// Parses `xentop --batch` output into readings stamped with `now`.
///
/// Lines before the header are ignored. Domain names have `.` replaced by
/// `_` so they stay a single name segment.
pub fn parse_output(output: &str, now: i64) -> Result<Vec<Reading>> {
    let mut index: Option<ColumnIndex> = None;
    let mut readings = Vec::new();

    for line in output.lines() {
        let row: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = row.first() else {
            continue;
        };

        if *first == "NAME" {
            index = Some(ColumnIndex::from_header(&row));
            continue;
        }
        let Some(index) = index.as_ref() else {
            continue;
        };

        let shifted = row.contains(&"n/a");
        let name_pos = index.position("NAME", shifted).unwrap_or(0);
        let domain = row.get(name_pos).copied().unwrap_or_default().replace('.', "_");

        let cpu = field(&row, index, "CPU(sec)", shifted)?;
        let memory = field(&row, index, "MEM(%)", shifted)?;
        let nettx = field(&row, index, "NETTX(k)", shifted)?;
        let netrx = field(&row, index, "NETRX(k)", shifted)?;
        let vbdrd = field(&row, index, "VBD_RD", shifted)?;
        let vbdwr = field(&row, index, "VBD_WR", shifted)?;

        for (metric, value) in [
            ("cpu", cpu * 100.0 / 60.0),
            ("memory", memory),
            ("nettx", nettx * 1000.0),
            ("netrx", netrx * 1000.0),
            ("vbdrd", vbdrd),
            ("vbdwr", vbdwr),
        ] {
            readings.push(Reading::new(
                format!("xentop.{m}.{d}.{m}", m = metric, d = domain),
                value,
                now,
            ));
        }
    }

    Ok(readings)
}

pub struct XentopPlugin {
    xen_version: u32,
    command: String,
}

impl XentopPlugin {
    /// `command` is split on whitespace into program and leading arguments.
    pub fn new(xen_version: u32, command: impl Into<String>) -> Self {
        Self {
            xen_version,
            command: command.into(),
        }
    }

    fn args(&self) -> Vec<&'static str> {
        let mut args = vec!["--batch", "-i", "1"];
        if self.xen_version == 4 {
            args.push("-f");
        }
        args
    }

    async fn run_xentop(&self) -> Result<String> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| PluginError::Config("empty xentop command".to_string()))?;

        let output = Command::new(program)
            .args(parts)
            .args(self.args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(PluginError::Fetch(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("{} produced {} bytes", program, output.stdout.len());
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Plugin for XentopPlugin {
    fn name(&self) -> &str {
        "xentop"
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::derive("xentop", &[&self.xen_version.to_string()])
    }

    fn graph_definition(&self) -> Vec<Graph> {
        let graph = |metric: &str, label: &str, unit: Unit, diff: bool| {
            let m = GraphMetric::new(metric, metric).stacked();
            Graph::new(format!("xentop.{}.#", metric), label, unit).metric(if diff { m.diff() } else { m })
        };

        vec![
            graph("cpu", "Xentop CPU", Unit::Percentage, true),
            graph("memory", "Xentop Memory", Unit::Percentage, false),
            graph("nettx", "Xentop Nettx", Unit::Bytes, true),
            graph("netrx", "Xentop Netrx", Unit::Bytes, true),
            graph("vbdrd", "Xentop VBD_RD", Unit::Iops, true),
            graph("vbdwr", "Xentop VBD_WR", Unit::Iops, true),
        ]
    }

    async fn fetch(&self, now: i64) -> Result<Vec<Reading>> {
        let output = self.run_xentop().await?;
        parse_output(&output, now)
    }
}
