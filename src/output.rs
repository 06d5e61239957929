//! Agent-facing output rendering.
//!
//! Values mode prints `<name>\t<value>\t<timestamp>` lines; definitions mode
//! prints a header line followed by a JSON graph document. Both render into
//! any `Write` and are deterministic for the same input.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::graph::Graph;
use crate::reading::Unit;

/// First line of a definitions document; the agent keys on it.
pub const DEFINITIONS_HEADER: &str = "# mackerel-agent-plugin";

/// A computed value ready to be printed.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputValue {
    pub name: String,
    pub value: f64,
    pub timestamp: i64,
    pub unit: Unit,
}

/// Renders a value according to its unit.
pub fn format_value(value: f64, unit: Unit) -> String {
    if unit.is_integral() {
        let truncated = value.trunc();
        // Avoid printing "-0" for small negative values.
        if truncated == 0.0 {
            "0".to_string()
        } else {
            format!("{}", truncated)
        }
    } else {
        format!("{:.6}", value)
    }
}

/// Writes one line per value, ordered by name and then timestamp.
pub fn write_values<W: Write>(out: &mut W, values: &[OutputValue]) -> io::Result<()> {
    let mut sorted: Vec<&OutputValue> = values.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name).then(a.timestamp.cmp(&b.timestamp)));

    for v in sorted {
        writeln!(out, "{}\t{}\t{}", v.name, format_value(v.value, v.unit), v.timestamp)?;
    }
    out.flush()
}

#[derive(Serialize)]
struct Definitions<'a> {
    graphs: BTreeMap<&'a str, &'a Graph>,
}

/// Writes the graph definition document.
pub fn write_definitions<W: Write>(out: &mut W, graphs: &[Graph]) -> io::Result<()> {
    let doc = Definitions {
        graphs: graphs.iter().map(|g| (g.key.as_str(), g)).collect(),
    };

    writeln!(out, "{}", DEFINITIONS_HEADER)?;
    serde_json::to_writer(&mut *out, &doc)?;
    writeln!(out)?;
    out.flush()
}
