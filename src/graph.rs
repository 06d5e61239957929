//! Graph metadata reported in definitions mode.

use serde::Serialize;

use crate::reading::{MetricSpec, Unit};

/// One metric line inside a graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphMetric {
    /// Last name segment, or `*` for a dynamic family.
    pub name: String,
    pub label: String,
    pub stacked: bool,
    /// Reported as a per-second rate of a raw counter. Not part of the
    /// agent document.
    #[serde(skip)]
    pub diff: bool,
}

impl GraphMetric {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            stacked: false,
            diff: false,
        }
    }

    pub fn stacked(mut self) -> Self {
        self.stacked = true;
        self
    }

    pub fn diff(mut self) -> Self {
        self.diff = true;
        self
    }
}

/// A graph as the monitoring agent displays it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    /// Graph key; `#` segments stand for a per-instance component.
    #[serde(skip)]
    pub key: String,
    pub label: String,
    pub unit: Unit,
    pub metrics: Vec<GraphMetric>,
}

impl Graph {
    pub fn new(key: impl Into<String>, label: impl Into<String>, unit: Unit) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            unit,
            metrics: Vec::new(),
        }
    }

    pub fn metric(mut self, metric: GraphMetric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Metric specs covered by this graph, named `<key>.<metric>`.
    pub fn metric_specs(&self) -> Vec<MetricSpec> {
        self.metrics
            .iter()
            .map(|m| MetricSpec {
                name: format!("{}.{}", self.key, m.name),
                is_counter: m.diff,
                label: m.label.clone(),
                unit: self.unit,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_specs_qualify_names_and_inherit_unit() {
        let graph = Graph::new("xentop.nettx.#", "Xentop Nettx", Unit::Bytes)
            .metric(GraphMetric::new("nettx", "nettx").stacked().diff());

        let specs = graph.metric_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "xentop.nettx.#.nettx");
        assert!(specs[0].is_counter);
        assert_eq!(specs[0].unit, Unit::Bytes);
        assert!(specs[0].matches("xentop.nettx.web01.nettx"));
    }

    #[test]
    fn test_serialized_graph_omits_key_and_diff() {
        let graph = Graph::new("murmur.connections", "Murmur Connections", Unit::Integer)
            .metric(GraphMetric::new("con_cur", "Current users"));
        let json = serde_json::to_value(&graph).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "label": "Murmur Connections",
                "unit": "integer",
                "metrics": [{"name": "con_cur", "label": "Current users", "stacked": false}]
            })
        );
    }
}
