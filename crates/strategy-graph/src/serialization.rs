//! Strategy records: export, lenient import, and storage sanitizing
//!
//! Import never runs the validator. A file that parses is accepted even
//! when the resulting graph is invalid; missing node ids, types, positions
//! and data are back-filled with defaults. Only unreadable input, invalid
//! JSON, missing `nodes`/`edges` arrays, and edges without endpoints abort
//! an import.

use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{EngineConfig, SamplingConfig};
use crate::error::{ExportError, ImportError};
use crate::expression::indicator_labels;
use crate::node_data::NodeData;
use crate::types::{CanvasPosition, Edge, EdgeKind, Node, NodeRole, NodeStyle, StrategyGraph};

/// One persisted or exported strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRecord {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Entry of the strategy list, independent of the strategy body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyMetadata {
    pub id: String,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

impl StrategyRecord {
    pub fn metadata(&self) -> StrategyMetadata {
        StrategyMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            last_modified: self.last_modified,
            created: self.created,
            description: self.description.clone(),
        }
    }

    pub fn graph(&self) -> StrategyGraph {
        StrategyGraph::new(self.nodes.clone(), self.edges.clone())
    }

    /// Set `lastModified` to now
    pub fn touch(&mut self) {
        self.last_modified = Utc::now();
    }
}

/// Result of a successful import
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedStrategy {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: String,
    pub created: Option<DateTime<Utc>>,
    pub graph: StrategyGraph,
}

/// Deep-copy the graph into a new record with a generated id.
///
/// Indicator keys in signal condition trees (`RSI_a1b2`) are rewritten to
/// their display form (`RSI(14)`) using the Start node indicator tables.
pub fn export_strategy(nodes: &[Node], edges: &[Edge], name: &str) -> StrategyRecord {
    let labels = indicator_labels(nodes);
    let nodes = nodes
        .iter()
        .map(|node| {
            let mut node = node.clone();
            if let Some(signal) = node.data.as_signal_mut() {
                signal.conditions = signal.conditions.relabel_indicators(&labels);
                if let Some(exit) = &signal.exit_conditions {
                    signal.exit_conditions = Some(exit.relabel_indicators(&labels));
                }
            }
            node
        })
        .collect();

    let now = Utc::now();
    StrategyRecord {
        id: format!("strategy-{}", uuid::Uuid::new_v4()),
        name: name.to_string(),
        created: now,
        last_modified: now,
        description: String::new(),
        nodes,
        edges: edges.to_vec(),
    }
}

/// Pretty-printed JSON of a record
pub fn to_json(record: &StrategyRecord) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(record)?)
}

pub fn write_record<W: Write>(record: &StrategyRecord, mut writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, record)?;
    writer.write_all(b"\n")?;
    Ok(())
}

pub fn import_from_str(json: &str) -> Result<ImportedStrategy, ImportError> {
    let value: Value = serde_json::from_str(json)?;
    import_record(&value)
}

pub fn import_from_reader<R: Read>(mut reader: R) -> Result<ImportedStrategy, ImportError> {
    let mut json = String::new();
    reader.read_to_string(&mut json)?;
    import_from_str(&json)
}

pub fn import_from_path(path: impl AsRef<Path>) -> Result<ImportedStrategy, ImportError> {
    let json = std::fs::read_to_string(path)?;
    import_from_str(&json)
}

/// Rebuild the graph of a record, back-filling what is missing
pub fn import_strategy(record: &Value) -> Result<StrategyGraph, ImportError> {
    let object = record.as_object().ok_or(ImportError::NotAnObject)?;
    let raw_nodes = array_field(object, "nodes")?;
    let raw_edges = array_field(object, "edges")?;

    // Edges first: a malformed edge aborts before any node work is done
    let edges = raw_edges
        .iter()
        .enumerate()
        .map(|(index, raw)| import_edge(index, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let nodes = raw_nodes
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| import_node(index, raw))
        .collect();

    Ok(StrategyGraph::new(nodes, edges))
}

/// Graph plus the record header fields
pub fn import_record(record: &Value) -> Result<ImportedStrategy, ImportError> {
    let graph = import_strategy(record)?;
    let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
    let created = record
        .get("created")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    Ok(ImportedStrategy {
        id: text("id").filter(|id| !id.is_empty()),
        name: text("name"),
        description: text("description").unwrap_or_default(),
        created,
        graph,
    })
}

fn array_field<'a>(
    object: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Vec<Value>, ImportError> {
    object
        .get(key)
        .and_then(Value::as_array)
        .ok_or(ImportError::MissingArray(key))
}

fn import_edge(index: usize, raw: &Value) -> Result<Edge, ImportError> {
    let endpoint = |key: &'static str| {
        raw.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ImportError::MalformedEdge {
                index,
                endpoint: key,
            })
    };
    let source = endpoint("source")?;
    let target = endpoint("target")?;

    let id = match raw.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = format!("edge-{}-{}", source, target);
            log::warn!("Edge {} has no id; assigned '{}'", index, id);
            id
        }
    };
    // Unknown presentation kinds fall back to the default
    let kind = raw
        .get("type")
        .cloned()
        .and_then(|v| serde_json::from_value::<EdgeKind>(v).ok())
        .unwrap_or_default();

    let mut edge = Edge::new(id, source, target, kind);
    edge.style = raw.get("style").filter(|s| !s.is_null()).cloned();
    Ok(edge)
}

fn import_node(index: usize, raw: &Value) -> Option<Node> {
    let Some(object) = raw.as_object() else {
        log::warn!("Skipping node {}: not a JSON object", index);
        return None;
    };

    let given_id = object
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());

    let role = match object.get("type").and_then(Value::as_str) {
        Some(name) => NodeRole::from_type_name(name),
        None => None,
    }
    .or_else(|| given_id.and_then(NodeRole::from_legacy_id))
    .unwrap_or_else(|| {
        log::warn!("Node {} has no recognizable type; treating it as a signal", index);
        NodeRole::Signal
    });

    let id = match given_id {
        Some(id) => id.to_string(),
        None => {
            let id = format!("{}-{}", role.id_prefix(), uuid::Uuid::new_v4());
            log::warn!("Node {} has no id; assigned '{}'", index, id);
            id
        }
    };

    let position = object
        .get("position")
        .cloned()
        .and_then(|v| serde_json::from_value::<CanvasPosition>(v).ok())
        .unwrap_or_default();

    let raw_data = object.get("data").cloned().unwrap_or(Value::Null);
    let data = NodeData::from_value(role, raw_data).unwrap_or_else(|e| {
        log::warn!("Node '{}' has unusable data ({}); using defaults", id, e);
        NodeData::default_for(role)
    });

    let style = object
        .get("style")
        .cloned()
        .and_then(|v| serde_json::from_value::<NodeStyle>(v).ok());

    Some(Node {
        id,
        role,
        position,
        data,
        style,
    })
}

/// Strip deny-listed keys before storage.
///
/// JSON has no function values, so only the deny-list applies to object
/// keys. Arrays longer than the sampling threshold are only sanitized at
/// their head, every n-th middle element, and their tail; the other
/// elements are stored as they are. Array lengths never change, so a
/// second pass visits the same elements and returns its input unchanged.
pub fn sanitize_for_storage(value: &Value, config: &EngineConfig) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !config.denied_properties.iter().any(|d| d == *key))
                .map(|(key, v)| (key.clone(), sanitize_for_storage(v, config)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, v)| {
                    if is_sampled(index, items.len(), &config.sampling) {
                        sanitize_for_storage(v, config)
                    } else {
                        v.clone()
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_sampled(index: usize, len: usize, sampling: &SamplingConfig) -> bool {
    if len <= sampling.threshold || len < sampling.edge * 2 {
        return true;
    }
    index < sampling.edge
        || index >= len - sampling.edge
        || (index - sampling.edge) % sampling.stride.max(1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StrategyBuilder;
    use crate::condition::{ComparisonOperator, Condition, ConditionItem, GroupCondition};
    use crate::expression::{DisplayContext, Expression};
    use crate::node_data::{IndicatorConfig, SignalData, StartData};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn graph_with_indicator() -> StrategyGraph {
        StrategyBuilder::new("s1", "RSI dip")
            .add_node("start", NodeRole::Start)
            .with_data(NodeData::Start(StartData {
                symbol: "NIFTY".into(),
                indicators: BTreeMap::from([(
                    "RSI_a1b2".to_string(),
                    IndicatorConfig::new("RSI").with_parameter("period", 14),
                )]),
                ..StartData::default()
            }))
            .add_node("signal", NodeRole::EntrySignal)
            .with_data(NodeData::Signal(SignalData {
                conditions: GroupCondition::default().with_item(Condition::with_id(
                    "c1",
                    Expression::indicator("RSI_a1b2"),
                    ComparisonOperator::LessThan,
                    Expression::constant(30.0),
                )),
                ..SignalData::default()
            }))
            .add_node("end", NodeRole::End)
            .connect("start", "signal")
            .connect("signal", "end")
            .build()
    }

    fn first_lhs(node: &Node) -> &Expression {
        let signal = node.data.as_signal().unwrap();
        match &signal.conditions.conditions[0] {
            ConditionItem::Condition(c) => c.lhs.as_ref(),
            ConditionItem::Group(_) => panic!("expected a condition"),
        }
    }

    #[test]
    fn test_conditions_display_with_start_node_labels() {
        let graph = graph_with_indicator();
        let ctx = DisplayContext::from_nodes(&graph.nodes);
        let signal = graph.nodes[1].data.as_signal().unwrap();
        assert_eq!(signal.conditions.display(&ctx), "RSI(14) < 30");
        assert_eq!(ctx.indicator_label("MACD_x"), "MACD_x");
    }

    #[test]
    fn test_export_relabels_indicators_on_a_copy() {
        let graph = graph_with_indicator();
        let record = export_strategy(&graph.nodes, &graph.edges, "RSI dip");

        assert_eq!(record.name, "RSI dip");
        assert!(record.id.starts_with("strategy-"));
        assert_eq!(record.created, record.last_modified);
        match first_lhs(&record.nodes[1]) {
            Expression::Indicator { name, .. } => assert_eq!(name, "RSI(14)"),
            other => panic!("unexpected {:?}", other),
        }
        match first_lhs(&graph.nodes[1]) {
            Expression::Indicator { name, .. } => assert_eq!(name, "RSI_a1b2"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_keeps_ids() {
        let graph = graph_with_indicator();
        let record = export_strategy(&graph.nodes, &graph.edges, "RSI dip");
        let json = to_json(&record).unwrap();

        let imported = import_from_str(&json).unwrap();
        assert_eq!(imported.id.as_deref(), Some(record.id.as_str()));
        assert_eq!(imported.name.as_deref(), Some("RSI dip"));
        assert_eq!(imported.created, Some(record.created));
        assert_eq!(imported.graph.id_signature(), graph.id_signature());
        assert_eq!(imported.graph.nodes, record.nodes);
        assert_eq!(imported.graph.edges, record.edges);
    }

    #[test]
    fn test_record_wire_shape() {
        let graph = graph_with_indicator();
        let record = export_strategy(&graph.nodes, &graph.edges, "x");
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["lastModified"].is_string());
        assert_eq!(value["nodes"][0]["type"], "startNode");
        assert_eq!(value["nodes"][0]["position"]["x"], 0.0);
        assert_eq!(value["edges"][0]["source"], "start");
    }

    #[test]
    fn test_import_back_fills_missing_fields() {
        let imported = import_from_str(
            r#"{
                "nodes": [
                    {"id": "entry-signal-7"},
                    {"type": "endNode", "position": {"x": 5, "y": 6}},
                    {"id": "mystery", "data": {"conditions": 42}},
                    "not a node"
                ],
                "edges": [{"source": "entry-signal-7", "target": "mystery", "type": "smoothstep"}]
            }"#,
        )
        .unwrap();

        let nodes = &imported.graph.nodes;
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].role, NodeRole::EntrySignal);
        assert_eq!(nodes[0].position, CanvasPosition::default());
        assert_eq!(nodes[1].role, NodeRole::End);
        assert!(nodes[1].id.starts_with("end-"));
        assert_eq!(nodes[1].position, CanvasPosition::new(5.0, 6.0));
        assert_eq!(nodes[2].role, NodeRole::Signal);
        assert_eq!(nodes[2].data, NodeData::default_for(NodeRole::Signal));

        let edge = &imported.graph.edges[0];
        assert_eq!(edge.id, "edge-entry-signal-7-mystery");
        assert_eq!(edge.kind, EdgeKind::Default);
        assert!(imported.id.is_none());
    }

    #[test]
    fn test_import_does_not_validate() {
        let imported = import_from_str(
            r#"{"nodes": [{"id": "a", "type": "signalNode"}, {"id": "b", "type": "signalNode"}],
                "edges": [{"source": "a", "target": "b"}, {"source": "b", "target": "a"}]}"#,
        )
        .unwrap();
        assert_eq!(imported.graph.edges.len(), 2);
    }

    #[test]
    fn test_import_errors() {
        assert!(matches!(
            import_from_str("{not json").unwrap_err(),
            ImportError::InvalidJson(_)
        ));
        assert!(matches!(
            import_from_str("[]").unwrap_err(),
            ImportError::NotAnObject
        ));
        assert!(matches!(
            import_from_str(r#"{"edges": []}"#).unwrap_err(),
            ImportError::MissingArray("nodes")
        ));
        assert!(matches!(
            import_from_str(r#"{"nodes": [], "edges": {}}"#).unwrap_err(),
            ImportError::MissingArray("edges")
        ));
        assert!(matches!(
            import_from_str(r#"{"nodes": [], "edges": [{"source": "a", "target": ""}]}"#)
                .unwrap_err(),
            ImportError::MalformedEdge {
                index: 0,
                endpoint: "target"
            }
        ));
        assert!(matches!(
            import_from_path("/definitely/not/here.json").unwrap_err(),
            ImportError::Unreadable(_)
        ));
    }

    #[test]
    fn test_import_from_reader() {
        let json = br#"{"nodes": [{"id": "start", "type": "startNode"}], "edges": []}"#;
        let imported = import_from_reader(&json[..]).unwrap();
        assert_eq!(imported.graph.nodes[0].role, NodeRole::Start);
    }

    #[test]
    fn test_write_record() {
        let graph = graph_with_indicator();
        let record = export_strategy(&graph.nodes, &graph.edges, "x");
        let mut out = Vec::new();
        write_record(&record, &mut out).unwrap();
        let parsed: StrategyRecord = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_sanitize_strips_denied_keys_recursively() {
        let config = EngineConfig::default();
        let value = json!({
            "id": "n1",
            "selected": true,
            "data": {"label": "x", "measured": {"width": 10}, "items": [{"dragging": false, "k": 1}]}
        });
        let clean = sanitize_for_storage(&value, &config);
        assert_eq!(
            clean,
            json!({"id": "n1", "data": {"label": "x", "items": [{"k": 1}]}})
        );
        assert_eq!(sanitize_for_storage(&clean, &config), clean);
    }

    #[test]
    fn test_sanitize_samples_large_arrays() {
        let config = EngineConfig::default();
        let value = Value::Array(
            (0..150)
                .map(|i| json!({"i": i, "selected": true}))
                .collect(),
        );
        let Value::Array(clean) = sanitize_for_storage(&value, &config) else {
            panic!("expected array");
        };
        assert_eq!(clean.len(), 150);
        // 50 head + every 5th of the 50 middle + 50 tail
        let stripped = clean.iter().filter(|v| v.get("selected").is_none()).count();
        assert_eq!(stripped, 110);
        assert_eq!(clean[49], json!({"i": 49}));
        assert_eq!(clean[55], json!({"i": 55}));
        assert_eq!(clean[56], json!({"i": 56, "selected": true}));
        assert_eq!(clean[100], json!({"i": 100}));
        assert_eq!(clean[149], json!({"i": 149}));

        let again = sanitize_for_storage(&Value::Array(clean.clone()), &config);
        assert_eq!(again, Value::Array(clean));

        let small = Value::Array((0..100).map(|i| json!({"i": i, "dragging": true})).collect());
        let Value::Array(small_clean) = sanitize_for_storage(&small, &config) else {
            panic!("expected array");
        };
        assert!(small_clean.iter().all(|v| v.get("dragging").is_none()));
    }
}
