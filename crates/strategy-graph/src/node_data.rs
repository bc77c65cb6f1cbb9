//! Role-specific node data
//!
//! Each `NodeRole` owns exactly one data shape. The wire format stores the
//! role in the node's `type` field and the data untagged, so conversion
//! always goes through the role.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::GroupCondition;
use crate::types::{ActionKind, NodeId, NodeRole};

/// Data carried by a node, one variant per role family
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Start(StartData),
    /// Shared by Signal, EntrySignal and ExitSignal
    Signal(SignalData),
    Entry(EntryData),
    Exit(ExitData),
    Modify(ModifyData),
    Alert(AlertData),
    Retry(RetryData),
    End(EndData),
    ForceEnd(ForceEndData),
}

impl NodeData {
    /// Default data for a freshly created node
    pub fn default_for(role: NodeRole) -> Self {
        match role {
            NodeRole::Start => NodeData::Start(StartData::default()),
            NodeRole::Signal | NodeRole::EntrySignal | NodeRole::ExitSignal => {
                NodeData::Signal(SignalData::default())
            }
            NodeRole::Action(ActionKind::Entry) => NodeData::Entry(EntryData::default()),
            NodeRole::Action(ActionKind::Exit) => NodeData::Exit(ExitData::default()),
            NodeRole::Action(ActionKind::Modify) => NodeData::Modify(ModifyData::default()),
            NodeRole::Action(ActionKind::Alert) => NodeData::Alert(AlertData::default()),
            NodeRole::Retry => NodeData::Retry(RetryData::default()),
            NodeRole::End => NodeData::End(EndData::default()),
            NodeRole::ForceEnd => NodeData::ForceEnd(ForceEndData::default()),
        }
    }

    /// Whether this data shape belongs to `role`
    pub fn matches_role(&self, role: NodeRole) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Self::default_for(role))
    }

    /// Decode untagged data for `role`. `null` yields the role default.
    pub fn from_value(role: NodeRole, value: Value) -> serde_json::Result<Self> {
        if value.is_null() {
            return Ok(Self::default_for(role));
        }
        let data = match role {
            NodeRole::Start => NodeData::Start(serde_json::from_value(value)?),
            NodeRole::Signal | NodeRole::EntrySignal | NodeRole::ExitSignal => {
                NodeData::Signal(serde_json::from_value(value)?)
            }
            NodeRole::Action(ActionKind::Entry) => NodeData::Entry(serde_json::from_value(value)?),
            NodeRole::Action(ActionKind::Exit) => NodeData::Exit(serde_json::from_value(value)?),
            NodeRole::Action(ActionKind::Modify) => NodeData::Modify(serde_json::from_value(value)?),
            NodeRole::Action(ActionKind::Alert) => NodeData::Alert(serde_json::from_value(value)?),
            NodeRole::Retry => NodeData::Retry(serde_json::from_value(value)?),
            NodeRole::End => NodeData::End(serde_json::from_value(value)?),
            NodeRole::ForceEnd => NodeData::ForceEnd(serde_json::from_value(value)?),
        };
        Ok(data)
    }

    /// Encode as untagged JSON
    pub fn to_value(&self) -> Value {
        let encoded = match self {
            NodeData::Start(d) => serde_json::to_value(d),
            NodeData::Signal(d) => serde_json::to_value(d),
            NodeData::Entry(d) => serde_json::to_value(d),
            NodeData::Exit(d) => serde_json::to_value(d),
            NodeData::Modify(d) => serde_json::to_value(d),
            NodeData::Alert(d) => serde_json::to_value(d),
            NodeData::Retry(d) => serde_json::to_value(d),
            NodeData::End(d) => serde_json::to_value(d),
            NodeData::ForceEnd(d) => serde_json::to_value(d),
        };
        encoded.unwrap_or_default()
    }

    /// Shallow-merge a JSON object into this data.
    ///
    /// Top-level keys of `patch` replace the matching keys; the result must
    /// still decode as the data shape for `role`.
    pub fn merge_patch(&self, role: NodeRole, patch: &Value) -> Result<Self, String> {
        let Value::Object(patch) = patch else {
            return Err("patch must be a JSON object".to_string());
        };
        let mut merged = match self.to_value() {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }
        Self::from_value(role, Value::Object(merged)).map_err(|e| e.to_string())
    }

    pub fn label(&self) -> &str {
        match self {
            NodeData::Start(d) => &d.label,
            NodeData::Signal(d) => &d.label,
            NodeData::Entry(d) => &d.label,
            NodeData::Exit(d) => &d.label,
            NodeData::Modify(d) => &d.label,
            NodeData::Alert(d) => &d.label,
            NodeData::Retry(d) => &d.label,
            NodeData::End(d) => &d.label,
            NodeData::ForceEnd(d) => &d.label,
        }
    }

    /// Position ids opened by this node
    pub fn produced_vpis(&self) -> Vec<&str> {
        match self {
            NodeData::Entry(entry) => entry.positions.iter().map(|p| p.vpi.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Position id this node modifies or closes, if any
    pub fn referenced_vpi(&self) -> Option<&str> {
        match self {
            NodeData::Modify(d) => d.target_vpi.as_deref(),
            NodeData::Exit(d) => d.target_vpi.as_deref(),
            _ => None,
        }
        .filter(|vpi| !vpi.is_empty())
    }

    /// Root condition trees owned by a signal node
    pub fn condition_roots(&self) -> Vec<&GroupCondition> {
        match self {
            NodeData::Signal(signal) => std::iter::once(&signal.conditions)
                .chain(signal.exit_conditions.as_ref())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn as_start(&self) -> Option<&StartData> {
        match self {
            NodeData::Start(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_signal(&self) -> Option<&SignalData> {
        match self {
            NodeData::Signal(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_signal_mut(&mut self) -> Option<&mut SignalData> {
        match self {
            NodeData::Signal(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_exit(&self) -> Option<&ExitData> {
        match self {
            NodeData::Exit(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_exit_mut(&mut self) -> Option<&mut ExitData> {
        match self {
            NodeData::Exit(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_retry(&self) -> Option<&RetryData> {
        match self {
            NodeData::Retry(d) => Some(d),
            _ => None,
        }
    }
}

/// A named indicator parameter, kept in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParameter {
    pub name: String,
    pub value: Value,
}

/// One entry of the Start node's indicator table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorConfig {
    /// Indicator family, e.g. `RSI`
    pub indicator_name: String,
    #[serde(default)]
    pub parameters: Vec<IndicatorParameter>,
    /// Explicit label overriding the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl IndicatorConfig {
    pub fn new(indicator_name: impl Into<String>) -> Self {
        Self {
            indicator_name: indicator_name.into(),
            ..Self::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(IndicatorParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// `RSI(14)`, `MACD(12, 26, 9)`, or the bare name without parameters
    pub fn display_label(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        if self.parameters.is_empty() {
            return self.indicator_name.clone();
        }
        let values: Vec<String> = self
            .parameters
            .iter()
            .map(|p| match &p.value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        format!("{}({})", self.indicator_name, values.join(", "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingInstrument {
    #[serde(rename = "type")]
    pub instrument_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartData {
    pub label: String,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_instrument: Option<TradingInstrument>,
    /// Indicator table keyed by raw indicator key
    pub indicators: BTreeMap<String, IndicatorConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalData {
    pub label: String,
    /// Evaluation priority among signals; lower fires first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    pub conditions: GroupCondition,
    /// Exit tree of a combined entry/exit signal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_conditions: Option<GroupCondition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderSide {
    #[default]
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    StopLoss,
    StopLimit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProductType {
    #[default]
    Intraday,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OptionType {
    Call,
    Put,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDetails {
    pub expiry: String,
    /// Strike selection such as `ATM`, `ITM1`, `OTM2`
    pub strike_type: String,
    pub option_type: OptionType,
}

/// Re-entry behaviour after a position is exited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReEntryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_re_entries")]
    pub max_re_entries: u32,
    #[serde(default = "default_group_number")]
    pub group_number: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_max_re_entries() -> u32 {
    1
}

fn default_group_number() -> u32 {
    1
}

impl Default for ReEntryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_re_entries: default_max_re_entries(),
            group_number: default_group_number(),
        }
    }
}

/// Order intent placed by an Entry node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: String,
    /// Unique position id referenced by Modify and Exit nodes
    pub vpi: String,
    /// Non-unique grouping tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpt: Option<String>,
    #[serde(default)]
    pub side: OrderSide,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default = "default_lots")]
    pub lots: u32,
    #[serde(default)]
    pub product_type: ProductType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_details: Option<OptionDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub re_entry: Option<ReEntryConfig>,
}

fn default_lots() -> u32 {
    1
}

impl Position {
    /// Market buy of one lot tagged with `vpi`
    pub fn new(vpi: impl Into<String>) -> Self {
        let vpi = vpi.into();
        Self {
            id: format!("pos-{}", vpi),
            vpi,
            vpt: None,
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            lots: default_lots(),
            product_type: ProductType::Intraday,
            limit_price: None,
            option_details: None,
            re_entry: None,
        }
    }

    pub fn with_vpt(mut self, vpt: impl Into<String>) -> Self {
        self.vpt = Some(vpt.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntryData {
    pub label: String,
    pub positions: Vec<Position>,
}

/// How much of the target position an exit closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ExitQuantity {
    #[default]
    All,
    Partial { percent: f64 },
}

/// Order configuration of an Exit node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitCondition {
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub quantity: ExitQuantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExitData {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vpi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vpt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_condition: Option<ExitCondition>,
    /// Set through `GraphStore::enable_re_entry` only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub re_entry: Option<ReEntryConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModifyData {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_vpi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_lots: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_take_profit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_limit_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertData {
    pub label: String,
    pub message: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryData {
    pub label: String,
    /// The Exit node this retry belongs to
    pub source_exit_id: NodeId,
    pub config: ReEntryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndData {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForceEndData {
    pub label: String,
    pub close_all_positions: bool,
}

impl Default for ForceEndData {
    fn default() -> Self {
        Self {
            label: String::new(),
            close_all_positions: true,
        }
    }
}
