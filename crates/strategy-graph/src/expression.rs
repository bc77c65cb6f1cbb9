//! Expression AST
//!
//! An expression is "what to compare" on either side of a condition.
//! `ComplexExpression` is the only recursive variant; its children are
//! reference counted so edits can share untouched subtrees.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node_data::NodeData;
use crate::types::Node;

/// Arithmetic applied by a complex expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComplexOperation {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
    #[serde(rename = "%")]
    Modulo,
    /// Left increased by right percent
    #[serde(rename = "+%")]
    AddPercent,
    /// Left decreased by right percent
    #[serde(rename = "-%")]
    SubtractPercent,
}

impl ComplexOperation {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComplexOperation::Add => "+",
            ComplexOperation::Subtract => "-",
            ComplexOperation::Multiply => "*",
            ComplexOperation::Divide => "/",
            ComplexOperation::Modulo => "%",
            ComplexOperation::AddPercent => "+%",
            ComplexOperation::SubtractPercent => "-%",
        }
    }
}

/// Price fields available from the bar feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarketField {
    Open,
    High,
    Low,
    #[default]
    Close,
    Volume,
    Ltp,
}

impl MarketField {
    pub fn label(&self) -> &'static str {
        match self {
            MarketField::Open => "Open",
            MarketField::High => "High",
            MarketField::Low => "Low",
            MarketField::Close => "Close",
            MarketField::Volume => "Volume",
            MarketField::Ltp => "LTP",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeFunctionKind {
    #[default]
    CurrentTime,
    DayOfWeek,
    MinutesSinceOpen,
    MinutesToClose,
    BarIndex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionField {
    #[default]
    UnrealizedPnl,
    RealizedPnl,
    EntryPrice,
    Quantity,
    BarsHeld,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyMetricKind {
    #[default]
    TotalPnl,
    RealizedPnl,
    UnrealizedPnl,
    OpenPositions,
    TradeCount,
    WinRate,
    MaxDrawdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionField {
    #[default]
    FillPrice,
    FillQuantity,
    FillTime,
    OrderStatus,
}

macro_rules! camel_label {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(serde_json::Value::String(s)) => f.write_str(&s),
                    _ => write!(f, "{:?}", self),
                }
            }
        })*
    };
}

camel_label!(TimeFunctionKind, PositionField, StrategyMetricKind, ExecutionField);

/// The nine expression variants, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpressionKind {
    Indicator,
    MarketData,
    Constant,
    TimeFunction,
    ComplexExpression,
    PositionData,
    StrategyMetric,
    ExecutionData,
    ExternalTrigger,
}

/// A value that can be compared in a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Expression {
    /// Indicator output, keyed by the Start node's indicator table
    Indicator {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameter: Option<String>,
        /// Bars of look-back, zero or negative
        #[serde(default)]
        offset: i32,
    },
    MarketData {
        #[serde(default)]
        field: MarketField,
        #[serde(default)]
        offset: i32,
    },
    Constant {
        #[serde(default)]
        value: Option<f64>,
    },
    TimeFunction {
        #[serde(default)]
        function: TimeFunctionKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
    },
    ComplexExpression {
        operation: ComplexOperation,
        left: Arc<Expression>,
        right: Arc<Expression>,
    },
    PositionData {
        #[serde(default)]
        field: PositionField,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vpi: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vpt: Option<String>,
    },
    StrategyMetric {
        #[serde(default)]
        metric: StrategyMetricKind,
    },
    ExecutionData {
        #[serde(default)]
        field: ExecutionField,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order_ref: Option<String>,
    },
    ExternalTrigger {
        #[serde(default)]
        trigger_type: String,
        #[serde(default)]
        parameters: BTreeMap<String, serde_json::Value>,
    },
}

/// Minimal valid value for an expression variant
pub fn create_default_expression(kind: ExpressionKind) -> Expression {
    match kind {
        ExpressionKind::Indicator => Expression::Indicator {
            name: String::new(),
            parameter: None,
            offset: 0,
        },
        ExpressionKind::MarketData => Expression::MarketData {
            field: MarketField::default(),
            offset: 0,
        },
        ExpressionKind::Constant => Expression::Constant { value: None },
        ExpressionKind::TimeFunction => Expression::TimeFunction {
            function: TimeFunctionKind::default(),
            parameters: None,
        },
        ExpressionKind::ComplexExpression => Expression::ComplexExpression {
            operation: ComplexOperation::Add,
            left: Arc::new(Expression::Constant { value: None }),
            right: Arc::new(Expression::Constant { value: None }),
        },
        ExpressionKind::PositionData => Expression::PositionData {
            field: PositionField::default(),
            vpi: None,
            vpt: None,
        },
        ExpressionKind::StrategyMetric => Expression::StrategyMetric {
            metric: StrategyMetricKind::default(),
        },
        ExpressionKind::ExecutionData => Expression::ExecutionData {
            field: ExecutionField::default(),
            order_ref: None,
        },
        ExpressionKind::ExternalTrigger => Expression::ExternalTrigger {
            trigger_type: String::new(),
            parameters: BTreeMap::new(),
        },
    }
}

impl Default for Expression {
    fn default() -> Self {
        create_default_expression(ExpressionKind::Constant)
    }
}

impl Expression {
    /// Constant shorthand
    pub fn constant(value: f64) -> Self {
        Expression::Constant { value: Some(value) }
    }

    /// Indicator shorthand for the current bar
    pub fn indicator(name: impl Into<String>) -> Self {
        Expression::Indicator {
            name: name.into(),
            parameter: None,
            offset: 0,
        }
    }

    /// Market field shorthand for the current bar
    pub fn market(field: MarketField) -> Self {
        Expression::MarketData { field, offset: 0 }
    }

    /// Combine two expressions
    pub fn complex(operation: ComplexOperation, left: Expression, right: Expression) -> Self {
        Expression::ComplexExpression {
            operation,
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }

    pub fn kind(&self) -> ExpressionKind {
        match self {
            Expression::Indicator { .. } => ExpressionKind::Indicator,
            Expression::MarketData { .. } => ExpressionKind::MarketData,
            Expression::Constant { .. } => ExpressionKind::Constant,
            Expression::TimeFunction { .. } => ExpressionKind::TimeFunction,
            Expression::ComplexExpression { .. } => ExpressionKind::ComplexExpression,
            Expression::PositionData { .. } => ExpressionKind::PositionData,
            Expression::StrategyMetric { .. } => ExpressionKind::StrategyMetric,
            Expression::ExecutionData { .. } => ExpressionKind::ExecutionData,
            Expression::ExternalTrigger { .. } => ExpressionKind::ExternalTrigger,
        }
    }

    /// Nesting depth; leaves are depth 1
    pub fn depth(&self) -> usize {
        match self {
            Expression::ComplexExpression { left, right, .. } => {
                1 + left.depth().max(right.depth())
            }
            _ => 1,
        }
    }

    /// Largest bar offset among the Indicator and MarketData leaves, if any
    pub fn max_offset(&self) -> Option<i32> {
        match self {
            Expression::Indicator { offset, .. } | Expression::MarketData { offset, .. } => {
                Some(*offset)
            }
            Expression::ComplexExpression { left, right, .. } => {
                match (left.max_offset(), right.max_offset()) {
                    (Some(l), Some(r)) => Some(l.max(r)),
                    (l, r) => l.or(r),
                }
            }
            _ => None,
        }
    }

    /// Rewrite indicator keys through `labels`, sharing subtrees that
    /// contain no indicator to rewrite.
    pub fn relabel_indicators(self: &Arc<Self>, labels: &HashMap<String, String>) -> Arc<Self> {
        match self.as_ref() {
            Expression::Indicator {
                name,
                parameter,
                offset,
            } => match labels.get(name) {
                Some(label) => Arc::new(Expression::Indicator {
                    name: label.clone(),
                    parameter: parameter.clone(),
                    offset: *offset,
                }),
                None => Arc::clone(self),
            },
            Expression::ComplexExpression {
                operation,
                left,
                right,
            } => {
                let new_left = left.relabel_indicators(labels);
                let new_right = right.relabel_indicators(labels);
                if Arc::ptr_eq(left, &new_left) && Arc::ptr_eq(right, &new_right) {
                    Arc::clone(self)
                } else {
                    Arc::new(Expression::ComplexExpression {
                        operation: *operation,
                        left: new_left,
                        right: new_right,
                    })
                }
            }
            _ => Arc::clone(self),
        }
    }

    /// Human-readable rendering.
    ///
    /// Returns `None` when the tree is deeper than the context allows.
    pub fn render(&self, ctx: &DisplayContext) -> Option<String> {
        self.render_at(ctx, 1)
    }

    fn render_at(&self, ctx: &DisplayContext, depth: usize) -> Option<String> {
        if depth > ctx.max_depth {
            return None;
        }
        let text = match self {
            Expression::Indicator {
                name,
                parameter,
                offset,
            } => {
                let base = if name.is_empty() {
                    "?".to_string()
                } else {
                    ctx.indicator_label(name).to_string()
                };
                let base = match parameter {
                    Some(p) => format!("{}.{}", base, p),
                    None => base,
                };
                with_offset(base, *offset)
            }
            Expression::MarketData { field, offset } => with_offset(field.label().to_string(), *offset),
            Expression::Constant { value } => match value {
                Some(v) => v.to_string(),
                None => "?".to_string(),
            },
            Expression::TimeFunction {
                function,
                parameters,
            } => match parameters {
                Some(p) => format!("{}({})", function, p),
                None => format!("{}()", function),
            },
            Expression::ComplexExpression {
                operation,
                left,
                right,
            } => format!(
                "({} {} {})",
                left.render_at(ctx, depth + 1)?,
                operation.symbol(),
                right.render_at(ctx, depth + 1)?
            ),
            Expression::PositionData { field, vpi, vpt } => {
                let target = vpi
                    .as_deref()
                    .or(vpt.as_deref())
                    .unwrap_or("*");
                format!("Position[{}].{}", target, field)
            }
            Expression::StrategyMetric { metric } => format!("Strategy.{}", metric),
            Expression::ExecutionData { field, order_ref } => match order_ref {
                Some(r) => format!("Execution[{}].{}", r, field),
                None => format!("Execution.{}", field),
            },
            Expression::ExternalTrigger { trigger_type, .. } => {
                if trigger_type.is_empty() {
                    "Trigger(?)".to_string()
                } else {
                    format!("Trigger({})", trigger_type)
                }
            }
        };
        Some(text)
    }
}

fn with_offset(base: String, offset: i32) -> String {
    if offset == 0 {
        base
    } else {
        format!("{}[{}]", base, offset)
    }
}

/// Lookup tables used when rendering expressions for display
#[derive(Debug, Clone)]
pub struct DisplayContext {
    indicator_labels: HashMap<String, String>,
    max_depth: usize,
}

impl Default for DisplayContext {
    fn default() -> Self {
        Self {
            indicator_labels: HashMap::new(),
            max_depth: crate::constants::defaults::MAX_EXPRESSION_DEPTH,
        }
    }
}

impl DisplayContext {
    pub fn new(indicator_labels: HashMap<String, String>) -> Self {
        Self {
            indicator_labels,
            ..Self::default()
        }
    }

    /// Build from the indicator tables of every Start node in `nodes`
    pub fn from_nodes(nodes: &[Node]) -> Self {
        Self::new(indicator_labels(nodes))
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Display label for an indicator key, falling back to the key itself
    pub fn indicator_label<'a>(&'a self, key: &'a str) -> &'a str {
        self.indicator_labels
            .get(key)
            .map(String::as_str)
            .unwrap_or(key)
    }
}

/// Map raw indicator keys (`RSI_a1b2`) to display labels (`RSI(14)`)
pub fn indicator_labels(nodes: &[Node]) -> HashMap<String, String> {
    nodes
        .iter()
        .filter_map(|node| match &node.data {
            NodeData::Start(start) => Some(start),
            _ => None,
        })
        .flat_map(|start| {
            start
                .indicators
                .iter()
                .map(|(key, config)| (key.clone(), config.display_label()))
        })
        .collect()
}
