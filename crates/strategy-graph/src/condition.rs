//! Condition trees
//!
//! A signal decides "when it's true" through a nested AND/OR tree of
//! comparisons. Edits never mutate in place: each mutator returns a new
//! root that shares every untouched subtree with the old one, so callers
//! can detect changes with `Arc::ptr_eq` instead of deep comparison.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::INVALID_CONDITION_TEXT;
use crate::error::AstError;
use crate::expression::{DisplayContext, Expression};

/// Comparison between the two sides of a condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[default]
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupLogic {
    #[default]
    And,
    Or,
}

impl fmt::Display for GroupLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupLogic::And => f.write_str("AND"),
            GroupLogic::Or => f.write_str("OR"),
        }
    }
}

/// Which child of a condition or complex expression to descend into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprSlot {
    Lhs,
    Rhs,
    Left,
    Right,
}

/// A single comparison `lhs operator rhs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    pub lhs: Arc<Expression>,
    pub rhs: Arc<Expression>,
    #[serde(default)]
    pub operator: ComparisonOperator,
}

impl Condition {
    /// New condition with a generated id
    pub fn new(lhs: Expression, operator: ComparisonOperator, rhs: Expression) -> Self {
        Self::with_id(format!("cond-{}", uuid::Uuid::new_v4()), lhs, operator, rhs)
    }

    pub fn with_id(
        id: impl Into<String>,
        lhs: Expression,
        operator: ComparisonOperator,
        rhs: Expression,
    ) -> Self {
        Self {
            id: id.into(),
            lhs: Arc::new(lhs),
            rhs: Arc::new(rhs),
            operator,
        }
    }

    /// Deepest expression on either side
    pub fn depth(&self) -> usize {
        self.lhs.depth().max(self.rhs.depth())
    }

    /// Largest bar offset on either side
    pub fn max_offset(&self) -> Option<i32> {
        match (self.lhs.max_offset(), self.rhs.max_offset()) {
            (Some(l), Some(r)) => Some(l.max(r)),
            (l, r) => l.or(r),
        }
    }

    /// Copy of this condition with the expression at `path` replaced
    fn with_expression(&self, path: &[ExprSlot], expr: Expression) -> Result<Self, AstError> {
        let (first, rest) = path.split_first().ok_or(AstError::InvalidPath(0))?;
        let mut updated = self.clone();
        match first {
            ExprSlot::Lhs => updated.lhs = replace_in(&self.lhs, rest, expr, 1)?,
            ExprSlot::Rhs => updated.rhs = replace_in(&self.rhs, rest, expr, 1)?,
            ExprSlot::Left | ExprSlot::Right => return Err(AstError::InvalidPath(0)),
        }
        Ok(updated)
    }

    fn try_render(&self, ctx: &DisplayContext) -> Option<String> {
        Some(format!(
            "{} {} {}",
            self.lhs.render(ctx)?,
            self.operator.symbol(),
            self.rhs.render(ctx)?
        ))
    }

    /// Single-line rendering, never fails
    pub fn display(&self, ctx: &DisplayContext) -> String {
        self.try_render(ctx)
            .unwrap_or_else(|| INVALID_CONDITION_TEXT.to_string())
    }
}

fn replace_in(
    current: &Arc<Expression>,
    path: &[ExprSlot],
    expr: Expression,
    step: usize,
) -> Result<Arc<Expression>, AstError> {
    let Some((slot, rest)) = path.split_first() else {
        return Ok(Arc::new(expr));
    };
    match (current.as_ref(), slot) {
        (
            Expression::ComplexExpression {
                operation,
                left,
                right,
            },
            ExprSlot::Left,
        ) => Ok(Arc::new(Expression::ComplexExpression {
            operation: *operation,
            left: replace_in(left, rest, expr, step + 1)?,
            right: Arc::clone(right),
        })),
        (
            Expression::ComplexExpression {
                operation,
                left,
                right,
            },
            ExprSlot::Right,
        ) => Ok(Arc::new(Expression::ComplexExpression {
            operation: *operation,
            left: Arc::clone(left),
            right: replace_in(right, rest, expr, step + 1)?,
        })),
        _ => Err(AstError::InvalidPath(step)),
    }
}

/// Either a leaf comparison or a nested group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionItem {
    Group(Arc<GroupCondition>),
    Condition(Arc<Condition>),
}

impl ConditionItem {
    pub fn id(&self) -> &str {
        match self {
            ConditionItem::Group(group) => &group.id,
            ConditionItem::Condition(condition) => &condition.id,
        }
    }

    /// Whether both items share the same allocation
    pub fn ptr_eq(&self, other: &ConditionItem) -> bool {
        match (self, other) {
            (ConditionItem::Group(a), ConditionItem::Group(b)) => Arc::ptr_eq(a, b),
            (ConditionItem::Condition(a), ConditionItem::Condition(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn try_render(&self, ctx: &DisplayContext, nested: bool) -> Option<String> {
        match self {
            ConditionItem::Condition(condition) => condition.try_render(ctx),
            ConditionItem::Group(group) => group.try_render(ctx, nested),
        }
    }

    /// Single-line rendering, never fails
    pub fn display(&self, ctx: &DisplayContext) -> String {
        self.try_render(ctx, false)
            .unwrap_or_else(|| INVALID_CONDITION_TEXT.to_string())
    }
}

impl From<Condition> for ConditionItem {
    fn from(condition: Condition) -> Self {
        ConditionItem::Condition(Arc::new(condition))
    }
}

impl From<GroupCondition> for ConditionItem {
    fn from(group: GroupCondition) -> Self {
        ConditionItem::Group(Arc::new(group))
    }
}

/// A boolean AND/OR node of the condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCondition {
    pub id: String,
    pub group_logic: GroupLogic,
    #[serde(default)]
    pub conditions: Vec<ConditionItem>,
}

impl Default for GroupCondition {
    fn default() -> Self {
        Self::with_id("root", GroupLogic::And)
    }
}

impl GroupCondition {
    /// Empty group with a generated id
    pub fn new(group_logic: GroupLogic) -> Self {
        Self::with_id(format!("group-{}", uuid::Uuid::new_v4()), group_logic)
    }

    pub fn with_id(id: impl Into<String>, group_logic: GroupLogic) -> Self {
        Self {
            id: id.into(),
            group_logic,
            conditions: Vec::new(),
        }
    }

    /// Builder-style append
    pub fn with_item(mut self, item: impl Into<ConditionItem>) -> Self {
        self.conditions.push(item.into());
        self
    }

    fn with_conditions(&self, conditions: Vec<ConditionItem>) -> Self {
        Self {
            id: self.id.clone(),
            group_logic: self.group_logic,
            conditions,
        }
    }

    /// Number of leaf comparisons anywhere in the tree
    pub fn leaf_count(&self) -> usize {
        self.conditions
            .iter()
            .map(|item| match item {
                ConditionItem::Condition(_) => 1,
                ConditionItem::Group(group) => group.leaf_count(),
            })
            .sum()
    }

    /// All leaf comparisons in depth-first order
    pub fn leaves(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        for item in &self.conditions {
            match item {
                ConditionItem::Condition(condition) => out.push(condition),
                ConditionItem::Group(group) => group.collect_leaves(out),
            }
        }
    }

    /// Deepest expression anywhere in the tree
    pub fn max_expression_depth(&self) -> usize {
        self.leaves().iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    /// Largest bar offset anywhere in the tree
    pub fn max_offset(&self) -> Option<i32> {
        self.leaves().iter().filter_map(|c| c.max_offset()).max()
    }

    /// Find a leaf comparison by id
    pub fn find_condition(&self, id: &str) -> Option<&Condition> {
        self.leaves().into_iter().find(|c| c.id == id)
    }

    /// Replace the expression at `path` inside condition `condition_id`.
    ///
    /// `path` starts with `Lhs` or `Rhs` and continues with `Left`/`Right`
    /// through complex expressions.
    pub fn replace_expression(
        &self,
        condition_id: &str,
        path: &[ExprSlot],
        expr: Expression,
        max_depth: usize,
    ) -> Result<Self, AstError> {
        self.edit_item(condition_id, |item| match item {
            ConditionItem::Condition(condition) => {
                let updated = condition.with_expression(path, expr)?;
                let depth = updated.depth();
                if depth > max_depth {
                    return Err(AstError::DepthExceeded {
                        depth,
                        max: max_depth,
                    });
                }
                if let Some(offset) = updated.max_offset().filter(|o| *o > 0) {
                    return Err(AstError::PositiveOffset(offset));
                }
                Ok(Some(updated.into()))
            }
            ConditionItem::Group(_) => Err(AstError::ConditionNotFound(condition_id.to_string())),
        })
    }

    /// Change the operator of condition `condition_id`
    pub fn set_operator(
        &self,
        condition_id: &str,
        operator: ComparisonOperator,
    ) -> Result<Self, AstError> {
        self.edit_item(condition_id, |item| match item {
            ConditionItem::Condition(condition) => {
                let mut updated = condition.as_ref().clone();
                updated.operator = operator;
                Ok(Some(updated.into()))
            }
            ConditionItem::Group(_) => Err(AstError::ConditionNotFound(condition_id.to_string())),
        })
    }

    /// Replace a condition or nested group by id
    pub fn replace_item(&self, id: &str, replacement: ConditionItem) -> Result<Self, AstError> {
        self.edit_item(id, |_| Ok(Some(replacement)))
    }

    /// Remove a condition or nested group by id
    pub fn remove_item(&self, id: &str) -> Result<Self, AstError> {
        self.edit_item(id, |_| Ok(None))
    }

    /// Append `item` to the group `group_id` (which may be this root)
    pub fn insert_item(&self, group_id: &str, item: ConditionItem) -> Result<Self, AstError> {
        self.edit_group(group_id, |group| {
            let mut conditions = group.conditions.clone();
            conditions.push(item);
            Ok(group.with_conditions(conditions))
        })
    }

    /// Change the AND/OR logic of group `group_id` (which may be this root)
    pub fn set_group_logic(&self, group_id: &str, logic: GroupLogic) -> Result<Self, AstError> {
        self.edit_group(group_id, |group| {
            let mut updated = group.clone();
            updated.group_logic = logic;
            Ok(updated)
        })
    }

    /// Rewrite indicator keys through `labels`, sharing unchanged subtrees
    pub fn relabel_indicators(&self, labels: &HashMap<String, String>) -> Self {
        let conditions = self
            .conditions
            .iter()
            .map(|item| match item {
                ConditionItem::Condition(condition) => {
                    let lhs = condition.lhs.relabel_indicators(labels);
                    let rhs = condition.rhs.relabel_indicators(labels);
                    if Arc::ptr_eq(&lhs, &condition.lhs) && Arc::ptr_eq(&rhs, &condition.rhs) {
                        item.clone()
                    } else {
                        ConditionItem::Condition(Arc::new(Condition {
                            id: condition.id.clone(),
                            lhs,
                            rhs,
                            operator: condition.operator,
                        }))
                    }
                }
                ConditionItem::Group(group) => {
                    let relabelled = group.relabel_indicators(labels);
                    let unchanged = relabelled
                        .conditions
                        .iter()
                        .zip(&group.conditions)
                        .all(|(new, old)| new.ptr_eq(old));
                    if unchanged {
                        item.clone()
                    } else {
                        ConditionItem::Group(Arc::new(relabelled))
                    }
                }
            })
            .collect();
        self.with_conditions(conditions)
    }

    fn edit_group<F>(&self, group_id: &str, f: F) -> Result<Self, AstError>
    where
        F: FnOnce(&GroupCondition) -> Result<GroupCondition, AstError>,
    {
        if self.id == group_id {
            return f(self);
        }
        self.edit_item(group_id, |item| match item {
            ConditionItem::Group(group) => Ok(Some(f(group)?.into())),
            ConditionItem::Condition(_) => Err(AstError::GroupNotFound(group_id.to_string())),
        })
        .map_err(|e| match e {
            AstError::ConditionNotFound(id) => AstError::GroupNotFound(id),
            other => other,
        })
    }

    /// Apply `f` to the item with `id`; `Ok(None)` from `f` removes it.
    fn edit_item<F>(&self, id: &str, f: F) -> Result<Self, AstError>
    where
        F: FnOnce(&ConditionItem) -> Result<Option<ConditionItem>, AstError>,
    {
        let mut f = Some(f);
        self.edit_item_inner(id, &mut f)?
            .ok_or_else(|| AstError::ConditionNotFound(id.to_string()))
    }

    fn edit_item_inner<F>(&self, id: &str, f: &mut Option<F>) -> Result<Option<Self>, AstError>
    where
        F: FnOnce(&ConditionItem) -> Result<Option<ConditionItem>, AstError>,
    {
        for (index, item) in self.conditions.iter().enumerate() {
            if item.id() == id {
                let Some(edit) = f.take() else {
                    return Ok(None);
                };
                let mut conditions = self.conditions.clone();
                match edit(item)? {
                    Some(replacement) => conditions[index] = replacement,
                    None => {
                        conditions.remove(index);
                    }
                }
                return Ok(Some(self.with_conditions(conditions)));
            }
            if let ConditionItem::Group(child) = item {
                if let Some(updated) = child.edit_item_inner(id, f)? {
                    let mut conditions = self.conditions.clone();
                    conditions[index] = updated.into();
                    return Ok(Some(self.with_conditions(conditions)));
                }
            }
        }
        Ok(None)
    }

    fn try_render(&self, ctx: &DisplayContext, nested: bool) -> Option<String> {
        match self.conditions.as_slice() {
            [] => None,
            [only] => only.try_render(ctx, nested),
            items => {
                let parts = items
                    .iter()
                    .map(|item| item.try_render(ctx, true))
                    .collect::<Option<Vec<_>>>()?;
                let joined = parts.join(&format!(" {} ", self.group_logic));
                Some(if nested {
                    format!("({})", joined)
                } else {
                    joined
                })
            }
        }
    }

    /// Single-line rendering of the whole tree, never fails
    pub fn display(&self, ctx: &DisplayContext) -> String {
        self.try_render(ctx, false)
            .unwrap_or_else(|| INVALID_CONDITION_TEXT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{ComplexOperation, MarketField};

    fn rsi_below(id: &str, level: f64) -> Condition {
        Condition::with_id(
            id,
            Expression::indicator("RSI_a1b2"),
            ComparisonOperator::LessThan,
            Expression::constant(level),
        )
    }

    fn sample_tree() -> GroupCondition {
        let inner = GroupCondition::with_id("inner", GroupLogic::Or)
            .with_item(rsi_below("c2", 20.0))
            .with_item(Condition::with_id(
                "c3",
                Expression::market(MarketField::Close),
                ComparisonOperator::GreaterThan,
                Expression::complex(
                    ComplexOperation::AddPercent,
                    Expression::market(MarketField::Open),
                    Expression::constant(1.0),
                ),
            ));
        GroupCondition::with_id("root", GroupLogic::And)
            .with_item(rsi_below("c1", 30.0))
            .with_item(inner)
    }

    fn ctx() -> DisplayContext {
        DisplayContext::new(HashMap::from([(
            "RSI_a1b2".to_string(),
            "RSI(14)".to_string(),
        )]))
    }

    #[test]
    fn test_display_nested_tree() {
        assert_eq!(
            sample_tree().display(&ctx()),
            "RSI(14) < 30 AND (RSI(14) < 20 OR Close > (Open +% 1))"
        );
    }

    #[test]
    fn test_display_falls_back_on_empty_group() {
        let tree = GroupCondition::default();
        assert_eq!(tree.display(&ctx()), INVALID_CONDITION_TEXT);

        let with_empty_child = GroupCondition::default()
            .with_item(rsi_below("c1", 30.0))
            .with_item(GroupCondition::with_id("empty", GroupLogic::Or));
        assert_eq!(with_empty_child.display(&ctx()), INVALID_CONDITION_TEXT);
    }

    #[test]
    fn test_wire_format_distinguishes_groups() {
        let json = serde_json::to_value(sample_tree()).unwrap();
        assert_eq!(json["groupLogic"], "AND");
        assert_eq!(json["conditions"][0]["operator"], "<");
        assert_eq!(json["conditions"][1]["groupLogic"], "OR");

        let restored: GroupCondition = serde_json::from_value(json).unwrap();
        assert!(matches!(restored.conditions[0], ConditionItem::Condition(_)));
        assert!(matches!(restored.conditions[1], ConditionItem::Group(_)));
        assert_eq!(restored, sample_tree());
    }

    #[test]
    fn test_replace_expression_shares_untouched_subtrees() {
        let tree = sample_tree();
        let updated = tree
            .replace_expression(
                "c3",
                &[ExprSlot::Rhs, ExprSlot::Right],
                Expression::constant(2.0),
                32,
            )
            .unwrap();

        // Sibling condition is the same allocation
        let (ConditionItem::Condition(old_c1), ConditionItem::Condition(new_c1)) =
            (&tree.conditions[0], &updated.conditions[0])
        else {
            panic!("Expected leaf conditions");
        };
        assert!(Arc::ptr_eq(old_c1, new_c1));

        let old_c3 = tree.find_condition("c3").unwrap();
        let new_c3 = updated.find_condition("c3").unwrap();
        assert!(Arc::ptr_eq(&old_c3.lhs, &new_c3.lhs));
        match new_c3.rhs.as_ref() {
            Expression::ComplexExpression { left, right, .. } => {
                assert_eq!(right.as_ref(), &Expression::constant(2.0));
                let Expression::ComplexExpression { left: old_left, .. } = old_c3.rhs.as_ref()
                else {
                    panic!("Expected complex expression");
                };
                assert!(Arc::ptr_eq(left, old_left));
            }
            other => panic!("Expected complex expression, got {:?}", other),
        }

        // Original untouched
        assert_eq!(tree, sample_tree());
    }

    #[test]
    fn test_replace_expression_invalid_path() {
        let tree = sample_tree();
        let err = tree
            .replace_expression("c1", &[ExprSlot::Lhs, ExprSlot::Left], Expression::constant(1.0), 32)
            .unwrap_err();
        assert_eq!(err, AstError::InvalidPath(1));

        let err = tree
            .replace_expression("c1", &[], Expression::constant(1.0), 32)
            .unwrap_err();
        assert_eq!(err, AstError::InvalidPath(0));

        let err = tree
            .replace_expression("nope", &[ExprSlot::Lhs], Expression::constant(1.0), 32)
            .unwrap_err();
        assert_eq!(err, AstError::ConditionNotFound("nope".into()));
    }

    #[test]
    fn test_replace_expression_enforces_depth() {
        let mut deep = Expression::constant(1.0);
        for _ in 0..4 {
            deep = Expression::complex(ComplexOperation::Add, deep, Expression::constant(1.0));
        }
        let err = sample_tree()
            .replace_expression("c1", &[ExprSlot::Rhs], deep, 4)
            .unwrap_err();
        assert_eq!(err, AstError::DepthExceeded { depth: 5, max: 4 });
    }

    #[test]
    fn test_insert_and_remove_items() {
        let tree = sample_tree();
        let added = tree
            .insert_item("inner", rsi_below("c4", 10.0).into())
            .unwrap();
        assert_eq!(added.leaf_count(), 4);

        let added_root = tree.insert_item("root", rsi_below("c5", 5.0).into()).unwrap();
        assert_eq!(added_root.conditions.len(), 3);

        let removed = added.remove_item("inner").unwrap();
        assert_eq!(removed.leaf_count(), 1);

        assert_eq!(
            tree.insert_item("c1", rsi_below("x", 1.0).into()).unwrap_err(),
            AstError::GroupNotFound("c1".into())
        );
    }

    #[test]
    fn test_set_operator_and_logic() {
        let tree = sample_tree()
            .set_operator("c2", ComparisonOperator::GreaterOrEqual)
            .unwrap()
            .set_group_logic("inner", GroupLogic::And)
            .unwrap();
        assert_eq!(
            tree.display(&ctx()),
            "RSI(14) < 30 AND (RSI(14) >= 20 AND Close > (Open +% 1))"
        );
    }

    #[test]
    fn test_relabel_indicators() {
        let labels = HashMap::from([("RSI_a1b2".to_string(), "RSI(14)".to_string())]);
        let relabeled = sample_tree().relabel_indicators(&labels);
        let c1 = relabeled.find_condition("c1").unwrap();
        assert_eq!(c1.lhs.as_ref(), &Expression::indicator("RSI(14)"));
        assert_eq!(relabeled.leaf_count(), 3);
    }

    #[test]
    fn test_relabel_shares_groups_without_indicators() {
        let prices = GroupCondition::with_id("prices", GroupLogic::Or).with_item(Condition::with_id(
            "c3",
            Expression::market(MarketField::Close),
            ComparisonOperator::GreaterThan,
            Expression::market(MarketField::Open),
        ));
        let tree = GroupCondition::with_id("root", GroupLogic::And)
            .with_item(rsi_below("c1", 30.0))
            .with_item(prices);
        let labels = HashMap::from([("RSI_a1b2".to_string(), "RSI(14)".to_string())]);

        let relabeled = tree.relabel_indicators(&labels);
        assert!(!relabeled.conditions[0].ptr_eq(&tree.conditions[0]));
        assert!(relabeled.conditions[1].ptr_eq(&tree.conditions[1]));
    }

    #[test]
    fn test_replace_expression_rejects_look_ahead() {
        let err = sample_tree()
            .replace_expression(
                "c1",
                &[ExprSlot::Rhs],
                Expression::MarketData {
                    field: MarketField::Close,
                    offset: 5,
                },
                32,
            )
            .unwrap_err();
        assert_eq!(err, AstError::PositiveOffset(5));

        let tree = sample_tree()
            .replace_expression(
                "c1",
                &[ExprSlot::Rhs],
                Expression::MarketData {
                    field: MarketField::Close,
                    offset: -2,
                },
                32,
            )
            .unwrap();
        assert_eq!(tree.max_offset(), Some(0));
    }

    #[test]
    fn test_max_expression_depth() {
        assert_eq!(sample_tree().max_expression_depth(), 2);
        assert_eq!(GroupCondition::default().max_expression_depth(), 0);
    }
}
