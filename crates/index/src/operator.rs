//! Index operator trees
//!
//! Lookups against the skiplist index are expressed as a boolean tree over
//! relation comparisons. Callers build the tree with raw JSON operand
//! lists; [`fill_lookup_operator`] converts the operands into canonical
//! [`KeyValue`]s in place before the tree is evaluated, and validates the
//! IN-specific operand format.

use crate::key::KeyValue;
use serde_json::Value;
use tracing::warn;
use vellum_core::{Error, Result};

/// Relation operators usable in a tree leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationOp {
    /// Equality on a field prefix
    Eq,
    /// Negated equality
    Ne,
    /// Strictly less than
    Lt,
    /// Less than or equal
    Le,
    /// Strictly greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Per-field membership in operand lists
    In,
}

/// A boolean tree over relation comparisons
#[derive(Debug, Clone)]
pub enum IndexOperator {
    /// Both subtrees must match
    And(Box<IndexOperator>, Box<IndexOperator>),
    /// Either subtree may match
    Or(Box<IndexOperator>, Box<IndexOperator>),
    /// The subtree must not match
    Not(Box<IndexOperator>),
    /// A relation leaf
    Relation {
        /// The comparison to apply
        op: RelationOp,
        /// Raw JSON operand list, as supplied by the caller
        parameters: Value,
        /// Canonical operands, produced by [`fill_lookup_operator`]
        fields: Vec<KeyValue>,
    },
}

impl IndexOperator {
    /// Build an unfilled relation leaf
    pub fn relation(op: RelationOp, parameters: Value) -> Self {
        IndexOperator::Relation {
            op,
            parameters,
            fields: Vec::new(),
        }
    }
}

/// Convert every relation leaf's JSON operands into canonical key values
///
/// Plain relations expect a JSON list of operand values, one per indexed
/// field prefix. The IN relation expects a list of lists whose lengths are
/// non-increasing; a violation is a format error, not a miss.
pub fn fill_lookup_operator(operator: &mut IndexOperator) -> Result<()> {
    match operator {
        IndexOperator::And(left, right) | IndexOperator::Or(left, right) => {
            fill_lookup_operator(left)?;
            fill_lookup_operator(right)
        }
        IndexOperator::Not(inner) => fill_lookup_operator(inner),
        IndexOperator::Relation {
            op,
            parameters,
            fields,
        } => {
            let Value::Array(params) = parameters else {
                warn!("lookup operator parameters are not a list");
                return Err(Error::Internal(
                    "lookup operator parameters must be a list".into(),
                ));
            };

            if *op == RelationOp::In {
                let mut previous_len: Option<usize> = None;
                for param in params.iter() {
                    let Value::Array(entries) = param else {
                        warn!("IN operand is not a list");
                        return Err(Error::Internal("IN operands must be lists".into()));
                    };
                    if let Some(prev) = previous_len {
                        if entries.len() > prev {
                            warn!("IN operand lengths are increasing");
                            return Err(Error::Internal(
                                "IN operand lengths must be non-increasing".into(),
                            ));
                        }
                    }
                    previous_len = Some(entries.len());
                }
            }

            *fields = params.iter().map(KeyValue::from).collect();
            Ok(())
        }
    }
}
