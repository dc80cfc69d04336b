//! Deterministic, side-effect-free condition evaluation.
//!
//! Conditions are stored the way the rule owner wrote them (raw operator and
//! aggregation strings); [`compile`] turns one into a [`CompiledCondition`]
//! or fails closed, so an unparseable rule can never fire.

use std::str::FromStr;
use tripwire_common::types::Condition;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Equal,
    NotEqual,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            ">" | "gt" => Ok(Self::GreaterThan),
            "<" | "lt" => Ok(Self::LessThan),
            ">=" | "gte" => Ok(Self::GreaterEqual),
            "<=" | "lte" => Ok(Self::LessEqual),
            "==" | "eq" => Ok(Self::Equal),
            "!=" | "ne" => Ok(Self::NotEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GreaterThan => write!(f, ">"),
            Self::LessThan => write!(f, "<"),
            Self::GreaterEqual => write!(f, ">="),
            Self::LessEqual => write!(f, "<="),
            Self::Equal => write!(f, "=="),
            Self::NotEqual => write!(f, "!="),
        }
    }
}

impl CompareOp {
    /// Literal arithmetic/equality semantics of the operator.
    ///
    /// `==` and `!=` compare floats exactly, as the rule author specified;
    /// the engine introduces no epsilon tolerance. A rule like
    /// `latest(price) == 60000` only matches a sample of exactly 60000.
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::LessThan => value < threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => value == threshold,
            Self::NotEqual => value != threshold,
        }
    }
}

/// How samples in the lookback window collapse to one observed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// The single most recent sample; the lookback window does not apply.
    Latest,
    Avg,
    Max,
    Min,
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "avg" => Ok(Self::Avg),
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            _ => Err(format!("unknown aggregation: {s}")),
        }
    }
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Avg => write!(f, "avg"),
            Self::Max => write!(f, "max"),
            Self::Min => write!(f, "min"),
        }
    }
}

/// A condition with its operator and aggregation resolved to typed values.
#[derive(Debug, Clone)]
pub struct CompiledCondition {
    pub field: String,
    pub operator: CompareOp,
    pub threshold: f64,
    pub aggregation: Aggregation,
}

impl CompiledCondition {
    /// Evaluates `observed OP threshold`. Pure; the observed value has
    /// already been aggregated per [`Aggregation`].
    pub fn satisfied(&self, observed: f64) -> bool {
        self.operator.check(observed, self.threshold)
    }
}

/// Compiles a stored condition, failing closed on anything unknown.
///
/// # Errors
///
/// Returns [`EngineError::InvalidCondition`] for an unknown operator or
/// aggregation, an empty field name, or a non-finite threshold. The caller
/// skips the rule for the tick; it never fires.
pub fn compile(condition: &Condition) -> Result<CompiledCondition> {
    let operator: CompareOp = condition
        .operator
        .parse()
        .map_err(EngineError::InvalidCondition)?;
    let aggregation: Aggregation = condition
        .aggregation
        .parse()
        .map_err(EngineError::InvalidCondition)?;
    if condition.field.is_empty() {
        return Err(EngineError::InvalidCondition(
            "condition field is empty".to_string(),
        ));
    }
    if !condition.value.is_finite() {
        return Err(EngineError::InvalidCondition(format!(
            "threshold is not a finite number: {}",
            condition.value
        )));
    }
    Ok(CompiledCondition {
        field: condition.field.clone(),
        operator,
        threshold: condition.value,
        aggregation,
    })
}
