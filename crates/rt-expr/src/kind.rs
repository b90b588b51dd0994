//! Expression node kinds.
//!
//! Node kinds fall into three groups:
//! - **Leaves**: constants, ambient signals (net time, cancel), sensors,
//!   inter-net channels and command state
//! - **Operators**: unary/binary arithmetic and logic, conditional selection
//! - **Temporal**: rising edge detection, sample timestamps, measurement age

use rt_core::{DataType, Value};
use serde::{Deserialize, Serialize};

use crate::error::{ExprError, ExprResult};
use crate::sensor::SensorRef;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Abs,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Not => "Not",
            UnaryOp::Negate => "Negate",
            UnaryOp::Abs => "Abs",
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Subtract,
    Multiply,
    Divide,
    Less,
    Greater,
    Equals,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Add => "Add",
            BinaryOp::Subtract => "Subtract",
            BinaryOp::Multiply => "Multiply",
            BinaryOp::Divide => "Divide",
            BinaryOp::Less => "Less",
            BinaryOp::Greater => "Greater",
            BinaryOp::Equals => "Equals",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinaryOp::Less | BinaryOp::Greater | BinaryOp::Equals)
    }
}

/// Kind of an expression node. Operands are stored on the node itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExprKind {
    /// Statically known value.
    Constant { value: Value },

    /// Monotonic time since the net started, in seconds.
    NetTime,

    /// True once the owning command has been asked to cancel.
    Cancel,

    /// Device sensor channel.
    Sensor { sensor: SensorRef },

    /// Value read from a named inter-net channel.
    Netcomm { key: String, ty: DataType },

    Unary { op: UnaryOp },

    Binary { op: BinaryOp },

    /// `operands = [condition, then, else]`
    Conditional,

    /// True for exactly one cycle when the boolean operand becomes true.
    RisingEdge,

    /// Sample time of the operand's current value.
    Timestamp,

    /// Age of the operand's current value (`NetTime - Timestamp`).
    Age,

    /// Named state of the owning command (e.g. `"completed"`), provided by
    /// the command's action mapping.
    CommandState { state: String },
}

impl ExprKind {
    /// Runtime variant name, used in diagnostics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            ExprKind::Constant { .. } => "Constant",
            ExprKind::NetTime => "NetTime",
            ExprKind::Cancel => "Cancel",
            ExprKind::Sensor { .. } => "Sensor",
            ExprKind::Netcomm { .. } => "Netcomm",
            ExprKind::Unary { op } => op.name(),
            ExprKind::Binary { op } => op.name(),
            ExprKind::Conditional => "Conditional",
            ExprKind::RisingEdge => "RisingEdge",
            ExprKind::Timestamp => "Timestamp",
            ExprKind::Age => "Age",
            ExprKind::CommandState { .. } => "CommandState",
        }
    }

    /// Number of operands this kind takes.
    pub fn arity(&self) -> usize {
        match self {
            ExprKind::Constant { .. }
            | ExprKind::NetTime
            | ExprKind::Cancel
            | ExprKind::Sensor { .. }
            | ExprKind::Netcomm { .. }
            | ExprKind::CommandState { .. } => 0,
            ExprKind::Unary { .. } | ExprKind::RisingEdge | ExprKind::Timestamp | ExprKind::Age => 1,
            ExprKind::Binary { .. } => 2,
            ExprKind::Conditional => 3,
        }
    }

    /// Kinds whose meaning depends on the command they are compiled for.
    /// Unscoped nodes of these kinds are rebound to the compiling command.
    pub fn is_scope_sensitive(&self) -> bool {
        matches!(self, ExprKind::Cancel | ExprKind::CommandState { .. })
    }

    /// Check operand types and compute the node's result type.
    pub fn result_type(&self, operands: &[DataType]) -> ExprResult<DataType> {
        let kind = self.variant_name();
        if operands.len() != self.arity() {
            return Err(ExprError::Arity {
                kind,
                expected: self.arity(),
                found: operands.len(),
            });
        }
        let expect = |index: usize, ok: bool, expected: &'static str| {
            if ok {
                Ok(())
            } else {
                Err(ExprError::OperandType {
                    kind,
                    index,
                    expected,
                    found: operands[index],
                })
            }
        };

        match self {
            ExprKind::Constant { value } => Ok(value.data_type()),
            ExprKind::NetTime => Ok(DataType::Double),
            ExprKind::Cancel | ExprKind::CommandState { .. } => Ok(DataType::Bool),
            ExprKind::Sensor { sensor } => Ok(sensor.ty),
            ExprKind::Netcomm { ty, .. } => Ok(*ty),
            ExprKind::Unary { op: UnaryOp::Not } | ExprKind::RisingEdge => {
                expect(0, operands[0] == DataType::Bool, "Bool")?;
                Ok(DataType::Bool)
            }
            ExprKind::Unary { .. } => {
                expect(0, operands[0].is_numeric(), "numeric")?;
                Ok(DataType::Double)
            }
            ExprKind::Binary { op } if op.is_logical() => {
                expect(0, operands[0] == DataType::Bool, "Bool")?;
                expect(1, operands[1] == DataType::Bool, "Bool")?;
                Ok(DataType::Bool)
            }
            ExprKind::Binary { op } => {
                expect(0, operands[0].is_numeric(), "numeric")?;
                expect(1, operands[1].is_numeric(), "numeric")?;
                Ok(if op.is_comparison() {
                    DataType::Bool
                } else {
                    DataType::Double
                })
            }
            ExprKind::Conditional => {
                expect(0, operands[0] == DataType::Bool, "Bool")?;
                let then_ty = operands[1];
                let else_ty = operands[2];
                if then_ty == else_ty {
                    Ok(then_ty)
                } else if then_ty.is_numeric() && else_ty.is_numeric() {
                    Ok(DataType::Double)
                } else {
                    Err(ExprError::OperandType {
                        kind,
                        index: 2,
                        expected: "the then-branch type",
                        found: else_ty,
                    })
                }
            }
            ExprKind::Timestamp | ExprKind::Age => Ok(DataType::Double),
        }
    }

    /// Statically evaluate the node if all operand values are known.
    ///
    /// Returns `None` for kinds that vary over time or when evaluation is not
    /// defined (e.g. division by zero).
    pub fn fold(&self, operands: &[Value]) -> Option<Value> {
        match self {
            ExprKind::Constant { value } => Some(value.clone()),
            ExprKind::Unary { op } => {
                let a = operands.first()?;
                match op {
                    UnaryOp::Not => Some(Value::Bool(!a.as_bool().ok()?)),
                    UnaryOp::Negate => Some(Value::Double(-a.as_f64().ok()?)),
                    UnaryOp::Abs => Some(Value::Double(a.as_f64().ok()?.abs())),
                }
            }
            ExprKind::Binary { op } => {
                let (a, b) = (operands.first()?, operands.get(1)?);
                if op.is_logical() {
                    let (a, b) = (a.as_bool().ok()?, b.as_bool().ok()?);
                    return Some(Value::Bool(match op {
                        BinaryOp::And => a && b,
                        _ => a || b,
                    }));
                }
                let (a, b) = (a.as_f64().ok()?, b.as_f64().ok()?);
                match op {
                    BinaryOp::Add => Some(Value::Double(a + b)),
                    BinaryOp::Subtract => Some(Value::Double(a - b)),
                    BinaryOp::Multiply => Some(Value::Double(a * b)),
                    BinaryOp::Divide if b != 0.0 => Some(Value::Double(a / b)),
                    BinaryOp::Divide => None,
                    BinaryOp::Less => Some(Value::Bool(a < b)),
                    BinaryOp::Greater => Some(Value::Bool(a > b)),
                    BinaryOp::Equals => Some(Value::Bool(a == b)),
                    BinaryOp::And | BinaryOp::Or => None,
                }
            }
            ExprKind::Conditional => {
                let cond = operands.first()?.as_bool().ok()?;
                let chosen = if cond { operands.get(1)? } else { operands.get(2)? };
                Some(chosen.clone())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_yields_bool() {
        let kind = ExprKind::Binary {
            op: BinaryOp::Greater,
        };
        let ty = kind
            .result_type(&[DataType::Double, DataType::Int])
            .unwrap();
        assert_eq!(ty, DataType::Bool);
    }

    #[test]
    fn logic_rejects_numeric_operand() {
        let kind = ExprKind::Binary { op: BinaryOp::And };
        let err = kind
            .result_type(&[DataType::Bool, DataType::Double])
            .unwrap_err();
        assert!(matches!(err, ExprError::OperandType { index: 1, .. }));
    }

    #[test]
    fn arity_is_checked() {
        let err = ExprKind::Conditional
            .result_type(&[DataType::Bool])
            .unwrap_err();
        assert!(matches!(
            err,
            ExprError::Arity {
                expected: 3,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn fold_arithmetic_and_logic() {
        let add = ExprKind::Binary { op: BinaryOp::Add };
        assert_eq!(
            add.fold(&[Value::Double(1.5), Value::Int(2)]),
            Some(Value::Double(3.5))
        );
        let not = ExprKind::Unary { op: UnaryOp::Not };
        assert_eq!(not.fold(&[Value::Bool(true)]), Some(Value::Bool(false)));
    }

    #[test]
    fn fold_refuses_division_by_zero() {
        let div = ExprKind::Binary {
            op: BinaryOp::Divide,
        };
        assert_eq!(div.fold(&[Value::Double(1.0), Value::Double(0.0)]), None);
    }

    #[test]
    fn temporal_kinds_never_fold() {
        assert_eq!(ExprKind::RisingEdge.fold(&[Value::Bool(true)]), None);
        assert_eq!(ExprKind::NetTime.fold(&[]), None);
    }
}
