//! Core primitive catalogue.
//!
//! The compiler emits primitives identified by `Core::<Type><Op>` type ids.
//! Each catalogue entry knows its typed ports so fragment builders can create
//! them and engines can interpret them. Drivers and actions may emit type ids
//! outside this catalogue; those primitives get whatever ports the emitter
//! declares.

use rt_core::DataType;
use rt_expr::{BinaryOp, UnaryOp};

/// Conventional port names.
pub mod ports {
    pub const VALUE_IN: &str = "inValue";
    pub const FIRST_IN: &str = "inFirst";
    pub const SECOND_IN: &str = "inSecond";
    pub const CONDITION_IN: &str = "inCondition";
    pub const TRUE_IN: &str = "inTrue";
    pub const FALSE_IN: &str = "inFalse";
    pub const TIME_IN: &str = "inTime";
    pub const ACTIVE_IN: &str = "inActive";
    pub const VALUE_OUT: &str = "outValue";
    pub const TIME_OUT: &str = "outTime";
}

/// Conventional parameter names.
pub mod params {
    pub const VALUE: &str = "Value";
    pub const KEY: &str = "Key";
}

const TYPES: [DataType; 4] = [
    DataType::Doubles,
    DataType::Bool,
    DataType::Double,
    DataType::Int,
];

/// A primitive from the core catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorePrimitive {
    /// Seconds since the net started.
    NetTime,
    /// Cancel request flag of the net.
    Cancel,
    Unary(UnaryOp),
    Binary(BinaryOp),
    IntToDouble,
    RisingEdge,
    /// Ends the net when its input is true.
    Terminate,
    /// Constant from the `Value` parameter.
    Value(DataType),
    Conditional(DataType),
    /// True on cycles where the input differs from the previous cycle.
    ChangeDetect(DataType),
    /// Forwards `inTime` on cycles where `inValue` is present.
    Timestamp(DataType),
    /// Reads the inter-net channel named by `Key`.
    NetcommIn(DataType),
    /// Writes the inter-net channel named by `Key`.
    NetcommOut(DataType),
    /// Reports `inActive`/`inValue` to the client under `Key`.
    Monitor(DataType),
}

impl CorePrimitive {
    /// Net-description type id.
    pub fn type_id(&self) -> String {
        match self {
            CorePrimitive::NetTime => "Core::NetTime".to_string(),
            CorePrimitive::Cancel => "Core::Cancel".to_string(),
            CorePrimitive::Unary(op) => {
                format!("Core::{}{}", unary_type(*op).primitive_prefix(), op.name())
            }
            CorePrimitive::Binary(op) => {
                format!("Core::{}{}", binary_input(*op).primitive_prefix(), op.name())
            }
            CorePrimitive::IntToDouble => "Core::IntToDouble".to_string(),
            CorePrimitive::RisingEdge => "Core::BooleanRisingEdge".to_string(),
            CorePrimitive::Terminate => "Core::Terminate".to_string(),
            CorePrimitive::Value(ty) => format!("Core::{}Value", ty.primitive_prefix()),
            CorePrimitive::Conditional(ty) => format!("Core::{}Conditional", ty.primitive_prefix()),
            CorePrimitive::ChangeDetect(ty) => {
                format!("Core::{}ChangeDetect", ty.primitive_prefix())
            }
            CorePrimitive::Timestamp(ty) => format!("Core::{}Timestamp", ty.primitive_prefix()),
            CorePrimitive::NetcommIn(ty) => format!("Core::{}NetcommIn", ty.primitive_prefix()),
            CorePrimitive::NetcommOut(ty) => format!("Core::{}NetcommOut", ty.primitive_prefix()),
            CorePrimitive::Monitor(ty) => format!("Core::{}Monitor", ty.primitive_prefix()),
        }
    }

    /// Parse a type id back into a catalogue entry.
    pub fn parse(type_id: &str) -> Option<Self> {
        let rest = type_id.strip_prefix("Core::")?;
        match rest {
            "NetTime" => return Some(CorePrimitive::NetTime),
            "Cancel" => return Some(CorePrimitive::Cancel),
            "IntToDouble" => return Some(CorePrimitive::IntToDouble),
            "BooleanRisingEdge" => return Some(CorePrimitive::RisingEdge),
            "Terminate" => return Some(CorePrimitive::Terminate),
            _ => {}
        }
        for op in [UnaryOp::Not, UnaryOp::Negate, UnaryOp::Abs] {
            if rest == format!("{}{}", unary_type(op).primitive_prefix(), op.name()) {
                return Some(CorePrimitive::Unary(op));
            }
        }
        for op in [
            BinaryOp::And,
            BinaryOp::Or,
            BinaryOp::Add,
            BinaryOp::Subtract,
            BinaryOp::Multiply,
            BinaryOp::Divide,
            BinaryOp::Less,
            BinaryOp::Greater,
            BinaryOp::Equals,
        ] {
            if rest == format!("{}{}", binary_input(op).primitive_prefix(), op.name()) {
                return Some(CorePrimitive::Binary(op));
            }
        }
        // DoubleArray is listed before Double so the longer prefix wins.
        let (ty, op) = TYPES.iter().find_map(|ty| {
            rest.strip_prefix(ty.primitive_prefix())
                .map(|op| (*ty, op))
        })?;
        match op {
            "Value" => Some(CorePrimitive::Value(ty)),
            "Conditional" => Some(CorePrimitive::Conditional(ty)),
            "ChangeDetect" => Some(CorePrimitive::ChangeDetect(ty)),
            "Timestamp" => Some(CorePrimitive::Timestamp(ty)),
            "NetcommIn" => Some(CorePrimitive::NetcommIn(ty)),
            "NetcommOut" => Some(CorePrimitive::NetcommOut(ty)),
            "Monitor" => Some(CorePrimitive::Monitor(ty)),
            _ => None,
        }
    }

    /// Input ports in declaration order.
    pub fn inputs(&self) -> Vec<(&'static str, DataType)> {
        use ports::*;
        match self {
            CorePrimitive::NetTime
            | CorePrimitive::Cancel
            | CorePrimitive::Value(_)
            | CorePrimitive::NetcommIn(_) => vec![],
            CorePrimitive::Unary(op) => vec![(VALUE_IN, unary_type(*op))],
            CorePrimitive::Binary(op) => {
                let ty = binary_input(*op);
                vec![(FIRST_IN, ty), (SECOND_IN, ty)]
            }
            CorePrimitive::IntToDouble => vec![(VALUE_IN, DataType::Int)],
            CorePrimitive::RisingEdge | CorePrimitive::Terminate => {
                vec![(VALUE_IN, DataType::Bool)]
            }
            CorePrimitive::Conditional(ty) => vec![
                (CONDITION_IN, DataType::Bool),
                (TRUE_IN, *ty),
                (FALSE_IN, *ty),
            ],
            CorePrimitive::ChangeDetect(ty) | CorePrimitive::NetcommOut(ty) => {
                vec![(VALUE_IN, *ty)]
            }
            CorePrimitive::Timestamp(ty) => vec![(VALUE_IN, *ty), (TIME_IN, DataType::Double)],
            CorePrimitive::Monitor(ty) => vec![(ACTIVE_IN, DataType::Bool), (VALUE_IN, *ty)],
        }
    }

    /// Output ports in declaration order.
    pub fn outputs(&self) -> Vec<(&'static str, DataType)> {
        use ports::VALUE_OUT;
        match self {
            CorePrimitive::NetTime | CorePrimitive::Timestamp(_) | CorePrimitive::IntToDouble => {
                vec![(VALUE_OUT, DataType::Double)]
            }
            CorePrimitive::Cancel | CorePrimitive::RisingEdge | CorePrimitive::ChangeDetect(_) => {
                vec![(VALUE_OUT, DataType::Bool)]
            }
            CorePrimitive::Unary(op) => vec![(VALUE_OUT, unary_type(*op))],
            CorePrimitive::Binary(op) => {
                let ty = if op.is_comparison() || op.is_logical() {
                    DataType::Bool
                } else {
                    DataType::Double
                };
                vec![(VALUE_OUT, ty)]
            }
            CorePrimitive::Value(ty)
            | CorePrimitive::Conditional(ty)
            | CorePrimitive::NetcommIn(ty) => vec![(VALUE_OUT, *ty)],
            CorePrimitive::Terminate | CorePrimitive::NetcommOut(_) | CorePrimitive::Monitor(_) => {
                vec![]
            }
        }
    }
}

fn unary_type(op: UnaryOp) -> DataType {
    match op {
        UnaryOp::Not => DataType::Bool,
        UnaryOp::Negate | UnaryOp::Abs => DataType::Double,
    }
}

fn binary_input(op: BinaryOp) -> DataType {
    if op.is_logical() {
        DataType::Bool
    } else {
        DataType::Double
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ids_round_trip() {
        let all = [
            CorePrimitive::NetTime,
            CorePrimitive::Cancel,
            CorePrimitive::Unary(UnaryOp::Not),
            CorePrimitive::Unary(UnaryOp::Abs),
            CorePrimitive::Binary(BinaryOp::Add),
            CorePrimitive::Binary(BinaryOp::Or),
            CorePrimitive::Binary(BinaryOp::Greater),
            CorePrimitive::IntToDouble,
            CorePrimitive::RisingEdge,
            CorePrimitive::Terminate,
            CorePrimitive::Value(DataType::Doubles),
            CorePrimitive::Value(DataType::Double),
            CorePrimitive::Conditional(DataType::Bool),
            CorePrimitive::ChangeDetect(DataType::Int),
            CorePrimitive::Timestamp(DataType::Double),
            CorePrimitive::NetcommIn(DataType::Bool),
            CorePrimitive::NetcommOut(DataType::Double),
            CorePrimitive::Monitor(DataType::Bool),
        ];
        for p in all {
            assert_eq!(CorePrimitive::parse(&p.type_id()), Some(p), "{}", p.type_id());
        }
    }

    #[test]
    fn binary_type_ids_follow_operand_type() {
        assert_eq!(
            CorePrimitive::Binary(BinaryOp::And).type_id(),
            "Core::BooleanAnd"
        );
        assert_eq!(
            CorePrimitive::Binary(BinaryOp::Less).type_id(),
            "Core::DoubleLess"
        );
    }

    #[test]
    fn unknown_type_ids_do_not_parse() {
        assert_eq!(CorePrimitive::parse("Arm::JointPosition"), None);
        assert_eq!(CorePrimitive::parse("Core::DoubleFrobnicate"), None);
    }

    #[test]
    fn comparison_outputs_bool() {
        let outs = CorePrimitive::Binary(BinaryOp::Greater).outputs();
        assert_eq!(outs, vec![(ports::VALUE_OUT, DataType::Bool)]);
    }
}
