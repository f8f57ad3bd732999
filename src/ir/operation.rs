//! Typed operation trees attached to basic blocks.
use std::fmt;

use super::symbols::{MethodRef, SymbolRef, TypeRef};

/// Identifies an operation within one [`ControlFlowGraph`](super::ControlFlowGraph).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("%{_0}")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct OperationId(u32);

impl OperationId {
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }
}

/// Identifies a flow capture, i.e. a compiler-introduced temporary holding an
/// intermediate value across basic blocks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    derive_more::Display,
)]
#[display("capture#{_0}")]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct CaptureId(u32);

/// A compile-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Constant {
    /// The null reference.
    #[display("null")]
    Null,
    /// A boolean.
    #[display("{_0}")]
    Bool(bool),
    /// An integer.
    #[display("{_0}")]
    Int(i64),
    /// A string.
    #[display("{_0:?}")]
    Str(String),
}

impl Constant {
    /// Returns the value of a boolean constant.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value of an integer constant.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum UnaryOperator {
    /// Logical negation.
    #[display("!")]
    Not,
    /// Arithmetic negation.
    #[display("-")]
    Minus,
    /// Unary plus.
    #[display("+")]
    Plus,
    /// Bitwise complement.
    #[display("~")]
    BitwiseNegation,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum BinaryOperator {
    /// Addition.
    #[display("+")]
    Add,
    /// Subtraction.
    #[display("-")]
    Subtract,
    /// Multiplication.
    #[display("*")]
    Multiply,
    /// Division.
    #[display("/")]
    Divide,
    /// Remainder.
    #[display("%")]
    Remainder,
    /// Bitwise or logical and.
    #[display("&")]
    And,
    /// Bitwise or logical or.
    #[display("|")]
    Or,
    /// Exclusive or.
    #[display("^")]
    ExclusiveOr,
    /// Equality.
    #[display("==")]
    Equals,
    /// Inequality.
    #[display("!=")]
    NotEquals,
    /// Less than.
    #[display("<")]
    LessThan,
    /// Less than or equal.
    #[display("<=")]
    LessThanOrEqual,
    /// Greater than.
    #[display(">")]
    GreaterThan,
    /// Greater than or equal.
    #[display(">=")]
    GreaterThanOrEqual,
}

impl BinaryOperator {
    /// Whether the operator is `==` or `!=`.
    #[must_use]
    pub const fn is_equality(self) -> bool {
        matches!(self, Self::Equals | Self::NotEquals)
    }
}

/// What an instance reference refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceReferenceKind {
    /// `this` in an instance member.
    ContainingTypeInstance,
    /// The object being initialized by an enclosing object or collection initializer.
    ImplicitReceiver,
}

/// The shape of an operation.
///
/// Child operations are referenced by [`OperationId`] and are always created
/// before their parents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// A literal; its value is the operation's constant.
    Literal,
    /// The default value of the operation's type.
    DefaultValue,
    /// A read or write of a local.
    LocalReference {
        /// The local.
        local: SymbolRef,
        /// Whether this is the declaration of the local.
        is_declaration: bool,
    },
    /// A read or write of a parameter.
    ParameterReference {
        /// The parameter.
        parameter: SymbolRef,
    },
    /// `this` or the implicit receiver of an initializer.
    InstanceReference {
        /// What the reference refers to.
        kind: InstanceReferenceKind,
    },
    /// A field access.
    FieldReference {
        /// The field.
        field: SymbolRef,
        /// The receiver; `None` for static fields.
        instance: Option<OperationId>,
    },
    /// A property or indexer access.
    PropertyReference {
        /// The property.
        property: SymbolRef,
        /// The receiver; `None` for static properties.
        instance: Option<OperationId>,
        /// Indexer arguments.
        arguments: Vec<OperationId>,
    },
    /// An event access.
    EventReference {
        /// The event.
        event: SymbolRef,
        /// The receiver; `None` for static events.
        instance: Option<OperationId>,
    },
    /// An array element access.
    ArrayElementReference {
        /// The array.
        array: OperationId,
        /// The index expressions.
        indices: Vec<OperationId>,
    },
    /// A late-bound member access.
    DynamicMemberReference {
        /// The receiver.
        instance: Option<OperationId>,
    },
    /// A reference to a method group, e.g. the target of a delegate creation.
    MethodReference {
        /// The method.
        method: MethodRef,
        /// The receiver.
        instance: Option<OperationId>,
    },
    /// Stores a value into a flow capture.
    FlowCapture {
        /// The capture.
        id: CaptureId,
        /// The captured value.
        value: OperationId,
    },
    /// Reads a flow capture.
    FlowCaptureReference {
        /// The capture.
        id: CaptureId,
    },
    /// `target = value`, or `target = ref value` if `is_ref` is set.
    SimpleAssignment {
        /// The assigned reference.
        target: OperationId,
        /// The assigned value.
        value: OperationId,
        /// Whether this binds a reference rather than copying a value.
        is_ref: bool,
    },
    /// `target op= value`.
    CompoundAssignment {
        /// The assigned reference.
        target: OperationId,
        /// The right operand.
        value: OperationId,
        /// The operator.
        operator: BinaryOperator,
    },
    /// `target++` or `target--`.
    Increment {
        /// The incremented reference.
        target: OperationId,
        /// Whether this is a decrement.
        is_decrement: bool,
    },
    /// `(a, b) = value`.
    DeconstructionAssignment {
        /// A [`OperationKind::Tuple`] of references.
        target: OperationId,
        /// The deconstructed value.
        value: OperationId,
    },
    /// A tuple literal.
    Tuple {
        /// The elements.
        elements: Vec<OperationId>,
    },
    /// `new T[n]` or `new T[] { ... }`.
    ArrayCreation {
        /// The dimension sizes.
        dimensions: Vec<OperationId>,
        /// The initializer.
        initializer: Option<OperationId>,
    },
    /// `{ a, b, c }` in an array creation.
    ArrayInitializer {
        /// The elements.
        elements: Vec<OperationId>,
    },
    /// `new T(args) { initializer }`.
    ObjectCreation {
        /// The constructor.
        constructor: Option<MethodRef>,
        /// The arguments.
        arguments: Vec<OperationId>,
        /// The initializer.
        initializer: Option<OperationId>,
    },
    /// `{ A = 1, B = 2 }` in an object creation.
    ObjectOrCollectionInitializer {
        /// The member initializers.
        initializers: Vec<OperationId>,
    },
    /// A method call.
    Invocation {
        /// The target method.
        method: MethodRef,
        /// The receiver; for delegate invocations the delegate.
        instance: Option<OperationId>,
        /// The arguments.
        arguments: Vec<OperationId>,
    },
    /// An argument of an invocation or creation.
    Argument {
        /// The matching parameter.
        parameter: Option<SymbolRef>,
        /// The argument value.
        value: OperationId,
    },
    /// A type conversion.
    Conversion {
        /// The converted value.
        operand: OperationId,
        /// A user-defined conversion operator.
        operator_method: Option<MethodRef>,
    },
    /// `(operand)`.
    Parenthesized {
        /// The inner operation.
        operand: OperationId,
    },
    /// A unary operation.
    Unary {
        /// The operator.
        operator: UnaryOperator,
        /// The operand.
        operand: OperationId,
        /// A user-defined operator.
        operator_method: Option<MethodRef>,
    },
    /// A binary operation.
    Binary {
        /// The operator.
        operator: BinaryOperator,
        /// The left operand.
        left: OperationId,
        /// The right operand.
        right: OperationId,
        /// A user-defined operator.
        operator_method: Option<MethodRef>,
    },
    /// `operand == null`, introduced when lowering `?.` and `??`.
    IsNull {
        /// The tested value.
        operand: OperationId,
    },
    /// `operand is T`.
    IsType {
        /// The tested value.
        operand: OperationId,
        /// The tested type.
        target_type: TypeRef,
        /// Whether this is `is not T`.
        is_negated: bool,
    },
    /// A lambda expression.
    AnonymousFunction {
        /// The lambda symbol.
        method: MethodRef,
    },
    /// Creates a delegate from a lambda or a method group.
    DelegateCreation {
        /// The lambda or method reference.
        target: OperationId,
    },
    /// The exception caught by the enclosing catch region.
    CaughtException,
    /// A throw expression.
    Throw {
        /// The thrown value.
        exception: Option<OperationId>,
    },
    /// Any operation the engine does not interpret.
    Other {
        /// The children, in evaluation order.
        children: Vec<OperationId>,
    },
}

impl OperationKind {
    /// Returns the child operations in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<OperationId> {
        match self {
            Self::Literal
            | Self::DefaultValue
            | Self::LocalReference { .. }
            | Self::ParameterReference { .. }
            | Self::InstanceReference { .. }
            | Self::FlowCaptureReference { .. }
            | Self::AnonymousFunction { .. }
            | Self::CaughtException => Vec::new(),
            Self::FieldReference { instance, .. }
            | Self::EventReference { instance, .. }
            | Self::DynamicMemberReference { instance }
            | Self::MethodReference { instance, .. } => instance.iter().copied().collect(),
            Self::PropertyReference {
                instance,
                arguments,
                ..
            } => instance.iter().chain(arguments).copied().collect(),
            Self::ArrayElementReference { array, indices } => {
                std::iter::once(*array).chain(indices.iter().copied()).collect()
            }
            Self::FlowCapture { value, .. } => vec![*value],
            Self::SimpleAssignment { target, value, .. }
            | Self::CompoundAssignment { target, value, .. }
            | Self::DeconstructionAssignment { target, value } => vec![*target, *value],
            Self::Increment { target, .. } => vec![*target],
            Self::Tuple { elements } | Self::ArrayInitializer { elements } => elements.clone(),
            Self::ArrayCreation {
                dimensions,
                initializer,
            } => dimensions.iter().chain(initializer).copied().collect(),
            Self::ObjectCreation {
                arguments,
                initializer,
                ..
            } => arguments.iter().chain(initializer).copied().collect(),
            Self::ObjectOrCollectionInitializer { initializers } => initializers.clone(),
            Self::Invocation {
                instance,
                arguments,
                ..
            } => instance.iter().chain(arguments).copied().collect(),
            Self::Argument { value, .. } => vec![*value],
            Self::Conversion { operand, .. }
            | Self::Parenthesized { operand }
            | Self::Unary { operand, .. }
            | Self::IsNull { operand }
            | Self::IsType { operand, .. } => vec![*operand],
            Self::Binary { left, right, .. } => vec![*left, *right],
            Self::DelegateCreation { target } => vec![*target],
            Self::Throw { exception } => exception.iter().copied().collect(),
            Self::Other { children } => children.clone(),
        }
    }

    /// Whether the operation designates a storage location that may be assigned to.
    #[must_use]
    pub const fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::LocalReference { .. }
                | Self::ParameterReference { .. }
                | Self::InstanceReference { .. }
                | Self::FieldReference { .. }
                | Self::PropertyReference { .. }
                | Self::EventReference { .. }
                | Self::ArrayElementReference { .. }
                | Self::FlowCaptureReference { .. }
        )
    }
}

/// A node of an operation tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Operation {
    /// The shape of the operation.
    pub kind: OperationKind,
    /// The static type of the operation's value; `None` for `void`.
    pub ty: Option<TypeRef>,
    /// The constant value, if the operation is a compile-time constant.
    pub constant: Option<Constant>,
    /// The enclosing operation; `None` for statements.
    pub parent: Option<OperationId>,
    /// Whether the operation was synthesized by the compiler.
    pub is_implicit: bool,
}

impl Operation {
    /// Creates a non-constant operation.
    #[must_use]
    pub const fn new(kind: OperationKind, ty: Option<TypeRef>) -> Self {
        Self {
            kind,
            ty,
            constant: None,
            parent: None,
            is_implicit: false,
        }
    }

    /// Creates a literal.
    #[must_use]
    pub const fn literal(constant: Constant, ty: Option<TypeRef>) -> Self {
        Self {
            kind: OperationKind::Literal,
            ty,
            constant: Some(constant),
            parent: None,
            is_implicit: false,
        }
    }

    /// Marks the operation as compiler-generated.
    #[must_use]
    pub const fn into_implicit(mut self) -> Self {
        self.is_implicit = true;
        self
    }

    /// Whether the operation is the `null` literal.
    #[must_use]
    pub const fn is_null_literal(&self) -> bool {
        matches!(self.constant, Some(Constant::Null))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(constant) = &self.constant {
            return write!(f, "{constant}");
        }
        match &self.kind {
            OperationKind::LocalReference { local, .. } => write!(f, "local {local}"),
            OperationKind::ParameterReference { parameter } => write!(f, "param {parameter}"),
            OperationKind::InstanceReference { .. } => write!(f, "this"),
            OperationKind::FieldReference { field, .. } => write!(f, "field {field}"),
            OperationKind::Invocation { method, .. } => write!(f, "call {method}"),
            OperationKind::FlowCapture { id, .. } => write!(f, "{id} ="),
            OperationKind::FlowCaptureReference { id } => write!(f, "{id}"),
            other => {
                let name = format!("{other:?}");
                let name = name.split([' ', '{', '(']).next().unwrap_or_default();
                write!(f, "{name}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_in_evaluation_order() {
        let kind = OperationKind::Invocation {
            method: MethodRef::from(0),
            instance: Some(OperationId::from(3)),
            arguments: vec![OperationId::from(1), OperationId::from(2)],
        };
        assert_eq!(
            kind.children(),
            vec![
                OperationId::from(3),
                OperationId::from(1),
                OperationId::from(2)
            ]
        );
    }

    #[test]
    fn display() {
        let op = Operation::literal(Constant::Int(42), None);
        assert_eq!(op.to_string(), "42");
        let op = Operation::new(
            OperationKind::Binary {
                operator: BinaryOperator::Add,
                left: OperationId::from(0),
                right: OperationId::from(1),
                operator_method: None,
            },
            None,
        );
        assert_eq!(op.to_string(), "Binary");
        assert_eq!(Constant::Str("a".to_owned()).to_string(), "\"a\"");
    }

    #[test]
    fn references() {
        assert!(
            OperationKind::FieldReference {
                field: SymbolRef::from(0),
                instance: None
            }
            .is_reference()
        );
        assert!(!OperationKind::Literal.is_reference());
    }
}
