use std::sync::Arc;

use crate::{
    analysis::{
        AnalysisContext, DataFlowAnalysis, EntityId, Refinement,
        domain::{FlatValue, LatticeDomain},
        result::PredicateValueKind,
    },
    ir::{
        CfgBuilder, CfgId, Constant, ControlFlowGraph, Operation, OperationId, OperationKind,
        Program, SymbolRef, SymbolTable, TypeRef,
        operation::BinaryOperator,
        symbols::{Symbol, SymbolKind, TypeInfo, TypeKind},
    },
};

static DOMAIN: LatticeDomain<FlatValue<i64>> = LatticeDomain::new();

/// Propagates integer constants through the tracked entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub(crate) struct ConstantPropagation;

impl DataFlowAnalysis for ConstantPropagation {
    const NAME: &'static str = "constant-propagation";

    type Key = EntityId;
    type Value = FlatValue<i64>;
    type Domain = LatticeDomain<FlatValue<i64>>;

    fn domain(&self) -> &Self::Domain {
        &DOMAIN
    }

    fn value_for_constant(&self, constant: &Constant, _: Option<TypeRef>) -> Self::Value {
        constant.as_int().map_or(FlatValue::Top, FlatValue::Value)
    }

    fn value_for_operation(&self, operation: &Operation, operands: &[Self::Value]) -> Self::Value {
        let OperationKind::Binary { operator, .. } = operation.kind else {
            return FlatValue::Top;
        };
        let [FlatValue::Value(left), FlatValue::Value(right)] = operands else {
            return FlatValue::Top;
        };
        let result = match operator {
            BinaryOperator::Add => left.checked_add(*right),
            BinaryOperator::Subtract => left.checked_sub(*right),
            BinaryOperator::Multiply => left.checked_mul(*right),
            _ => None,
        };
        result.map_or(FlatValue::Top, FlatValue::Value)
    }

    fn refine_equality(
        &self,
        left: &Self::Value,
        right: &Self::Value,
        equals: bool,
        _: bool,
    ) -> Refinement<Self::Value> {
        match (left, right) {
            (FlatValue::Value(a), FlatValue::Value(b)) => Refinement::of_kind(if (a == b) == equals {
                PredicateValueKind::AlwaysTrue
            } else {
                PredicateValueKind::AlwaysFalse
            }),
            (FlatValue::Value(_), FlatValue::Top) if equals => Refinement {
                right: Some(left.clone()),
                ..Refinement::unknown()
            },
            (FlatValue::Top, FlatValue::Value(_)) if equals => Refinement {
                left: Some(right.clone()),
                ..Refinement::unknown()
            },
            _ => Refinement::unknown(),
        }
    }
}

/// A symbol table with an integer type and a class.
#[derive(Debug)]
pub(crate) struct Fixture {
    pub symbols: SymbolTable,
    pub int: TypeRef,
    pub class: TypeRef,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let mut symbols = SymbolTable::new();
        let int = symbols.add_type(TypeInfo::new("int", TypeKind::Integral));
        let object = symbols.well_known().object;
        let class = symbols.add_type(TypeInfo::new("Node", TypeKind::Class).with_base(object));
        Self {
            symbols,
            int,
            class,
        }
    }

    pub(crate) fn local(&mut self, name: &str, ty: TypeRef) -> SymbolRef {
        self.symbols
            .add_symbol(Symbol::new(name, SymbolKind::Local, ty))
    }

    pub(crate) fn field(&mut self, name: &str, ty: TypeRef) -> SymbolRef {
        self.symbols
            .add_symbol(Symbol::new(name, SymbolKind::Field, ty))
    }
}

/// Builds `x = value; return x;` over locals of the fixture.
pub(crate) fn assign_and_return(
    fixture: &mut Fixture,
    value: i64,
) -> (ControlFlowGraph, SymbolRef, OperationId) {
    let x = fixture.local("x", fixture.int);
    let mut builder = CfgBuilder::new(CfgId::from(0));
    for _ in 0..3 {
        builder.add_block();
    }
    let target = builder.add_operation(Operation::new(
        OperationKind::LocalReference {
            local: x,
            is_declaration: false,
        },
        Some(fixture.int),
    ));
    let literal = builder.add_operation(Operation::literal(Constant::Int(value), Some(fixture.int)));
    let assignment = builder.add_operation(Operation::new(
        OperationKind::SimpleAssignment {
            target,
            value: literal,
            is_ref: false,
        },
        Some(fixture.int),
    ));
    let read = builder.add_operation(Operation::new(
        OperationKind::LocalReference {
            local: x,
            is_declaration: false,
        },
        Some(fixture.int),
    ));
    builder.fall_through(0, 1);
    builder.push_statement(1, assignment);
    builder.return_value(1, Some(read));
    let cfg = builder.build().expect("valid graph");
    (cfg, x, read)
}

/// Wraps a graph into a context of a program made of the fixture's symbols.
pub(crate) fn context(fixture: Fixture, cfg: ControlFlowGraph) -> AnalysisContext<ConstantPropagation> {
    let program = Arc::new(Program::new(fixture.symbols));
    AnalysisContext::new(program, Arc::new(cfg))
}
