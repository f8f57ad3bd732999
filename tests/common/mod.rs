#![allow(dead_code)]

use std::{rc::Rc, sync::Arc};

use cortado::{
    analysis::{
        AnalysisConfig, AnalysisContext, AnalysisData, AnalysisSession, DataFlowAnalysis,
        DataFlowAnalysisResult,
        EntityId, PredicateValueKind, Refinement,
        domain::{FlatValue, LatticeDomain},
        run,
    },
    ir::{
        CfgBuilder, CfgId, Constant, ControlFlowGraph, MethodRef, Operation, OperationId,
        OperationKind, Program, SymbolRef, SymbolTable, TypeRef,
        operation::BinaryOperator,
        symbols::{MethodInfo, RefKind, Symbol, SymbolKind, TypeInfo, TypeKind},
    },
};

pub static DOMAIN: LatticeDomain<FlatValue<i64>> = LatticeDomain::new();

/// Integer constant propagation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Constants;

impl DataFlowAnalysis for Constants {
    const NAME: &'static str = "constants";

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

/// Symbols shared by the bodies of a test.
#[derive(Debug)]
pub struct Fixture {
    pub symbols: SymbolTable,
    pub int: TypeRef,
    pub boolean: TypeRef,
    pub class: TypeRef,
    pub structure: TypeRef,
}

impl Fixture {
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        let object = symbols.well_known().object;
        let boolean = symbols.well_known().boolean;
        let int = symbols.add_type(TypeInfo::new("int", TypeKind::Integral));
        let class = symbols.add_type(TypeInfo::new("Node", TypeKind::Class).with_base(object));
        let structure = symbols.add_type(TypeInfo::new("Point", TypeKind::Struct));
        Self {
            symbols,
            int,
            boolean,
            class,
            structure,
        }
    }

    pub fn local(&mut self, name: &str, ty: TypeRef) -> SymbolRef {
        self.symbols
            .add_symbol(Symbol::new(name, SymbolKind::Local, ty))
    }

    pub fn parameter(
        &mut self,
        name: &str,
        ordinal: usize,
        ty: TypeRef,
        ref_kind: RefKind,
    ) -> SymbolRef {
        self.symbols
            .add_symbol(Symbol::new(name, SymbolKind::Parameter { ordinal, ref_kind }, ty))
    }

    pub fn field(&mut self, name: &str, ty: TypeRef) -> SymbolRef {
        self.symbols
            .add_symbol(Symbol::new(name, SymbolKind::Field, ty))
    }

    pub fn method(&mut self, info: MethodInfo) -> MethodRef {
        self.symbols.add_method(info)
    }

    pub fn program(
        self,
        bodies: impl IntoIterator<Item = (MethodRef, ControlFlowGraph)>,
    ) -> Arc<Program> {
        let mut program = Program::new(self.symbols);
        for (method, cfg) in bodies {
            program.add_body(method, cfg);
        }
        Arc::new(program)
    }
}

/// A graph under construction with shorthands for common operations.
#[derive(Debug)]
pub struct Body {
    pub builder: CfgBuilder,
    int: TypeRef,
    boolean: TypeRef,
}

impl Body {
    /// Creates a graph with `blocks` blocks, the last one being the exit.
    pub fn new(id: u32, fixture: &Fixture, blocks: usize) -> Self {
        let mut builder = CfgBuilder::new(CfgId::from(id));
        for _ in 0..blocks {
            builder.add_block();
        }
        Self {
            builder,
            int: fixture.int,
            boolean: fixture.boolean,
        }
    }

    pub fn op(&mut self, kind: OperationKind, ty: Option<TypeRef>) -> OperationId {
        self.builder.add_operation(Operation::new(kind, ty))
    }

    pub fn int(&mut self, value: i64) -> OperationId {
        self.builder
            .add_operation(Operation::literal(Constant::Int(value), Some(self.int)))
    }

    pub fn null(&mut self, ty: TypeRef) -> OperationId {
        self.builder
            .add_operation(Operation::literal(Constant::Null, Some(ty)))
    }

    pub fn local(&mut self, local: SymbolRef, ty: TypeRef) -> OperationId {
        self.op(
            OperationKind::LocalReference {
                local,
                is_declaration: false,
            },
            Some(ty),
        )
    }

    pub fn parameter(&mut self, parameter: SymbolRef, ty: TypeRef) -> OperationId {
        self.op(OperationKind::ParameterReference { parameter }, Some(ty))
    }

    pub fn field(&mut self, field: SymbolRef, instance: OperationId, ty: TypeRef) -> OperationId {
        self.op(
            OperationKind::FieldReference {
                field,
                instance: Some(instance),
            },
            Some(ty),
        )
    }

    pub fn binary(
        &mut self,
        operator: BinaryOperator,
        left: OperationId,
        right: OperationId,
    ) -> OperationId {
        let ty = if operator.is_equality() {
            self.boolean
        } else {
            self.int
        };
        self.op(
            OperationKind::Binary {
                operator,
                left,
                right,
                operator_method: None,
            },
            Some(ty),
        )
    }

    /// A boolean the engine knows nothing about.
    pub fn unknown_condition(&mut self) -> OperationId {
        self.op(
            OperationKind::Other {
                children: Vec::new(),
            },
            Some(self.boolean),
        )
    }

    pub fn new_object(&mut self, ty: TypeRef) -> OperationId {
        self.op(
            OperationKind::ObjectCreation {
                constructor: None,
                arguments: Vec::new(),
                initializer: None,
            },
            Some(ty),
        )
    }

    /// Appends `target = value` to a block.
    pub fn assign(&mut self, block: usize, target: OperationId, value: OperationId) -> OperationId {
        let assignment = self.op(
            OperationKind::SimpleAssignment {
                target,
                value,
                is_ref: false,
            },
            None,
        );
        self.builder.push_statement(block, assignment);
        assignment
    }

    /// Appends `local = value` to a block.
    pub fn set(&mut self, block: usize, local: SymbolRef, value: i64) -> OperationId {
        let target = self.local(local, self.int);
        let value = self.int(value);
        self.assign(block, target, value)
    }

    /// Appends `local = local + value` to a block.
    pub fn add(&mut self, block: usize, local: SymbolRef, value: i64) -> OperationId {
        let target = self.local(local, self.int);
        let read = self.local(local, self.int);
        let value = self.int(value);
        let sum = self.binary(BinaryOperator::Add, read, value);
        self.assign(block, target, sum)
    }

    /// Creates a call passing each argument by position.
    pub fn call(
        &mut self,
        method: MethodRef,
        instance: Option<OperationId>,
        arguments: Vec<OperationId>,
        ty: Option<TypeRef>,
    ) -> OperationId {
        let arguments = arguments
            .into_iter()
            .map(|value| {
                self.op(
                    OperationKind::Argument {
                        parameter: None,
                        value,
                    },
                    None,
                )
            })
            .collect();
        self.op(
            OperationKind::Invocation {
                method,
                instance,
                arguments,
            },
            ty,
        )
    }

    /// Makes a block return `local`, returning the read operation.
    pub fn return_local(&mut self, block: usize, local: SymbolRef) -> OperationId {
        let read = self.local(local, self.int);
        self.builder.return_value(block, Some(read));
        read
    }

    pub fn build(self) -> ControlFlowGraph {
        self.builder.build().expect("valid graph")
    }
}

/// Runs [`Constants`] over a graph that is not the body of a method.
pub fn run_graph(
    fixture: Fixture,
    cfg: ControlFlowGraph,
    config: AnalysisConfig,
) -> Rc<DataFlowAnalysisResult<Constants>> {
    let program = Arc::new(Program::new(fixture.symbols));
    let context = AnalysisContext::new(program, Arc::new(cfg)).with_config(config);
    run(&Constants, &context, &mut AnalysisSession::new()).expect("not cancelled")
}

/// Runs [`Constants`] over the body of a method.
pub fn run_method(
    program: &Arc<Program>,
    method: MethodRef,
    config: AnalysisConfig,
) -> Rc<DataFlowAnalysisResult<Constants>> {
    let context = AnalysisContext::for_method(Arc::clone(program), method)
        .expect("the method has a body")
        .with_config(config);
    run(&Constants, &context, &mut AnalysisSession::new()).expect("not cancelled")
}

/// Returns the value a state holds for the storage of a symbol.
pub fn value_in(
    state: &AnalysisData<Constants>,
    session: &AnalysisSession,
    symbol: SymbolRef,
) -> Option<FlatValue<i64>> {
    state
        .iter()
        .find(|(entity, _)| session.entities()[**entity].symbol == Some(symbol))
        .map(|(_, value)| value.clone())
}
