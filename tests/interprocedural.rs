mod common;

use std::{rc::Rc, sync::Arc};

use common::{Body, Constants, DOMAIN, Fixture, run_method, value_in};
use cortado::{
    analysis::{
        AnalysisConfig, AnalysisContext, AnalysisError, AnalysisSession, CancellationToken,
        DataFlowAnalysis, EntityId, InterproceduralAnalysisKind,
        domain::{FlatValue, LatticeDomain},
        run,
        session::{ResultCache, run_cached},
    },
    ir::{
        Constant, MethodRef, OperationId, OperationKind, Program, RegionId, SymbolRef, TypeRef,
        symbols::{MethodInfo, MethodKind, RefKind},
    },
};
use test_log::test;

struct Caller {
    program: Arc<Program>,
    main: MethodRef,
    callee: MethodRef,
    call: OperationId,
}

/// `int id(int a) { return a; }` called as `x = id(5); return x;`
fn identity_call() -> Caller {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let a = fixture.parameter("a", 0, int, RefKind::None);
    let id = fixture.method(
        MethodInfo::new("id", MethodKind::Ordinary)
            .with_parameters([a])
            .with_return_type(int),
    );
    let main = fixture.method(MethodInfo::new("main", MethodKind::Ordinary).with_return_type(int));
    let x = fixture.local("x", int);

    let mut callee = Body::new(1, &fixture, 3);
    callee.builder.fall_through(0, 1);
    let read = callee.parameter(a, int);
    callee.builder.return_value(1, Some(read));

    let mut caller = Body::new(0, &fixture, 3);
    caller.builder.fall_through(0, 1);
    let five = caller.int(5);
    let call = caller.call(id, None, vec![five], Some(int));
    let target = caller.local(x, int);
    caller.assign(1, target, call);
    caller.return_local(1, x);

    let program = fixture.program([(id, callee.build()), (main, caller.build())]);
    Caller {
        program,
        main,
        callee: id,
        call,
    }
}

#[test]
fn callees_are_analyzed_with_the_arguments() {
    let Caller {
        program,
        main,
        call,
        ..
    } = identity_call();
    let result = run_method(&program, main, AnalysisConfig::default());
    assert_eq!(result.value_of(call), Some(&FlatValue::Value(5)));
    assert_eq!(result.return_value(), Some(&FlatValue::Value(5)));
    let callee = result.interprocedural_result(call).expect("the callee was analyzed");
    assert_eq!(callee.return_value(), Some(&FlatValue::Value(5)));
}

#[test]
fn calls_are_opaque_without_interprocedural_analysis() {
    let Caller {
        program,
        main,
        call,
        ..
    } = identity_call();
    let config =
        AnalysisConfig::default().with_interprocedural(InterproceduralAnalysisKind::None);
    let result = run_method(&program, main, config);
    assert_eq!(result.return_value(), Some(&FlatValue::Top));
    assert!(result.interprocedural_result(call).is_none());
}

#[test]
fn skipped_methods_are_opaque() {
    let Caller {
        program,
        main,
        callee,
        call,
    } = identity_call();
    let config = AnalysisConfig::default().with_skipped_method(callee);
    let result = run_method(&program, main, config);
    assert_eq!(result.return_value(), Some(&FlatValue::Top));
    assert!(result.interprocedural_result(call).is_none());
}

#[test]
fn runs_are_idempotent_within_a_session() {
    let Caller { program, main, .. } = identity_call();
    let context = AnalysisContext::for_method(program, main).expect("main has a body");
    let mut session = AnalysisSession::new();
    let first = run(&Constants, &context, &mut session).expect("not cancelled");
    let entities = session.entities().len();
    let second = run(&Constants, &context, &mut session).expect("not cancelled");
    assert_eq!(*first, *second);
    assert_eq!(session.entities().len(), entities);
}

#[test]
fn recursive_calls_are_not_descended_into() {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let f = fixture.method(MethodInfo::new("f", MethodKind::Ordinary).with_return_type(int));
    let g = fixture.method(MethodInfo::new("g", MethodKind::Ordinary).with_return_type(int));

    let mut f_body = Body::new(0, &fixture, 3);
    f_body.builder.fall_through(0, 1);
    let f_calls_g = f_body.call(g, None, Vec::new(), Some(int));
    f_body.builder.return_value(1, Some(f_calls_g));

    let mut g_body = Body::new(1, &fixture, 3);
    g_body.builder.fall_through(0, 1);
    let g_calls_f = g_body.call(f, None, Vec::new(), Some(int));
    g_body.builder.return_value(1, Some(g_calls_f));

    let program = fixture.program([(f, f_body.build()), (g, g_body.build())]);
    let result = run_method(&program, f, AnalysisConfig::default());
    assert_eq!(result.return_value(), Some(&FlatValue::Top));
    let callee = result
        .interprocedural_result(f_calls_g)
        .expect("g was analyzed");
    assert!(callee.interprocedural_result(g_calls_f).is_none());
}

/// `void set(ref int r)` called as `x = 1; set(ref x); return x;`
fn opaque_call_with(ref_kind: RefKind) -> Option<FlatValue<i64>> {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let r = fixture.parameter("r", 0, int, ref_kind);
    let set = fixture.method(MethodInfo::new("set", MethodKind::Ordinary).with_parameters([r]));
    let main = fixture.method(MethodInfo::new("main", MethodKind::Ordinary).with_return_type(int));
    let x = fixture.local("x", int);

    let mut body = Body::new(0, &fixture, 3);
    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    let argument = body.local(x, int);
    let call = body.call(set, None, vec![argument], None);
    body.builder.push_statement(1, call);
    body.return_local(1, x);

    let program = fixture.program([(main, body.build())]);
    run_method(&program, main, AnalysisConfig::default())
        .return_value()
        .cloned()
}

#[test]
fn opaque_calls_invalidate_ref_arguments() {
    assert_eq!(opaque_call_with(RefKind::Ref), Some(FlatValue::Top));
    assert_eq!(opaque_call_with(RefKind::Out), Some(FlatValue::Top));
    assert_eq!(opaque_call_with(RefKind::None), Some(FlatValue::Value(1)));
}

#[test]
fn cancelled_sessions_abort() {
    let Caller { program, main, .. } = identity_call();
    let context = AnalysisContext::for_method(program, main).expect("main has a body");
    let token = CancellationToken::new();
    let mut session = AnalysisSession::with_cancellation(token.clone());
    token.cancel();
    assert_eq!(
        run(&Constants, &context, &mut session).err(),
        Some(AnalysisError::Cancelled)
    );
}

#[test]
fn methods_without_bodies_cannot_be_analyzed() {
    let mut fixture = Fixture::new();
    let abstract_method = fixture.method(MethodInfo::new("m", MethodKind::Ordinary));
    let program = Arc::new(Program::new(fixture.symbols));
    assert_eq!(
        AnalysisContext::<Constants>::for_method(program, abstract_method).err(),
        Some(AnalysisError::MissingBody(abstract_method))
    );
}

#[test]
fn cached_results_are_shared() {
    let Caller { program, main, .. } = identity_call();
    let context = AnalysisContext::for_method(program, main).expect("main has a body");
    let mut session = AnalysisSession::new();
    let mut cache = ResultCache::new();
    let first = run_cached(&Constants, &context, &mut session, &mut cache).expect("not cancelled");
    let second = run_cached(&Constants, &context, &mut session, &mut cache).expect("not cancelled");
    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
}

struct Lambda {
    program: Arc<Program>,
    main: MethodRef,
    x: SymbolRef,
    creation: OperationId,
}

/// `x = 1; var f = () => { x = value; }; return x;` where `f` is never invoked.
fn standalone_lambda(value: i64) -> Lambda {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let x = fixture.local("x", int);
    let lambda = fixture.method(MethodInfo::new("<lambda>", MethodKind::Lambda));
    let main = fixture.method(MethodInfo::new("main", MethodKind::Ordinary).with_return_type(int));

    let mut body = Body::new(1, &fixture, 3);
    body.builder.fall_through(0, 1);
    body.set(1, x, value);
    body.builder.fall_through(1, 2);
    let lambda_cfg = body.build();

    let mut body = Body::new(0, &fixture, 3);
    body.builder.declare_locals(RegionId::ROOT, [x]);
    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    let creation = body.op(OperationKind::AnonymousFunction { method: lambda }, None);
    body.builder.push_statement(1, creation);
    body.return_local(1, x);
    body.builder.add_nested_graph(lambda, Arc::new(lambda_cfg));

    Lambda {
        program: fixture.program([(main, body.build())]),
        main,
        x,
        creation,
    }
}

#[test]
fn lambdas_never_invoked_run_at_the_end_of_the_body() {
    let Lambda {
        program,
        main,
        x,
        creation,
    } = standalone_lambda(5);
    let context = AnalysisContext::for_method(program, main).expect("main has a body");
    let mut session = AnalysisSession::new();
    let result = run(&Constants, &context, &mut session).expect("not cancelled");
    assert_eq!(result.return_value(), Some(&FlatValue::Value(1)));
    assert!(result.interprocedural_result(creation).is_some());
    let exit = result.exit_block_output().expect("the exit is analyzed");
    assert_eq!(value_in(exit, &session, x), Some(FlatValue::Value(5)));
}

/// Integer constant propagation that cancels its session when it meets a literal.
#[derive(Debug)]
struct CancelsOn {
    literal: i64,
    token: CancellationToken,
}

impl DataFlowAnalysis for CancelsOn {
    const NAME: &'static str = "cancels-on";

    type Key = EntityId;
    type Value = FlatValue<i64>;
    type Domain = LatticeDomain<FlatValue<i64>>;

    fn domain(&self) -> &Self::Domain {
        &DOMAIN
    }

    fn value_for_constant(&self, constant: &Constant, ty: Option<TypeRef>) -> Self::Value {
        if constant.as_int() == Some(self.literal) {
            self.token.cancel();
        }
        Constants.value_for_constant(constant, ty)
    }
}

#[test]
fn cancellation_inside_a_lambda_aborts_the_caller() {
    let Lambda { program, main, .. } = standalone_lambda(42);
    let context = AnalysisContext::for_method(program, main).expect("main has a body");
    let token = CancellationToken::new();
    let analysis = CancelsOn {
        literal: 42,
        token: token.clone(),
    };
    let mut session = AnalysisSession::with_cancellation(token.clone());
    let result = run(&analysis, &context, &mut session);
    assert!(token.is_cancelled());
    assert_eq!(result.err(), Some(AnalysisError::Cancelled));
}

struct Delegate {
    program: Arc<Program>,
    main: MethodRef,
    call: OperationId,
}

/// `Func<int> f = () => 7; return f();`
fn delegate_call() -> Delegate {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let lambda =
        fixture.method(MethodInfo::new("<lambda>", MethodKind::Lambda).with_return_type(int));
    let invoke =
        fixture.method(MethodInfo::new("Invoke", MethodKind::DelegateInvoke).with_return_type(int));
    let main = fixture.method(MethodInfo::new("main", MethodKind::Ordinary).with_return_type(int));

    let mut body = Body::new(1, &fixture, 3);
    body.builder.fall_through(0, 1);
    let seven = body.int(7);
    body.builder.return_value(1, Some(seven));
    let lambda_cfg = body.build();

    let mut body = Body::new(0, &fixture, 3);
    body.builder.fall_through(0, 1);
    let delegate = body.op(OperationKind::AnonymousFunction { method: lambda }, None);
    let call = body.call(invoke, Some(delegate), Vec::new(), Some(int));
    body.builder.return_value(1, Some(call));
    body.builder.add_nested_graph(lambda, Arc::new(lambda_cfg));

    Delegate {
        program: fixture.program([(main, body.build())]),
        main,
        call,
    }
}

#[test]
fn delegate_invocations_analyze_the_lambda() {
    let Delegate {
        program,
        main,
        call,
    } = delegate_call();
    let result = run_method(&program, main, AnalysisConfig::default());
    assert_eq!(result.value_of(call), Some(&FlatValue::Value(7)));
    assert_eq!(result.return_value(), Some(&FlatValue::Value(7)));
    let lambda = result.interprocedural_result(call).expect("the lambda was analyzed");
    assert_eq!(lambda.return_value(), Some(&FlatValue::Value(7)));
}

#[test]
fn lambda_call_chains_are_bounded() {
    let Delegate {
        program,
        main,
        call,
    } = delegate_call();
    let config = AnalysisConfig::default().with_max_lambda_call_chain(0);
    let result = run_method(&program, main, config);
    assert_eq!(result.value_of(call), Some(&FlatValue::Top));
    assert!(result.interprocedural_result(call).is_none());
}

/// `void set(ref int r) { r = 5; }` called as `x = 1; set(ref x); return x;`
#[test]
fn analyzed_callees_write_back_through_ref_parameters() {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let r = fixture.parameter("r", 0, int, RefKind::Ref);
    let set = fixture.method(MethodInfo::new("set", MethodKind::Ordinary).with_parameters([r]));
    let main = fixture.method(MethodInfo::new("main", MethodKind::Ordinary).with_return_type(int));
    let x = fixture.local("x", int);

    let mut callee = Body::new(1, &fixture, 3);
    callee.builder.fall_through(0, 1);
    let target = callee.parameter(r, int);
    let five = callee.int(5);
    callee.assign(1, target, five);
    callee.builder.fall_through(1, 2);

    let mut body = Body::new(0, &fixture, 3);
    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    let argument = body.local(x, int);
    let call = body.call(set, None, vec![argument], None);
    body.builder.push_statement(1, call);
    body.return_local(1, x);

    let program = fixture.program([(set, callee.build()), (main, body.build())]);
    let result = run_method(&program, main, AnalysisConfig::default());
    assert!(result.interprocedural_result(call).is_some());
    assert_eq!(result.return_value(), Some(&FlatValue::Value(5)));
}

/// `x = 1; ref int r = ref x; r = 7; return x;`
#[test]
fn ref_locals_share_the_address_of_their_target() {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let x = fixture.local("x", int);
    let r = fixture.local("r", int);
    let mut body = Body::new(0, &fixture, 3);
    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    let alias = body.local(r, int);
    let aliased = body.local(x, int);
    let binding = body.op(
        OperationKind::SimpleAssignment {
            target: alias,
            value: aliased,
            is_ref: true,
        },
        None,
    );
    body.builder.push_statement(1, binding);
    body.set(1, r, 7);
    body.return_local(1, x);

    let program = Arc::new(Program::new(fixture.symbols));
    let context = AnalysisContext::new(program, Arc::new(body.build()));
    let result = run(&Constants, &context, &mut AnalysisSession::new()).expect("not cancelled");
    assert_eq!(result.return_value(), Some(&FlatValue::Value(7)));
}

/// `int two(ref int a, ref int b) { a = 3; return b; }` called as
/// `x = 1; y = two(ref x, ref x);`
#[test]
fn ref_parameters_bound_to_one_argument_are_aliases() {
    let mut fixture = Fixture::new();
    let int = fixture.int;
    let a = fixture.parameter("a", 0, int, RefKind::Ref);
    let b = fixture.parameter("b", 1, int, RefKind::Ref);
    let two = fixture.method(
        MethodInfo::new("two", MethodKind::Ordinary)
            .with_parameters([a, b])
            .with_return_type(int),
    );
    let main = fixture.method(MethodInfo::new("main", MethodKind::Ordinary).with_return_type(int));
    let x = fixture.local("x", int);
    let y = fixture.local("y", int);

    let mut callee = Body::new(1, &fixture, 3);
    callee.builder.fall_through(0, 1);
    let target = callee.parameter(a, int);
    let three = callee.int(3);
    callee.assign(1, target, three);
    let read = callee.parameter(b, int);
    callee.builder.return_value(1, Some(read));

    let mut body = Body::new(0, &fixture, 3);
    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    let first = body.local(x, int);
    let second = body.local(x, int);
    let call = body.call(two, None, vec![first, second], Some(int));
    let target = body.local(y, int);
    body.assign(1, target, call);
    body.return_local(1, x);

    let program = fixture.program([(two, callee.build()), (main, body.build())]);
    let result = run_method(&program, main, AnalysisConfig::default());
    assert_eq!(result.value_of(call), Some(&FlatValue::Value(3)));
    assert_eq!(result.return_value(), Some(&FlatValue::Value(3)));
}
