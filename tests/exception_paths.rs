mod common;

use std::sync::Arc;

use common::{Body, Constants, Fixture, run_graph, value_in};
use cortado::{
    analysis::{
        AnalysisConfig, AnalysisContext, AnalysisFlags, AnalysisSession, domain::FlatValue, run,
    },
    ir::{
        ConditionKind, ControlFlowGraph, Program, RegionKind,
        symbols::{MethodInfo, MethodKind},
    },
};
use test_log::test;

fn with_exception_paths() -> AnalysisConfig {
    AnalysisConfig::default().with_flags(AnalysisFlags::default() | AnalysisFlags::EXCEPTION_PATHS)
}

#[test]
fn finally_sees_every_state_of_its_try() {
    let mut fixture = Fixture::new();
    let x = fixture.local("x", fixture.int);
    let y = fixture.local("y", fixture.int);
    let mut body = Body::new(0, &fixture, 6);
    let guarded = body.builder.add_region(RegionKind::TryAndFinally, 2, 3, None);
    body.builder.add_region(RegionKind::Try, 2, 2, Some(guarded));
    body.builder.add_region(RegionKind::Finally, 3, 3, Some(guarded));

    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    body.builder.fall_through(1, 2);
    body.set(2, x, 2);
    body.builder.fall_through(2, 4);
    let target = body.local(y, fixture.int);
    let read = body.local(x, fixture.int);
    body.assign(3, target, read);
    body.builder.structured_exception_handling(3);
    body.return_local(4, y);
    let cfg = body.build();
    assert_eq!(cfg.blocks()[2].fall_through.as_ref().map(|it| it.finally_regions.len()), Some(1));

    let result = run_graph(fixture, cfg, AnalysisConfig::default());
    assert_eq!(result.value_of(read), Some(&FlatValue::Top));
    assert_eq!(result.return_value(), Some(&FlatValue::Top));
    assert!(result.blocks().iter().all(|it| it.is_reachable()));
}

/// `x = 2; try { g(); x = 3; } catch { read x; } return x;`
fn catch_after_call(config: AnalysisConfig) -> Option<FlatValue<i64>> {
    let mut fixture = Fixture::new();
    let x = fixture.local("x", fixture.int);
    let g = fixture.method(MethodInfo::new("g", MethodKind::Ordinary));
    let mut body = Body::new(0, &fixture, 6);
    let guarded = body.builder.add_region(RegionKind::TryAndCatch, 2, 3, None);
    body.builder.add_region(RegionKind::Try, 2, 2, Some(guarded));
    body.builder.add_region(RegionKind::Catch, 3, 3, Some(guarded));

    body.builder.fall_through(0, 1);
    body.set(1, x, 2);
    body.builder.fall_through(1, 2);
    let call = body.call(g, None, Vec::new(), None);
    body.builder.push_statement(2, call);
    body.set(2, x, 3);
    body.builder.fall_through(2, 4);
    let read = body.local(x, fixture.int);
    let sink = body.local(x, fixture.int);
    body.assign(3, sink, read);
    body.builder.fall_through(3, 4);
    body.return_local(4, x);

    let result = run_graph(fixture, body.build(), config);
    assert!(result.block(3).is_some_and(|it| it.is_reachable()));
    result.value_of(read).cloned()
}

#[test]
fn catch_sees_the_state_of_throwing_operations() {
    assert_eq!(catch_after_call(with_exception_paths()), Some(FlatValue::Value(2)));
}

#[test]
fn catch_sees_every_protected_block_without_exception_paths() {
    assert_eq!(catch_after_call(AnalysisConfig::default()), Some(FlatValue::Top));
}

/// `x = 4; throw new Exception();`
fn throwing() -> (Fixture, ControlFlowGraph) {
    let mut fixture = Fixture::new();
    let x = fixture.local("x", fixture.int);
    let exception = fixture.symbols.well_known().exception;
    let mut body = Body::new(0, &fixture, 3);
    body.builder.fall_through(0, 1);
    body.set(1, x, 4);
    let thrown = body.new_object(exception);
    body.builder.throw(1, thrown);
    let cfg = body.build();
    (fixture, cfg)
}

#[test]
fn uncaught_throws_reach_the_exceptional_exit() {
    let (fixture, cfg) = throwing();
    let result = run_graph(fixture, cfg, with_exception_paths());
    let escaped = result.exceptional_exit().expect("the throw escapes");
    assert!(escaped.is_reachable());
    assert!(escaped.iter().any(|(_, value)| *value == FlatValue::Value(4)));
    assert!(!result.block(2).is_some_and(|it| it.is_reachable()));
    assert_eq!(result.return_value(), None);
}

#[test]
fn exceptional_exit_requires_exception_paths() {
    let (fixture, cfg) = throwing();
    let result = run_graph(fixture, cfg, AnalysisConfig::default());
    assert!(result.exceptional_exit().is_none());
}

/// `x = 1; try { if (?) throw new Exception(); } finally { y = x; } return x;`
#[test]
fn values_assigned_before_a_try_survive_its_finally() {
    let mut fixture = Fixture::new();
    let x = fixture.local("x", fixture.int);
    let y = fixture.local("y", fixture.int);
    let exception = fixture.symbols.well_known().exception;
    let mut body = Body::new(0, &fixture, 7);
    let guarded = body.builder.add_region(RegionKind::TryAndFinally, 2, 4, None);
    body.builder.add_region(RegionKind::Try, 2, 3, Some(guarded));
    body.builder.add_region(RegionKind::Finally, 4, 4, Some(guarded));

    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    body.builder.fall_through(1, 2);
    let condition = body.unknown_condition();
    body.builder.conditional(2, condition, ConditionKind::WhenTrue, 3);
    body.builder.fall_through(2, 5);
    let thrown = body.new_object(exception);
    body.builder.throw(3, thrown);
    let target = body.local(y, fixture.int);
    let read = body.local(x, fixture.int);
    body.assign(4, target, read);
    body.builder.structured_exception_handling(4);
    body.return_local(5, x);
    let cfg = Arc::new(body.build());

    let program = Arc::new(Program::new(fixture.symbols));
    for config in [AnalysisConfig::default(), with_exception_paths()] {
        let context = AnalysisContext::new(Arc::clone(&program), Arc::clone(&cfg))
            .with_config(config);
        let mut session = AnalysisSession::new();
        let result = run(&Constants, &context, &mut session).expect("not cancelled");
        assert_eq!(result.value_of(read), Some(&FlatValue::Value(1)));
        assert_eq!(result.return_value(), Some(&FlatValue::Value(1)));
        if !context.config().exception_paths() {
            continue;
        }
        let escaped = result.exceptional_exit().expect("the throw escapes");
        assert!(escaped.is_reachable());
        assert_eq!(value_in(escaped, &session, x), Some(FlatValue::Value(1)));
        assert_eq!(value_in(escaped, &session, y), Some(FlatValue::Value(1)));
    }
}

/// `x = 1; try { throw new Exception(); } finally { y = 3; }`
#[test]
fn escaping_exceptions_run_the_finally_first() {
    let mut fixture = Fixture::new();
    let x = fixture.local("x", fixture.int);
    let y = fixture.local("y", fixture.int);
    let exception = fixture.symbols.well_known().exception;
    let mut body = Body::new(0, &fixture, 5);
    let guarded = body.builder.add_region(RegionKind::TryAndFinally, 2, 3, None);
    body.builder.add_region(RegionKind::Try, 2, 2, Some(guarded));
    body.builder.add_region(RegionKind::Finally, 3, 3, Some(guarded));

    body.builder.fall_through(0, 1);
    body.set(1, x, 1);
    body.builder.fall_through(1, 2);
    let thrown = body.new_object(exception);
    body.builder.throw(2, thrown);
    body.set(3, y, 3);
    body.builder.structured_exception_handling(3);
    let cfg = body.build();

    let program = Arc::new(Program::new(fixture.symbols));
    let context = AnalysisContext::new(program, Arc::new(cfg)).with_config(with_exception_paths());
    let mut session = AnalysisSession::new();
    let result = run(&Constants, &context, &mut session).expect("not cancelled");
    assert!(result.block(3).is_some_and(|it| it.is_reachable()));
    let escaped = result.exceptional_exit().expect("the throw escapes");
    assert_eq!(value_in(escaped, &session, x), Some(FlatValue::Value(1)));
    assert_eq!(value_in(escaped, &session, y), Some(FlatValue::Value(3)));
}
