//! Guarded regions: catch dispatch, finally ordering, rethrow, stack traces,
//! and interaction with the collector.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use sable_runtime::{Control, ObjRef, Runtime};

#[test]
fn a_matching_catch_handles_the_exception() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<i32> = rt
        .guarded(|rt| Err(rt.throw_new(&wk.null_reference, "missing bowl")))
        .catch(&wk.null_reference, |rt, ex| {
            assert_eq!(rt.exception_message(ex).as_deref(), Some("missing bowl"));
            Ok(42)
        })
        .run();
    assert_eq!(outcome, Ok(42));
    // Nothing left in flight afterwards.
    assert_eq!(rt.current_exception(), ObjRef::NULL);
}

#[test]
fn catch_matches_base_types_of_the_thrown_exception() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<&str> = rt
        .guarded(|rt| Err(rt.throw_new(&wk.index_out_of_range, "slot 9")))
        .catch(&wk.invalid_cast, |_, _| Ok("wrong handler"))
        .catch(&wk.exception, |_, _| Ok("base handler"))
        .run();
    assert_eq!(outcome, Ok("base handler"));
}

#[test]
fn an_unmatched_exception_propagates_to_the_enclosing_region() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<&str> = rt
        .guarded(|rt| {
            rt.guarded(|rt| Err(rt.throw_new(&wk.null_reference, "inner")))
                .catch(&wk.invalid_cast, |_, _| Ok("inner handler"))
                .run()
        })
        .catch(&wk.null_reference, |_, _| Ok("outer handler"))
        .run();
    assert_eq!(outcome, Ok("outer handler"));
}

#[test]
fn finally_blocks_run_in_unwind_order() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let log = RefCell::new(Vec::new());

    let outcome: Control<i32> = rt
        .guarded(|rt| {
            rt.guarded(|rt| -> Control<i32> {
                log.borrow_mut().push("body");
                Err(rt.throw_new(&wk.invalid_cast, "bad shape"))
            })
            .finally(|_| log.borrow_mut().push("inner-finally"))
            .run()
        })
        .catch(&wk.invalid_cast, |_, _| {
            log.borrow_mut().push("catch");
            Ok(7)
        })
        .finally(|_| log.borrow_mut().push("outer-finally"))
        .run();

    assert_eq!(outcome, Ok(7));
    assert_eq!(
        *log.borrow(),
        ["body", "inner-finally", "catch", "outer-finally"]
    );
}

#[test]
fn finally_runs_on_the_success_path_too() {
    let rt = Runtime::new();
    let ran = Cell::new(false);
    let outcome: Control<i32> = rt
        .guarded(|_| Ok(5))
        .finally(|_| ran.set(true))
        .run();
    assert_eq!(outcome, Ok(5));
    assert!(ran.get());
}

#[test]
fn a_throw_in_finally_supersedes_a_successful_body() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<i32> = rt
        .guarded(|rt| {
            rt.guarded(|_| Ok(1))
                .finally(|rt| {
                    let _ = rt.throw_new(&wk.invalid_cast, "cleanup failed");
                })
                .run()
        })
        .catch(&wk.invalid_cast, |rt, ex| {
            assert_eq!(rt.exception_message(ex).as_deref(), Some("cleanup failed"));
            Ok(2)
        })
        .run();
    assert_eq!(outcome, Ok(2));
}

#[test]
fn a_throw_in_finally_supersedes_a_propagating_exception() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<()> = rt
        .guarded(|rt| {
            rt.guarded(|rt| Err(rt.throw_new(&wk.null_reference, "original")))
                .finally(|rt| {
                    let _ = rt.throw_new(&wk.invalid_cast, "from cleanup");
                })
                .run()
        })
        .catch(&wk.invalid_cast, |rt, ex| {
            assert_eq!(rt.exception_message(ex).as_deref(), Some("from cleanup"));
            Ok(())
        })
        .run();
    assert!(outcome.is_ok());
}

#[test]
fn an_uncaught_throw_in_finally_becomes_pending() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<i32> = rt
        .guarded(|_| Ok(1))
        .finally(|rt| {
            let _ = rt.throw_new(&wk.invalid_cast, "from finally");
        })
        .run();
    assert!(outcome.is_err());
    let pending = rt.take_pending();
    assert_eq!(rt.exception_message(pending).as_deref(), Some("from finally"));
}

#[test]
fn rethrow_preserves_the_object_and_its_original_trace() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let seen = Cell::new(ObjRef::NULL);
    let caught = Cell::new(ObjRef::NULL);

    let outcome: Control<()> = rt
        .guarded(|rt| {
            rt.guarded(|rt| {
                let _frame = rt.enter_frame("Kennel.feed");
                Err(rt.throw_new(&wk.null_reference, "no bowl"))
            })
            .catch(&wk.null_reference, |rt, ex| {
                seen.set(ex);
                Err(rt.rethrow())
            })
            .run()
        })
        .catch(&wk.exception, |_, ex| {
            caught.set(ex);
            Ok(())
        })
        .run();

    assert!(outcome.is_ok());
    assert_eq!(seen.get(), caught.get());
    let trace = rt.exception_stack_trace(caught.get()).expect("trace set");
    assert!(trace.contains("Kennel.feed"), "trace was {trace:?}");
}

#[test]
fn a_handler_may_replace_the_exception_with_a_new_one() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<()> = rt
        .guarded(|rt| {
            rt.guarded(|rt| Err(rt.throw_new(&wk.invalid_cast, "original")))
                .catch(&wk.invalid_cast, |rt, _| {
                    Err(rt.throw_new(&wk.null_reference, "translated"))
                })
                .run()
        })
        .catch(&wk.null_reference, |rt, ex| {
            assert_eq!(rt.exception_message(ex).as_deref(), Some("translated"));
            Ok(())
        })
        .run();
    assert!(outcome.is_ok());
}

#[test]
fn current_exception_is_visible_inside_a_handler() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<()> = rt
        .guarded(|rt| Err(rt.throw_new(&wk.invalid_cast, "visible")))
        .catch_all(|rt, ex| {
            assert_eq!(rt.current_exception(), ex);
            Ok(())
        })
        .run();
    assert!(outcome.is_ok());
    assert_eq!(rt.current_exception(), ObjRef::NULL);
}

#[test]
fn an_exception_nothing_catches_becomes_pending() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<()> = rt
        .guarded(|rt| Err(rt.throw_new(&wk.invalid_cast, "escaped")))
        .run();
    assert!(outcome.is_err());

    let pending = rt.current_exception();
    assert!(!pending.is_null());
    rt.report_unhandled(pending);
    assert_eq!(rt.take_pending(), pending);
    assert_eq!(rt.take_pending(), ObjRef::NULL);
}

#[test]
fn throwing_null_raises_null_reference_instead() {
    let rt = Runtime::new();
    let _ = rt.throw(ObjRef::NULL);
    let pending = rt.take_pending();
    let ty = rt.type_of(pending).expect("exception object");
    assert!(Arc::ptr_eq(&ty, &rt.well_known().null_reference));
    assert_eq!(
        rt.exception_message(pending).as_deref(),
        Some("Object reference not set to an instance of an object.")
    );
}

#[test]
fn traces_list_frames_innermost_first() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let _outer = rt.enter_frame("Zoo.Main");
    let thrown = {
        let _inner = rt.enter_frame("Zoo.Feeder.feed");
        rt.throw_new(&wk.null_reference, "no bowl")
    };
    let _ = thrown;
    let ex = rt.take_pending();
    let trace = rt.exception_stack_trace(ex).expect("trace set");
    let feed_at = trace.find("Zoo.Feeder.feed").expect("inner frame");
    let main_at = trace.find("Zoo.Main").expect("outer frame");
    assert!(feed_at < main_at);
}

#[test]
fn an_in_flight_exception_survives_collection() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let outcome: Control<()> = rt
        .guarded(|rt| Err(rt.throw_new(&wk.invalid_cast, "mid-flight")))
        .catch_all(|rt, ex| {
            rt.collect();
            assert_eq!(rt.exception_message(ex).as_deref(), Some("mid-flight"));
            Ok(())
        })
        .run();
    assert!(outcome.is_ok());
}

#[test]
fn exception_objects_carry_an_inner_exception() {
    let rt = Runtime::new();
    let wk = rt.well_known().clone();
    let cause = rt
        .alloc_exception(&wk.null_reference, "root cause", ObjRef::NULL)
        .unwrap();
    let wrapper = rt
        .alloc_exception(&wk.invalid_cast, "wrapper", cause)
        .unwrap();
    assert_eq!(rt.exception_inner(wrapper), cause);
    assert_eq!(rt.exception_inner(cause), ObjRef::NULL);
}
