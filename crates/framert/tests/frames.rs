//! Frame stack behavior: release on every exit path, depth limits and resource
//! limits seen from lowered code.

use std::time::Duration;

use framert::{
    Context, ExcType, ExecError, HeapData, LimitedTracker, ResourceError, ResourceLimits, ResourceTracker, RunError,
    RunResult, TryCatch,
};
use pretty_assertions::assert_eq;

fn recurse(ctx: &mut Context<LimitedTracker>, remaining: usize) -> RunResult<()> {
    ctx.activation("recurse", |ctx| {
        let _local = ctx.init(HeapData::Int(1))?;
        if remaining == 0 {
            return Ok(());
        }
        ctx.call(|ctx| recurse(ctx, remaining - 1))
    })
}

#[test]
fn nested_activations_release_in_order() {
    let mut ctx = Context::with_limits(ResourceLimits::new());
    ctx.run_top_level("main", |ctx| recurse(ctx, 10)).unwrap();
    assert_eq!(ctx.frame_depth(), 0);
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn frame_depth_overflow_is_a_catchable_exception() {
    let mut ctx = Context::with_limits(ResourceLimits::new().max_frame_depth(8));
    let message = ctx
        .run_top_level("main", |ctx| {
            TryCatch::new()
                .catch(ExcType::RuntimeException, |ctx, e| {
                    let message = ctx.exception_message(ctx.get(e)).unwrap_or_default().to_owned();
                    Ok(message)
                })
                .run(ctx, |ctx| {
                    ctx.call(|ctx| recurse(ctx, 100))?;
                    Ok(String::new())
                })
        })
        .map_err(|err| err.to_string());
    assert_eq!(message, Ok("maximum function nesting level of '8' reached".to_owned()));
    assert_eq!(ctx.frame_depth(), 0);
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn uncaught_frame_depth_overflow_reaches_the_host() {
    let mut ctx = Context::with_limits(ResourceLimits::new().max_frame_depth(4));
    match ctx.run_top_level("main", |ctx| recurse(ctx, 10)) {
        Err(ExecError::Exception(exc)) => assert_eq!(exc.class_name, "RuntimeException"),
        other => panic!("expected an uncaught RuntimeException, got {other:?}"),
    }
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn allocation_limit_is_uncatchable_and_skips_finally() {
    let mut ctx = Context::with_limits(ResourceLimits::new().max_allocations(5));
    let mut finally_ran = false;
    let result = ctx.run_top_level("main", |ctx| {
        TryCatch::new()
            .catch(ExcType::Exception, |_, _| Ok(()))
            .finally(|_| {
                finally_ran = true;
                Ok(())
            })
            .run(ctx, |ctx| {
                for i in 0..10 {
                    ctx.init(HeapData::Int(i))?;
                }
                Ok(())
            })
    });
    assert!(!finally_ran);
    assert_eq!(
        result,
        Err(ExecError::Resource(ResourceError::Allocation { limit: 5, count: 6 }))
    );
    assert_eq!(ctx.frame_depth(), 0);
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn time_limit_is_checked_at_call_boundaries() {
    let mut ctx = Context::with_limits(ResourceLimits::new().max_duration(Duration::ZERO));
    std::thread::sleep(Duration::from_millis(2));
    let result = ctx.run_top_level("main", |ctx| ctx.call(|_| Ok(())));
    assert!(matches!(result, Err(ExecError::Resource(ResourceError::Time { .. }))));
}

#[test]
fn memory_limit_reports_usage() {
    let mut ctx = Context::with_limits(ResourceLimits::new().max_memory(256));
    let result = ctx.run_top_level("main", |ctx| {
        ctx.init(HeapData::Str("x".repeat(1024)))?;
        Ok(())
    });
    assert!(matches!(result, Err(ExecError::Resource(ResourceError::Memory { limit: 256, .. }))));
    assert_eq!(ctx.heap().tracker().current_memory_bytes(), Some(0));
}

#[test]
fn init_into_and_assign_keep_counts_balanced() {
    let mut ctx = Context::new();
    let before = ctx.heap_stats();
    ctx.run_top_level("main", |ctx| {
        let a = ctx.init(HeapData::Bool(true))?;
        let b = ctx.declare();
        ctx.assign(b, ctx.get(a));
        ctx.assign(b, ctx.get(b));
        assert_eq!(ctx.heap().get_refcount(ctx.get(a)), 2);
        ctx.init_into(a, HeapData::Bool(false))?;
        assert_eq!(ctx.as_bool(ctx.get(a)), Some(false));
        assert_eq!(ctx.as_bool(ctx.get(b)), Some(true));
        ctx.release(b);
        assert_eq!(ctx.try_get(b), None);
        Ok(())
    })
    .unwrap();
    assert!(before.diff(&ctx.heap_stats()).is_empty());
}

#[test]
fn error_inside_activation_still_exits_the_frame() {
    let mut ctx = Context::new();
    let result: RunResult<()> = ctx.activation("f", |ctx| {
        ctx.init(HeapData::Str("owned".to_owned()))?;
        Err(RunError::internal("translator bug"))
    });
    assert!(matches!(result, Err(RunError::Internal(_))));
    assert_eq!(ctx.frame_depth(), 0);
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
#[should_panic(expected = "exited out of order")]
fn exiting_a_frame_that_is_not_innermost_panics() {
    let mut ctx = Context::new();
    let outer = ctx.frame_enter("outer").unwrap();
    let _inner = ctx.frame_enter("inner").unwrap();
    ctx.frame_exit(outer);
}

#[test]
#[should_panic(expected = "no active frame")]
fn init_outside_any_frame_panics() {
    let mut ctx = Context::new();
    let _ = ctx.init(HeapData::Null);
}

#[test]
fn run_top_level_rejects_nested_use() {
    let mut ctx = Context::new();
    let handle = ctx.frame_enter("host").unwrap();
    let result = ctx.run_top_level("main", |_| Ok(()));
    assert!(matches!(result, Err(ExecError::Internal(_))));
    ctx.frame_exit(handle);
}
