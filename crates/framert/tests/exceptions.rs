//! Exception objects, the class table and method dispatch.

use framert::{Context, ExcType, ExecError, HeapData, HeapId, RunError, RunResult, TryCatch, Value};
use pretty_assertions::assert_eq;

fn uncaught(result: Result<(), ExecError>) -> framert::Exception {
    match result {
        Err(ExecError::Exception(exc)) => exc,
        other => panic!("expected an uncaught exception, got {other:?}"),
    }
}

#[test]
fn calling_an_undefined_method_raises_bad_method_call() {
    let mut ctx = Context::new();
    let result = ctx.run_top_level("main", |ctx| {
        let obj = ctx.instantiate(ExcType::DomainException.into())?;
        let ret = ctx.call_method(ctx.get(obj), "frobnicate", &[])?;
        assert!(ret.is_none(), "never reached");
        Ok(())
    });
    let exc = uncaught(result);
    assert_eq!(exc.class_name, "BadMethodCallException");
    assert_eq!(exc.message, "Call to undefined method DomainException::frobnicate()");
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn calling_a_method_on_a_string_raises() {
    let mut ctx = Context::new();
    let result = ctx.run_top_level("main", |ctx| {
        let s = ctx.init(HeapData::Str("text".to_owned()))?;
        ctx.call_method(ctx.get(s), "getMessage", &[])?;
        Ok(())
    });
    assert_eq!(uncaught(result).message, "Trying to call method getMessage on a non object");
}

#[test]
fn constructor_sets_message_code_and_previous() {
    let mut ctx = Context::new();
    let result = ctx.run_top_level("main", |ctx| {
        let inner = ctx.instantiate(ExcType::OutOfRangeException.into())?;
        let inner_msg = ctx.init(HeapData::Str("inner".to_owned()))?;
        ctx.call_method(ctx.get(inner), "__construct", &[ctx.get(inner_msg)])?;

        let outer = ctx.instantiate(ExcType::UnexpectedValueException.into())?;
        let outer_msg = ctx.init(HeapData::Str("outer".to_owned()))?;
        let code = ctx.init(HeapData::Int(42))?;
        let args = [ctx.get(outer_msg), ctx.get(code), ctx.get(inner)];
        ctx.call_method(ctx.get(outer), "__construct", &args)?;

        let code = ctx
            .call_method(ctx.get(outer), "getCode", &[])?
            .expect("getCode returns a value");
        assert_eq!(ctx.as_int(code.id()), Some(42));
        ctx.drop_value(code);
        Err(ctx.throw(ctx.get(outer)))
    });
    let exc = uncaught(result);
    assert_eq!(exc.to_string(), "UnexpectedValueException: outer");
    assert_eq!(exc.code, 42);
    let chain: Vec<(&str, &str)> = exc
        .chain()
        .map(|e| (e.class_name.as_str(), e.message.as_str()))
        .collect();
    assert_eq!(
        chain,
        [("UnexpectedValueException", "outer"), ("OutOfRangeException", "inner")]
    );
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn constructor_rejects_wrong_argument_types() {
    let mut ctx = Context::new();
    let result = ctx.run_top_level("main", |ctx| {
        let exc = ctx.instantiate(ExcType::Exception.into())?;
        let not_a_string = ctx.init(HeapData::Int(5))?;
        ctx.call_method(ctx.get(exc), "__construct", &[ctx.get(not_a_string)])?;
        Ok(())
    });
    let exc = uncaught(result);
    assert_eq!(exc.class_name, "InvalidArgumentException");
    assert!(exc.message.starts_with("Wrong parameters for Exception"));
}

fn custom_describe(ctx: &mut Context, this: HeapId, _args: &[HeapId]) -> RunResult<Option<Value>> {
    let message = ctx.exception_message(this).unwrap_or_default();
    let text = format!("[custom] {message}");
    ctx.alloc_value(HeapData::Str(text)).map(Some)
}

fn sentinel_raiser(ctx: &mut Context, _this: HeapId, _args: &[HeapId]) -> RunResult<Option<Value>> {
    let _ = ctx.throw_new(ExcType::RangeException, "out of range");
    ctx.alloc_value(HeapData::Bool(false)).map(Some)
}

#[test]
fn user_classes_inherit_and_extend_the_protocol() {
    let mut ctx = Context::new();
    let custom = ctx
        .classes_mut()
        .define("Test\\CustomException", Some(ExcType::RuntimeException.into()))
        .unwrap();
    ctx.classes_mut().add_method(custom, "describe", custom_describe);
    ctx.classes_mut().add_property(custom, "code", HeapData::Int(7));

    let result = ctx.run_top_level("main", |ctx| {
        TryCatch::new()
            .catch(ExcType::RuntimeException, |ctx, e| {
                let described = ctx.call_method(ctx.get(e), "DESCRIBE", &[])?;
                let code = ctx.read_property(ctx.get(e), "code").and_then(|c| ctx.as_int(c));
                Ok((described, code))
            })
            .run(ctx, |ctx| Err(ctx.throw_new(custom, "custom failure")))
    });
    let (described, code) = result.unwrap();
    let described = described.unwrap();
    assert_eq!(ctx.as_str(described.id()), Some("[custom] custom failure"));
    assert_eq!(code, Some(7));
    ctx.drop_value(described);
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn native_method_sentinel_is_converted_by_call_method() {
    let mut ctx = Context::new();
    let class = ctx.classes_mut().define("Raiser", None).unwrap();
    ctx.classes_mut().add_method(class, "run", sentinel_raiser);

    let result = ctx.run_top_level("main", |ctx| {
        let obj = ctx.instantiate(class)?;
        let ret = ctx.call_method(ctx.get(obj), "run", &[]);
        assert_eq!(ret.as_ref().map(Option::is_some), Err(&RunError::Exc));
        ret.map(|_| ())
    });
    assert_eq!(uncaught(result).class_name, "RangeException");
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn throwing_a_non_exception_object_is_an_internal_error() {
    let mut ctx = Context::new();
    let plain = ctx.classes_mut().define("Plain", None).unwrap();
    let result = ctx.run_top_level("main", |ctx| {
        let obj = ctx.instantiate(plain)?;
        Err::<(), _>(ctx.throw(ctx.get(obj)))
    });
    assert!(matches!(result, Err(ExecError::Internal(_))));
    assert!(!ctx.check_pending());
    assert_eq!(ctx.heap().live_count(), 0);

    let result = ctx.run_top_level("main", |ctx| Err::<(), _>(ctx.throw_new(plain, "nope")));
    assert!(matches!(result, Err(ExecError::Internal(_))));
}

#[test]
fn finally_runs_on_every_catchable_path() {
    for (raise, catches) in [(false, false), (true, true), (true, false)] {
        let mut ctx = Context::new();
        let mut finally_saw_pending = None;
        let result = ctx.run_top_level("main", |ctx| {
            let mut region = TryCatch::new();
            if catches {
                region = region.catch(ExcType::Exception, |_, _| Ok(()));
            }
            region
                .finally(|ctx| {
                    finally_saw_pending = Some(ctx.check_pending());
                    Ok(())
                })
                .run(ctx, |ctx| {
                    if raise {
                        return Err(ctx.throw_new(ExcType::LengthException, "too long"));
                    }
                    Ok(())
                })
        });
        assert_eq!(finally_saw_pending, Some(false), "finally must run with the exception parked");
        if raise && !catches {
            assert_eq!(uncaught(result).message, "too long");
        } else {
            assert_eq!(result, Ok(()));
        }
        assert_eq!(ctx.heap().live_count(), 0);
    }
}

#[test]
fn exception_raised_in_finally_replaces_the_parked_one() {
    let mut ctx = Context::new();
    let result = ctx.run_top_level("main", |ctx| {
        TryCatch::new()
            .finally(|ctx| Err(ctx.throw_new(ExcType::OverflowException, "from finally")))
            .run(ctx, |ctx| Err(ctx.throw_new(ExcType::UnderflowException, "from body")))
    });
    let exc = uncaught(result);
    assert_eq!(exc.class_name, "OverflowException");
    assert_eq!(exc.message, "from finally");
    assert_eq!(ctx.heap().live_count(), 0);
}

#[test]
fn handler_may_throw_a_new_exception_with_previous() {
    let mut ctx = Context::new();
    let result = ctx.run_top_level("main", |ctx| {
        TryCatch::new()
            .catch(ExcType::LogicException, |ctx, e| {
                let wrapped = ctx.instantiate(ExcType::RuntimeException.into())?;
                let message = ctx.init(HeapData::Str("wrapped".to_owned()))?;
                let code = ctx.init(HeapData::Int(0))?;
                let args = [ctx.get(message), ctx.get(code), ctx.get(e)];
                ctx.call_method(ctx.get(wrapped), "__construct", &args)?;
                Err(ctx.throw(ctx.get(wrapped)))
            })
            .run(ctx, |ctx| Err(ctx.throw_new(ExcType::DomainException, "original")))
    });
    let exc = uncaught(result);
    assert_eq!(exc.message, "wrapped");
    let previous = exc.previous.expect("previous is set");
    assert_eq!((previous.class_name.as_str(), previous.message.as_str()), ("DomainException", "original"));
    assert_eq!(ctx.heap().live_count(), 0);
}
