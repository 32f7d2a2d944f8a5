use kiwi_dispatch::framework::mock::MockSession;
use kiwi_dispatch::framework::{Blob, Bound, ElemTag, Envelope, Packet, Session};
use kiwi_dispatch::{Action, ActionError, Args, BusinessException, Kernel, TypeTag};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn kernel() -> Arc<Kernel> {
    Kernel::builder().build().expect("Failed to build kernel")
}

fn session() -> Arc<dyn Session> {
    MockSession::new("it-session")
}

async fn call(kernel: &Kernel, action: &Action, params: Value) -> Envelope {
    let Value::Object(map) = params else {
        panic!("params must be an object");
    };
    let request = kernel
        .request(action.title(), session())
        .params(map)
        .build()
        .expect("Failed to build request");
    kernel
        .dispatch(action, request)
        .await
        .expect("Dispatch failed")
        .into_envelope()
        .expect("Expected a JSON packet")
}

async fn typed_handler(args: Args) -> Result<Value, ActionError> {
    Ok(json!({
        "a": args.get::<i64>("ai")?,
        "b": args.get::<String>("bs")?,
        "c": args.get::<bool>("cb")?,
        "d": args.get::<f64>("df")?,
    }))
}

/// Wire strings and numbers are coerced to the declared types.
#[tokio::test]
async fn test_typed_coercion() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "typed")
                .param("ai", TypeTag::Int)
                .param("bs", TypeTag::Str)
                .param("cb", TypeTag::Bool)
                .param("df", TypeTag::Float)
                .handler(typed_handler),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({"ai": "1", "bs": 1, "cb": "false", "df": "1.0"})).await;
    assert_eq!(envelope.ret, 0);
    assert_eq!(envelope.result, json!({"a": 1, "b": "1", "c": false, "d": 1.0}));
    assert_eq!(envelope.cmd, "demo.typed");
}

/// Absent parameters bind their declared defaults.
#[tokio::test]
async fn test_defaults() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "typed")
                .param_default("ai", TypeTag::Int, 1)
                .param_default("bs", TypeTag::Str, "1")
                .param_default("cb", TypeTag::Bool, false)
                .param_default("df", TypeTag::Float, 1.0)
                .handler(typed_handler),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({})).await;
    assert_eq!(envelope.ret, 0);
    assert_eq!(envelope.result, json!({"a": 1, "b": "1", "c": false, "d": 1.0}));
}

/// A required parameter that is absent aborts before the handler runs.
#[tokio::test]
async fn test_missing_parameter() {
    let kernel = kernel();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let action = kernel
        .register(Action::builder("demo", "need").param("a", TypeTag::Int).handler(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ActionError>(())
            }
        }))
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({})).await;
    assert_eq!(envelope.ret, 1113);
    assert!(envelope.error.as_deref().is_some_and(|e| e.contains('a')));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Business failures pass through with their code and message.
#[tokio::test]
async fn test_business_passthrough() {
    let kernel = kernel();
    let action = kernel
        .register(Action::builder("demo", "guarded").handler(|_| async {
            Err::<(), ActionError>(BusinessException::new(401, "unauthorized").into())
        }))
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({})).await;
    assert_eq!(envelope.ret, 401);
    assert_eq!(envelope.error.as_deref(), Some("unauthorized"));
    assert_eq!(envelope.result, json!({"success": false}));

    let wire: Value = serde_json::from_slice(&envelope.to_wire(false).expect("Failed to serialize"))
        .expect("Wire output is not JSON");
    assert_eq!(wire["ret"], 401);
    assert_eq!(wire["error"], "unauthorized");
    assert!(wire.get("debug").is_none());
}

/// Binding stops at the first bad parameter.
#[tokio::test]
async fn test_fail_fast() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "pair")
                .param("x", TypeTag::Int)
                .param("y", TypeTag::Bool)
                .handler(|_| async { Ok::<_, ActionError>(()) }),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({"x": "many", "y": "maybe"})).await;
    assert_eq!(envelope.ret, 1104);

    let envelope = call(&kernel, &action, json!({"x": 3, "y": "maybe"})).await;
    assert_eq!(envelope.ret, 1106);
}

/// The same request dispatched twice yields byte-identical output.
#[tokio::test]
async fn test_determinism() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "echo")
                .param("ids", TypeTag::Array(ElemTag::Int))
                .handler(|args: Args| async move { Ok::<_, ActionError>(json!({"ids": args.get::<Vec<i64>>("ids")?})) }),
        )
        .expect("Failed to register");

    let request = kernel
        .request("demo.echo", session())
        .param("ids", "3,1,2")
        .build()
        .expect("Failed to build request");
    let first = kernel.dispatch(&action, request.clone()).await.expect("Dispatch failed");
    let second = kernel.dispatch(&action, request).await.expect("Dispatch failed");
    assert_eq!(
        first.to_write_data(true).expect("Failed to serialize"),
        second.to_write_data(true).expect("Failed to serialize")
    );
}

/// Booleans come back the way they went in.
#[tokio::test]
async fn test_boolean_round_trip() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "flag")
                .param("on", TypeTag::Bool)
                .handler(|args: Args| async move { args.get::<bool>("on") }),
        )
        .expect("Failed to register");

    for (input, expected) in [(json!("true"), "true"), (json!("FALSE"), "false"), (json!(true), "true")] {
        let envelope = call(&kernel, &action, json!({ "on": input })).await;
        assert_eq!(envelope.ret, 0);
        assert_eq!(envelope.result, json!({ "msg": expected }));
    }
}

/// Arrays accept a JSON array and a comma-separated list alike.
#[tokio::test]
async fn test_array_dual_grammar() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "sum")
                .param("ids", TypeTag::Array(ElemTag::Int))
                .handler(|args: Args| async move {
                    let ids: Vec<i64> = args.get("ids")?;
                    Ok::<_, ActionError>(json!({ "sum": ids.iter().sum::<i64>() }))
                }),
        )
        .expect("Failed to register");

    for input in [json!("1,2,3"), json!("[1,2,3]"), json!([1, "2", 3]), json!(" 1 , 2,3 ")] {
        let envelope = call(&kernel, &action, json!({ "ids": input })).await;
        assert_eq!(envelope.result, json!({"sum": 6}), "input {input}");
    }

    let envelope = call(&kernel, &action, json!({"ids": "1,x"})).await;
    assert_eq!(envelope.ret, 1107);
}

/// Values outside a declared domain are refused with 1120.
#[tokio::test]
async fn test_domain_enforcement() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "speed")
                .domain("mode", TypeTag::Str, ["fast", "slow"])
                .handler(|args: Args| async move { args.get::<String>("mode") }),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({"mode": "slow"})).await;
    assert_eq!(envelope.result, json!({"msg": "slow"}));

    let envelope = call(&kernel, &action, json!({"mode": "medium"})).await;
    assert_eq!(envelope.ret, 1120);
}

/// A set declared with a domain is bound by the domain-aware injector.
#[tokio::test]
async fn test_last_match_wins() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "tags")
                .domain("tags", TypeTag::Set(ElemTag::Str), ["a", "b"])
                .handler(|args: Args| async move {
                    let tags: std::collections::BTreeSet<String> = args.get("tags")?;
                    Ok::<_, ActionError>(json!({ "tags": tags }))
                }),
        )
        .expect("Failed to register");
    let kinds: Vec<&str> = action.injectors().iter().map(|i| i.kind()).collect();
    assert_eq!(kinds, vec!["temp_enum_set"]);

    let envelope = call(&kernel, &action, json!({"tags": "b,a,b"})).await;
    assert_eq!(envelope.result, json!({"tags": ["a", "b"]}));

    let envelope = call(&kernel, &action, json!({"tags": "a,c"})).await;
    assert_eq!(envelope.ret, 1120);
}

/// Reserved names are bound from the request, never from the wire.
#[tokio::test]
async fn test_reserved_parameters() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "whoami")
                .param("__session", TypeTag::Named("session"))
                .handler(|args: Args| async move {
                    let session: Arc<dyn Session> = args.get("__session")?;
                    Ok::<_, ActionError>(session.id().to_owned())
                }),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({"__session": "spoofed"})).await;
    assert_eq!(envelope.result, json!({"msg": "it-session"}));
}

/// Registering twice builds the same injector list.
#[tokio::test]
async fn test_idempotent_registration() {
    let kernel = kernel();
    let build = || {
        Action::builder("demo", "twice")
            .param("n", TypeTag::Int)
            .nullable("note", TypeTag::Str)
            .handler(|_| async { Ok::<_, ActionError>(()) })
    };
    let first = kernel.register(build()).expect("Failed to register");
    let second = kernel.register(build()).expect("Failed to register");
    assert_eq!(first.to_string(), second.to_string());
    let kinds = |a: &Action| a.injectors().iter().map(|i| i.kind()).collect::<Vec<_>>();
    assert_eq!(kinds(&first), kinds(&second));
}

/// A handler returning a packet keeps its status and gets request metadata.
#[tokio::test]
async fn test_packet_passthrough() {
    let kernel = kernel();
    let action = kernel
        .register(Action::builder("demo", "teapot").handler(|_| async {
            Ok::<_, ActionError>(Packet::from(Envelope::ok(json!({"tea": true})).with_status(418)))
        }))
        .expect("Failed to register");

    let request = kernel.request("demo.teapot", session()).build().expect("Failed to build request");
    let seq = request.seq() as i64;
    let packet = kernel.dispatch(&action, request).await.expect("Dispatch failed");
    assert_eq!(packet.status(), 418);
    let envelope = packet.into_envelope().expect("Expected a JSON packet");
    assert_eq!(envelope.cmd, "demo.teapot");
    assert_eq!(envelope.seq, seq);
    assert!(envelope.received_at_ms > 0);
}

/// Transport-supplied `__name` values never come from the client.
#[tokio::test]
async fn test_framework_value_missing() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "origin")
                .param("__ip", TypeTag::Str)
                .handler(|args: Args| async move { args.get::<String>("__ip") }),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({"__ip": "1.2.3.4"})).await;
    assert_eq!(envelope.ret, 1114);
    assert!(envelope.debug.as_deref().is_some_and(|d| d.contains("__ip")));

    let request = kernel
        .request("demo.origin", session())
        .param("__ip", "1.2.3.4")
        .framework_value("__ip", Bound::Str("10.0.0.1".to_owned()))
        .build()
        .expect("Failed to build request");
    let envelope = kernel
        .dispatch(&action, request)
        .await
        .expect("Dispatch failed")
        .into_envelope()
        .expect("Expected a JSON packet");
    assert_eq!(envelope.ret, 0);
    assert_eq!(envelope.result, json!({"msg": "10.0.0.1"}));
}

/// Bytes parameters must be base64; anything else answers 401.
#[tokio::test]
async fn test_invalid_bytes_parameter() {
    let kernel = kernel();
    let action = kernel
        .register(
            Action::builder("demo", "upload")
                .param("b", TypeTag::Bytes)
                .handler(|args: Args| async move {
                    let blob: Blob = args.get("b")?;
                    Ok::<_, ActionError>(json!({ "len": blob.0.len() }))
                }),
        )
        .expect("Failed to register");

    let envelope = call(&kernel, &action, json!({"b": "a2l3aQ=="})).await;
    assert_eq!(envelope.ret, 0);
    assert_eq!(envelope.result, json!({"len": 4}));

    let envelope = call(&kernel, &action, json!({"b": "!!!notb64"})).await;
    assert_eq!(envelope.ret, 401);
    assert_eq!(envelope.error.as_deref(), Some("parameter [b] is not a valid base64 string"));
}
