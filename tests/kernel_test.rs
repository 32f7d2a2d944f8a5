use kiwi_dispatch::framework::mock::{MockSession, RecordingHooks};
use kiwi_dispatch::framework::{Bound, ChunkWriter, DeclarationError, DispatchError, HtmlPacket, Packet};
use kiwi_dispatch::injector::{validated, Declaration, Injector};
use kiwi_dispatch::{Action, ActionError, Args, DispatchConfig, Kernel, TypeTag};
use serde_json::json;
use std::sync::Arc;

/// Upper-cases text; accepts only `TypeTag::Named("upper")` declarations.
#[derive(Debug, Clone)]
struct UpperInjector {
    declaration: Declaration,
}

impl Injector for UpperInjector {
    fn kind(&self) -> &'static str {
        "upper"
    }

    fn declaration(&self) -> &Declaration {
        &self.declaration
    }

    fn declaration_mut(&mut self) -> &mut Declaration {
        &mut self.declaration
    }

    fn verify_type(&self) -> Result<(), DeclarationError> {
        match self.declaration.type_tag {
            TypeTag::Named("upper") => Ok(()),
            _ => Err(DeclarationError::UnsupportedType {
                kind: "upper",
                found: self.declaration.type_tag.to_string(),
            }),
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError> {
        Ok(Bound::Str(text.to_uppercase()))
    }
}

fn noop_action(module: &str, name: &str) -> Action {
    Action::builder(module, name).handler(|_| async { Ok::<_, ActionError>(()) })
}

/// Finalisation flushes the session exactly once per dispatch.
#[tokio::test]
async fn test_session_flushed_once() {
    let kernel = Kernel::builder().build().expect("Failed to build kernel");
    let action = kernel.register(noop_action("demo", "noop")).expect("Failed to register");
    let session = MockSession::new("s1");

    for _ in 0..3 {
        let request = kernel.request("demo.noop", session.clone()).build().expect("Failed to build request");
        kernel.dispatch(&action, request).await.expect("Dispatch failed");
    }
    assert_eq!(session.flushes(), 3);
}

/// A failing flush is logged and leaves the response alone.
#[tokio::test]
async fn test_flush_failure_keeps_response() {
    let kernel = Kernel::builder().build().expect("Failed to build kernel");
    let action = kernel
        .register(Action::builder("demo", "hello").handler(|_| async { Ok::<_, ActionError>("hi") }))
        .expect("Failed to register");
    let session = MockSession::failing("s2");

    let request = kernel.request("demo.hello", session.clone()).build().expect("Failed to build request");
    let packet = kernel.dispatch(&action, request).await.expect("Dispatch failed");
    assert_eq!(packet.ret(), 0);
    assert_eq!(session.flushes(), 1);
}

/// Pre-hooks may answer on the handler's behalf; finalisation still runs.
#[tokio::test]
async fn test_pre_hook_short_circuit() {
    let hooks = RecordingHooks::new();
    hooks.expect_before().respond(Packet::Html(HtmlPacket::need_auth("kiwi")));
    hooks.expect_before().skip();
    hooks.expect_before().proceed();

    let kernel = Kernel::builder().hooks(hooks.clone()).build().expect("Failed to build kernel");
    let action = kernel
        .register(
            Action::builder("user", "find")
                .param("uid", TypeTag::Int)
                .handler(|args: Args| async move { Ok::<_, ActionError>(json!({ "uid": args.get::<i64>("uid")? })) }),
        )
        .expect("Failed to register");
    let session = MockSession::new("s3");

    // Respond: the handler is bypassed, even though `uid` is missing
    let request = kernel.request("user.find", session.clone()).build().expect("Failed to build request");
    let packet = kernel.dispatch(&action, request).await.expect("Dispatch failed");
    assert_eq!(packet.status(), 401);

    // Skip: an empty success envelope
    let request = kernel.request("user.find", session.clone()).build().expect("Failed to build request");
    let envelope = kernel
        .dispatch(&action, request)
        .await
        .expect("Dispatch failed")
        .into_envelope()
        .expect("Expected a JSON packet");
    assert_eq!(envelope.ret, 0);
    assert_eq!(envelope.result, json!({}));

    // Continue: normal binding
    let request = kernel
        .request("user.find", session.clone())
        .param("uid", "7")
        .build()
        .expect("Failed to build request");
    let envelope = kernel
        .dispatch(&action, request)
        .await
        .expect("Dispatch failed")
        .into_envelope()
        .expect("Expected a JSON packet");
    assert_eq!(envelope.result, json!({"uid": 7}));

    hooks.verify();
    assert_eq!(hooks.befores().len(), 3);
    assert_eq!(
        hooks.afters(),
        vec![
            ("user.find".to_string(), 0),
            ("user.find".to_string(), 0),
            ("user.find".to_string(), 0)
        ]
    );
    assert_eq!(session.flushes(), 3);
}

/// A panicking handler answers -2 instead of taking the task down.
#[tokio::test]
async fn test_panic_is_contained() {
    let kernel = Kernel::builder().build().expect("Failed to build kernel");
    let action = kernel
        .register(Action::builder("demo", "boom").handler(|_| async {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, ActionError>(())
        }))
        .expect("Failed to register");
    let session = MockSession::new("s4");

    let request = kernel.request("demo.boom", session.clone()).build().expect("Failed to build request");
    let envelope = kernel
        .dispatch(&action, request)
        .await
        .expect("Dispatch failed")
        .into_envelope()
        .expect("Expected a JSON packet");
    assert_eq!(envelope.ret, -2);
    assert_eq!(envelope.error.as_deref(), Some("server error"));
    assert!(envelope.debug.as_deref().is_some_and(|d| d.contains("handler exploded")));
    assert_eq!(session.flushes(), 1);
}

/// Strict mode hands fatal failures back after finalisation.
#[tokio::test]
async fn test_strict_mode_surfaces_fatal_errors() {
    let kernel = Kernel::builder()
        .config(DispatchConfig::default().strict(true))
        .build()
        .expect("Failed to build kernel");
    let broken = kernel
        .register(Action::builder("demo", "broken").handler(|_| async {
            Err::<(), _>(ActionError::assertion("ledger out of balance"))
        }))
        .expect("Failed to register");
    let boom = kernel
        .register(Action::builder("demo", "boom").handler(|_| async {
            if true {
                panic!("strict boom");
            }
            Ok::<_, ActionError>(())
        }))
        .expect("Failed to register");
    let session = MockSession::new("s5");

    let request = kernel.request("demo.broken", session.clone()).build().expect("Failed to build request");
    match kernel.dispatch(&broken, request).await {
        Err(DispatchError::Fatal { cmd, source }) => {
            assert_eq!(cmd, "demo.broken");
            assert!(matches!(source, ActionError::Assertion(_)));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.flushes(), 1);

    let request = kernel.request("demo.boom", session.clone()).build().expect("Failed to build request");
    let joined = kernel.spawn(boom, request).await;
    assert!(joined.expect_err("panic should be resumed").is_panic());
    assert_eq!(session.flushes(), 2);
}

/// Business failures never trip strict mode.
#[tokio::test]
async fn test_strict_mode_ignores_business_failures() {
    let kernel = Kernel::builder()
        .config(DispatchConfig::default().strict(true))
        .build()
        .expect("Failed to build kernel");
    let action = kernel
        .register(Action::builder("demo", "need").param("a", TypeTag::Int).handler(|_| async {
            Ok::<_, ActionError>(())
        }))
        .expect("Failed to register");

    let request = kernel.request("demo.need", MockSession::new("s6")).build().expect("Failed to build request");
    let packet = kernel.dispatch(&action, request).await.expect("Business failures are not fatal");
    assert_eq!(packet.ret(), 1113);
}

/// Streaming handlers produce chunks; a text return becomes the last line.
#[tokio::test]
async fn test_streaming_output() {
    let kernel = Kernel::builder().build().expect("Failed to build kernel");
    let action = kernel
        .register(
            Action::builder("report", "lines")
                .param_default("count", TypeTag::Int, 2)
                .param("__stream", TypeTag::Named("stream"))
                .stream()
                .handler(|args: Args| async move {
                    let out: ChunkWriter = args.get("__stream")?;
                    for n in 1..=args.get::<i64>("count")? {
                        out.write(format!("row {n}")).await?;
                        out.write("\n").await?;
                    }
                    out.write("partial").await?;
                    Ok::<_, ActionError>("done")
                }),
        )
        .expect("Failed to register");

    let request = kernel
        .request("report.lines", MockSession::new("s7"))
        .build()
        .expect("Failed to build request");
    let packet = kernel.dispatch(&action, request).await.expect("Dispatch failed");
    let reader = packet.into_chunk_reader().expect("Expected a chunk packet");
    let body = String::from_utf8(reader.collect().await).expect("Chunks are UTF-8");
    assert_eq!(body, "row 1\nrow 2\npartial\ndone");
}

/// Custom injectors and reserved names join the registries at startup.
#[tokio::test]
async fn test_custom_injector_and_reserved_name() {
    let kernel = Kernel::builder()
        .injector("upper", |declaration| validated(UpperInjector { declaration }))
        .reserved("__tenant", |_| Ok(Bound::Str("acme".to_owned())))
        .build()
        .expect("Failed to build kernel");
    let action = kernel
        .register(
            Action::builder("demo", "shout")
                .param("word", TypeTag::Named("upper"))
                .param("__tenant", TypeTag::Str)
                .handler(|args: Args| async move {
                    Ok::<_, ActionError>(json!({
                        "word": args.get::<String>("word")?,
                        "tenant": args.get::<String>("__tenant")?,
                    }))
                }),
        )
        .expect("Failed to register");
    let kinds: Vec<&str> = action.injectors().iter().map(|i| i.kind()).collect();
    assert_eq!(kinds, vec!["upper", "reserved"]);

    let request = kernel
        .request("demo.shout", MockSession::new("s8"))
        .param("word", "kiwi")
        .build()
        .expect("Failed to build request");
    let envelope = kernel
        .dispatch(&action, request)
        .await
        .expect("Dispatch failed")
        .into_envelope()
        .expect("Expected a JSON packet");
    assert_eq!(envelope.result, json!({"word": "KIWI", "tenant": "acme"}));
}

/// Duplicate injector names stop startup.
#[test]
fn test_duplicate_injector_rejected() {
    let err = Kernel::builder()
        .injector("int", |declaration| validated(UpperInjector { declaration }))
        .build()
        .expect_err("Duplicate injector should fail");
    assert_eq!(err.to_string(), "injector [int] is already registered");
}

/// Requests run concurrently on their own tasks.
#[tokio::test]
async fn test_concurrent_dispatch() {
    let kernel = Kernel::builder().build().expect("Failed to build kernel");
    let action = kernel
        .register(
            Action::builder("math", "double")
                .param("n", TypeTag::Int)
                .handler(|args: Args| async move { Ok::<_, ActionError>(json!({ "n": args.get::<i64>("n")? * 2 })) }),
        )
        .expect("Failed to register");
    let session = MockSession::new("s9");

    let handles: Vec<_> = (0..16_i64)
        .map(|n| {
            let request = kernel
                .request("math.double", session.clone())
                .param("n", n)
                .build()
                .expect("Failed to build request");
            kernel.spawn(action.clone(), request)
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let packet = handle.await.expect("Task panicked").expect("Dispatch failed");
        let envelope = packet.into_envelope().expect("Expected a JSON packet");
        assert_eq!(envelope.result, json!({ "n": n as i64 * 2 }));
    }
    assert_eq!(session.flushes(), 16);
}
