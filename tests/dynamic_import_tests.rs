//! Integration tests for dynamic imports and background resolution
mod common;

use std::time::Duration;

use common::{module_tree, Fixture, TestEngine};
use framehost::engine::{PromiseKey, PromiseState};
use framehost::host::{reject, resolve_value, Resolution, CONSOLE_REFERRER};
use framehost::{ScriptEngine, ScriptError, ScriptHost};
use serde_json::json;

mod dynamic_imports {
    use super::*;

    #[test]
    fn test_concurrent_imports_share_one_load() {
        let dir = module_tree(&[
            ("main.js", ""),
            ("lib/util.js", "export const version = 3;\n"),
        ]);
        let mut fx = Fixture::new(dir.path());
        fx.host.load_main_module("main.js");
        let referrer = dir.path().join("main.js").to_string_lossy().into_owned();

        let first = fx.host.import_dynamic(&referrer, "./lib/util.js");
        let second = fx.host.import_dynamic(&referrer, "./lib/../lib/util.js");
        assert_eq!(first, second);
        assert_eq!(fx.host.dynamic_imports_in_flight(), 1);
        assert!(fx.host.engine().promise_state(first).is_pending());

        fx.drain();
        assert_eq!(fx.host.engine().compile_count("lib/util.js"), 1);
        assert_eq!(
            fx.host.engine().promise_state(first),
            PromiseState::Fulfilled(json!({"version": 3}))
        );
        assert_eq!(fx.host.dynamic_imports_in_flight(), 0);
    }

    #[test]
    fn test_import_after_settlement_reuses_module() {
        let dir = module_tree(&[("a.js", "export const n = 1;\n")]);
        let mut fx = Fixture::new(dir.path());
        let first = fx.host.import_dynamic(CONSOLE_REFERRER, "./a.js");
        fx.drain();
        let second = fx.host.import_dynamic(CONSOLE_REFERRER, "./a.js");
        assert_ne!(first, second);
        fx.drain();
        assert_eq!(fx.host.engine().compile_count("a.js"), 1);
        assert_eq!(
            fx.host.engine().promise_state(second),
            PromiseState::Fulfilled(json!({"n": 1}))
        );
    }

    #[test]
    fn test_invalid_specifier_rejects_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let promise = fx.host.import_dynamic(CONSOLE_REFERRER, "fs");
        match fx.host.engine().promise_state(promise) {
            PromiseState::Rejected(error) => assert_eq!(
                error.message,
                "Invalid module name: 'fs'. Valid imports must begin with ./ or ../"
            ),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(fx.drain(), 0);
    }

    #[test]
    fn test_failed_import_rejects_and_can_retry() {
        let dir = module_tree(&[("broken.js", "syntax error here\n")]);
        let mut fx = Fixture::new(dir.path());
        let promise = fx.host.import_dynamic(CONSOLE_REFERRER, "./broken.js");
        fx.drain();
        match fx.host.engine().promise_state(promise) {
            PromiseState::Rejected(error) => {
                assert!(error.message.starts_with("SyntaxError: Unexpected identifier"));
                assert!(error.message.contains("loading broken.js"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(fx.host.module_count(), 0);

        std::fs::write(dir.path().join("broken.js"), "export const fixed = true;\n").unwrap();
        let retry = fx.host.import_dynamic(CONSOLE_REFERRER, "./broken.js");
        fx.drain();
        assert_eq!(
            fx.host.engine().promise_state(retry),
            PromiseState::Fulfilled(json!({"fixed": true}))
        );
    }

    #[test]
    fn test_suspended_module_resolves_after_await() {
        let dir = module_tree(&[("slow.js", "await later();\nexport const ready = true;\n")]);
        let mut fx = Fixture::new(dir.path());
        let promise = fx.host.import_dynamic(CONSOLE_REFERRER, "./slow.js");
        fx.drain();
        assert!(fx.host.engine().promise_state(promise).is_pending());
        assert_eq!(fx.host.dynamic_imports_in_flight(), 1);

        // A second import while suspended joins the same request.
        assert_eq!(fx.host.import_dynamic(CONSOLE_REFERRER, "./slow.js"), promise);

        let tla = fx.host.engine().top_level_await("slow.js").unwrap();
        fx.host.engine_mut().resolve_promise(tla, json!(null));
        fx.host.checkpoint();
        assert_eq!(
            fx.host.engine().promise_state(promise),
            PromiseState::Fulfilled(json!({"ready": true}))
        );
        assert_eq!(fx.host.dynamic_imports_in_flight(), 0);
    }
}

mod background {
    use super::*;

    #[test]
    fn test_background_result_resolves_promise() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let promise = fx
            .host
            .post_to_background_and_resolve(|| resolve_value(json!(6 * 7)));
        assert_eq!(fx.host.pending_results(), 1);

        let settled = fx.drain_until(Duration::from_secs(5), |host| {
            !host.engine().promise_state(promise).is_pending()
        });
        assert!(settled);
        assert_eq!(fx.host.engine().promise_state(promise), PromiseState::Fulfilled(json!(42)));
        assert_eq!(fx.host.pending_results(), 0);
    }

    #[test]
    fn test_background_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let promise = fx
            .host
            .post_to_background_and_resolve(|| reject("Error: decode failed"));
        assert!(fx.drain_until(Duration::from_secs(5), |host| {
            !host.engine().promise_state(promise).is_pending()
        }));
        fx.host.report_unhandled_rejections();
        assert_eq!(fx.recorder.messages(), vec!["Error: decode failed".to_string()]);
    }

    #[test]
    fn test_failing_continuation_rejects_pending_promise() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let promise = fx.host.post_to_background_and_resolve(|| {
            let resolution: Resolution<TestEngine> =
                Box::new(|_host: &mut ScriptHost<TestEngine>, _promise: PromiseKey| {
                    Err(ScriptError::new("TypeError: bad pixels"))
                });
            resolution
        });
        assert!(fx.drain_until(Duration::from_secs(5), |host| {
            !host.engine().promise_state(promise).is_pending()
        }));
        match fx.host.engine().promise_state(promise) {
            PromiseState::Rejected(error) => assert_eq!(error.message, "TypeError: bad pixels"),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_handled_rejection_is_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let promise = fx.host.engine_mut().create_promise();
        fx.host
            .engine_mut()
            .reject_promise(promise, ScriptError::new("Error: caught later"));
        fx.host.engine_mut().handle_rejection(promise);
        fx.host.report_unhandled_rejections();
        assert!(fx.recorder.messages().is_empty());
    }
}
