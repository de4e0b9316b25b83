//! End-to-end dispatch scenarios against scripted backends

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use imagegen_dispatch::backend::GenerationBackend;
use imagegen_dispatch::gateway::{Counter, GenerationResult, ProviderUsed};
use imagegen_dispatch::resilience::ErrorKind;

use crate::support::*;

#[tokio::test]
async fn test_primary_success_first_try() {
    let primary = ScriptedBackend::new("primary", vec![], ok_image());
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(3));

    let result = h.dispatcher.generate(request()).await;

    assert!(result.is_ok());
    assert_eq!(result.provider_used(), ProviderUsed::Primary);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
    let stats = h.stats.snapshot();
    assert_eq!(stats.requests, 1);
    assert_eq!(stats.primary_success, 1);
}

#[tokio::test]
async fn test_overloaded_primary_escalates_to_secondary() {
    let primary = ScriptedBackend::new("primary", vec![], http(503, "Service Unavailable"));
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(2));

    let result = h.dispatcher.generate(request()).await;

    match &result {
        GenerationResult::Success(image) => {
            assert_eq!(image.provider, ProviderUsed::Secondary);
            assert_eq!(image.media_type, "image/png");
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 1);

    let stats = h.stats.snapshot();
    assert_eq!(stats.primary_overloads, 3);
    assert_eq!(stats.siege_rounds, 2);
    assert_eq!(stats.secondary_attempts, 1);
    assert_eq!(stats.secondary_success, 1);
    assert_eq!(stats.secondary_failed, 0);
}

#[tokio::test]
async fn test_client_error_is_returned_without_escalation() {
    let primary = ScriptedBackend::new("primary", vec![], http(400, "invalid argument"));
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::HttpError { status: 400 }));
    assert_eq!(result.provider_used(), ProviderUsed::None);
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
    assert_eq!(h.stats.get(Counter::SiegeRounds), 0);
    assert_eq!(h.stats.get(Counter::PrimaryFailed), 1);
}

#[tokio::test]
async fn test_both_backends_timing_out_is_fatal() {
    let primary = ScriptedBackend::with_timing(
        "primary",
        vec![],
        Step::Hang,
        Duration::from_millis(20),
        Duration::ZERO,
    );
    let secondary = ScriptedBackend::with_timing(
        "secondary",
        vec![],
        Step::Hang,
        Duration::from_millis(20),
        Duration::ZERO,
    );
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(2));
    let budget = h.dispatcher.execution_budget();

    let started = Instant::now();
    let result = h.dispatcher.generate(request()).await;
    let elapsed = started.elapsed();

    match result.into_result() {
        Err(failure) => {
            assert_eq!(failure.kind, ErrorKind::Fatal { both_failed: true });
            assert!(failure.message.contains("primary"));
            assert!(failure.message.contains("secondary"));
            assert!(failure.message.contains("deadline"));
        }
        Ok(image) => panic!("expected failure, got {:?}", image.provider),
    }
    assert!(elapsed <= budget, "took {:?}, budget {:?}", elapsed, budget);

    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 1);
    let stats = h.stats.snapshot();
    assert_eq!(stats.primary_timeouts, 3);
    assert_eq!(stats.primary_failed, 1);
    assert_eq!(stats.secondary_failed, 1);
}

#[tokio::test]
async fn test_content_policy_rejection_is_terminal() {
    let primary = ScriptedBackend::new(
        "primary",
        vec![],
        refused("generation blocked for safety (finishReason: IMAGE_SAFETY)"),
    );
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ContentBlocked));
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 0);
    let stats = h.stats.snapshot();
    assert_eq!(stats.siege_rounds, 0);
    assert_eq!(stats.content_blocked, 1);
    assert_eq!(stats.secondary_attempts, 0);
}

#[tokio::test]
async fn test_connection_faults_retried_inside_one_attempt() {
    let primary = ScriptedBackend::new(
        "primary",
        vec![connection_reset(), connection_reset()],
        ok_image(),
    );
    let h = harness(primary.clone(), None, fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.provider_used(), ProviderUsed::Primary);
    assert_eq!(primary.calls(), 3);
    assert_eq!(h.stats.get(Counter::SiegeRounds), 0);
    assert_eq!(h.stats.get(Counter::PrimaryNetworkErrors), 0);
}

#[tokio::test]
async fn test_exhausted_network_retries_start_siege() {
    let primary = ScriptedBackend::new(
        "primary",
        vec![connection_reset(), connection_reset(), connection_reset()],
        ok_image(),
    );
    let h = harness(primary.clone(), None, fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert!(result.is_ok());
    assert_eq!(primary.calls(), 4);
    assert_eq!(h.stats.get(Counter::PrimaryNetworkErrors), 1);
    assert_eq!(h.stats.get(Counter::SiegeRounds), 1);
}

#[tokio::test]
async fn test_primary_recovers_during_siege() {
    let primary = ScriptedBackend::new(
        "primary",
        vec![http(503, ""), http(500, "internal error"), http(503, "")],
        ok_image(),
    );
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.provider_used(), ProviderUsed::Primary);
    assert_eq!(primary.calls(), 4);
    assert_eq!(secondary.calls(), 0);
    let stats = h.stats.snapshot();
    assert_eq!(stats.siege_rounds, 3);
    assert_eq!(stats.primary_overloads, 2);
    assert_eq!(stats.primary_internal_errors, 1);
    assert_eq!(stats.primary_success, 1);
}

#[tokio::test]
async fn test_non_transient_failure_mid_siege_stops() {
    let primary = ScriptedBackend::new(
        "primary",
        vec![http(503, "model is overloaded")],
        http(400, "invalid argument"),
    );
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::HttpError { status: 400 }));
    assert_eq!(primary.calls(), 2);
    assert_eq!(secondary.calls(), 0);
}

#[tokio::test]
async fn test_quota_is_retried_locally_but_never_escalated() {
    let primary = ScriptedBackend::new("primary", vec![], http(429, "RESOURCE_EXHAUSTED"));
    let secondary = ScriptedBackend::new("secondary", vec![], ok_image());
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(5));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::QuotaExceeded));
    // first attempt plus the single quota round
    assert_eq!(primary.calls(), 2);
    assert_eq!(secondary.calls(), 0);
    assert_eq!(h.stats.get(Counter::PrimaryQuotaExceeded), 2);
}

#[tokio::test]
async fn test_without_secondary_last_primary_failure_is_returned() {
    let primary = ScriptedBackend::new("primary", vec![], http(503, ""));
    let h = harness(primary.clone(), None, fast_dispatch(2));

    let result = h.dispatcher.generate(request()).await;

    match result.into_result() {
        Err(failure) => {
            assert_eq!(failure.kind, ErrorKind::Overloaded);
            assert!(failure.user_message().contains("busy"));
        }
        Ok(_) => panic!("expected failure"),
    }
    assert_eq!(primary.calls(), 3);
}

#[tokio::test]
async fn test_secondary_failure_after_escalation_is_fatal() {
    let primary = ScriptedBackend::new("primary", vec![], http(503, ""));
    let secondary = ScriptedBackend::new("secondary", vec![], http(400, "content_policy_violation"));
    let h = harness(primary.clone(), Some(secondary.clone()), fast_dispatch(1));

    let result = h.dispatcher.generate(request()).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Fatal { both_failed: true }));
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    let primary = ScriptedBackend::with_timing(
        "primary",
        vec![],
        ok_image(),
        Duration::from_secs(1),
        Duration::from_millis(5),
    );
    let h = harness(primary.clone(), None, fast_dispatch(1));
    let dispatcher = &h.dispatcher;

    let results = join_all((0..8).map(|_| dispatcher.generate(request()))).await;

    assert!(results.iter().all(GenerationResult::is_ok));
    assert_eq!(primary.calls(), 8);
    assert_eq!(primary.max_in_flight(), 1);
    assert_eq!(dispatcher.limiter().active(), 0);
    assert_eq!(h.stats.get(Counter::PrimarySuccess), 8);
}

#[tokio::test]
async fn test_secondary_invoked_at_most_once_per_request() {
    let primary = ScriptedBackend::new("primary", vec![], http(503, ""));
    let secondary = ScriptedBackend::new("secondary", vec![], http(503, ""));
    let h = harness(primary.clone(), Some(secondary.clone() as Arc<dyn GenerationBackend>), fast_dispatch(1));

    for _ in 0..3 {
        let result = h.dispatcher.generate(request()).await;
        assert!(!result.is_ok());
    }

    assert_eq!(secondary.calls(), 3);
    assert_eq!(h.stats.get(Counter::SecondaryAttempts), 3);
    assert_eq!(h.stats.get(Counter::Requests), 3);
}

#[tokio::test]
async fn test_network_retries_respect_min_time() {
    let min_time = Duration::from_millis(40);
    let primary = ScriptedBackend::new(
        "primary",
        vec![connection_reset(), connection_reset(), http(503, ""), connection_reset()],
        ok_image(),
    );
    let h = spaced_harness(primary.clone(), None, fast_dispatch(3), min_time);

    let first = h.dispatcher.generate(request()).await;
    let second = h.dispatcher.generate(request()).await;

    assert!(first.is_ok());
    assert!(second.is_ok());
    // reset, reset, 503, then a siege round: reset, ok; then the second request
    assert_eq!(primary.calls(), 6);
    assert_eq!(h.stats.get(Counter::SiegeRounds), 1);

    let gaps = primary.start_gaps();
    assert_eq!(gaps.len(), 5);
    for gap in gaps {
        assert!(gap >= min_time, "gap {:?} < min_time {:?}", gap, min_time);
    }
}

