//! Guard scenarios driven by a manual clock.

use std::sync::Arc;

use txguard_acl::{AccessControlStore, MemoryKvStore};
use txguard_core::error::GuardError;
use txguard_core::types::{DeviceClass, RequestKind};
use txguard_policy::{AgentState, GuardConfig, RejectReason, RuleViolation, Verdict};
use txguard_tests::helpers::*;

// ---------------------------------------------------------------------------
// Sybil state machine through the full pipeline
// ---------------------------------------------------------------------------

#[test]
fn forty_nine_signers_never_evaluate() {
    let (guard, _clock) = manual_guard();
    let from = ip(1);
    associate(&guard, from, 48);

    // 49th distinct signer submits: 49 is not above the threshold.
    assert!(guard.inspect(&put_request(addr(48), from)).is_proceed());
    assert!(guard.inspect(&put_request(addr(48), from)).is_proceed());
    assert_eq!(guard.registry().count(&from), 49);
    assert_eq!(guard.detector().status(&addr(48)), None);
    assert!(!guard.is_staging_banned(&addr(48)));
}

#[test]
fn fiftieth_signer_tracks_then_manages_then_restores() {
    let (guard, clock) = manual_guard();
    let from = ip(2);
    let agent = addr(49);
    associate(&guard, from, 49);

    // t0: the 50th distinct signer on the IP starts tracking.
    assert!(guard.inspect(&put_request(agent, from)).is_proceed());
    assert_eq!(
        guard.detector().status(&agent),
        Some(AgentState::Tracked { interval_start: t0() })
    );
    assert!(!guard.is_staging_banned(&agent));

    // t0+5m: re-triggered inside the window.
    clock.advance(minutes(5));
    assert!(guard.inspect(&put_request(agent, from)).is_proceed());
    assert_eq!(
        guard.detector().status(&agent),
        Some(AgentState::Managed { since: t0() + minutes(5) })
    );
    assert_eq!(guard.stage_gate().banned_at(&agent), Some(t0() + minutes(5)));

    // t0+14m: nine minutes into management, still banned.
    clock.advance(minutes(9));
    guard.inspect(&put_request(agent, from));
    assert!(guard.is_staging_banned(&agent));

    // t0+15m: management period over.
    clock.advance(minutes(1));
    guard.inspect(&put_request(agent, from));
    assert!(!guard.is_staging_banned(&agent));
    assert_eq!(
        guard.detector().status(&agent),
        Some(AgentState::Restored { interval_start: t0() + minutes(5) })
    );

    // t0+16m: restored signers restart the window instead of re-banning.
    clock.advance(minutes(1));
    guard.inspect(&put_request(agent, from));
    assert!(!guard.is_staging_banned(&agent));
    assert_eq!(
        guard.detector().status(&agent),
        Some(AgentState::Tracked { interval_start: t0() + minutes(16) })
    );
}

#[test]
fn quiet_window_resets_instead_of_managing() {
    let (guard, clock) = manual_guard();
    let from = ip(3);
    let agent = addr(60);
    associate(&guard, from, 49);

    guard.inspect(&put_request(agent, from));
    clock.advance(minutes(10));
    guard.inspect(&put_request(agent, from));

    assert!(!guard.is_staging_banned(&agent));
    assert_eq!(
        guard.detector().status(&agent),
        Some(AgentState::Tracked { interval_start: t0() + minutes(10) })
    );
}

#[test]
fn graphql_staging_counts_as_submission() {
    let (guard, clock) = manual_guard();
    let from = ip(4);
    let agent = addr(70);
    associate(&guard, from, 49);

    let verdict = guard.inspect(&stage_request(agent, from));
    let Verdict::Proceed(classified) = verdict else {
        panic!("staging request rejected");
    };
    assert_eq!(classified.kind, RequestKind::StageTransaction);
    assert_eq!(classified.signer, Some(agent));
    assert_eq!(classified.action_name.as_deref(), Some("daily_reward"));

    clock.advance(minutes(1));
    guard.inspect(&stage_request(agent, from));
    assert!(guard.is_staging_banned(&agent));
}

#[test]
fn nonce_lookups_associate_but_never_ban() {
    let (guard, clock) = manual_guard();
    let from = ip(5);
    associate(&guard, from, 60);

    for _ in 0..3 {
        clock.advance(minutes(1));
        guard.inspect(&nonce_request(addr(59), from));
    }
    assert_eq!(guard.registry().count(&from), 60);
    assert!(guard.detector().is_empty());
    assert!(guard.stage_gate().is_empty());
}

#[test]
fn signers_are_tracked_per_ip() {
    let (guard, clock) = manual_guard();
    let crowded = ip(6);
    let quiet = ip(7);
    let agent = addr(49);
    associate(&guard, crowded, 49);

    guard.inspect(&put_request(agent, quiet));
    clock.advance(minutes(1));
    guard.inspect(&put_request(agent, quiet));

    assert_eq!(guard.registry().count(&quiet), 1);
    assert_eq!(guard.detector().status(&agent), None);
}

#[test]
fn release_returns_managed_signer_to_clean() {
    let (guard, clock) = manual_guard();
    let from = ip(8);
    let agent = addr(49);
    associate(&guard, from, 49);
    guard.inspect(&put_request(agent, from));
    clock.advance(minutes(2));
    guard.inspect(&put_request(agent, from));
    assert!(guard.is_staging_banned(&agent));

    assert!(guard.release_agent(&agent));
    assert!(!guard.is_staging_banned(&agent));
    assert_eq!(guard.detector().status(&agent), None);
    assert!(!guard.release_agent(&agent));
}

#[test]
fn lower_threshold_from_config() {
    let config = GuardConfig { association_threshold: 2, ..GuardConfig::default() };
    let (guard, clock) = manual_guard_with(&config);
    let from = ip(9);
    associate(&guard, from, 2);

    guard.inspect(&put_request(addr(2), from));
    clock.advance(minutes(1));
    guard.inspect(&put_request(addr(2), from));
    assert!(guard.is_staging_banned(&addr(2)));
}

// ---------------------------------------------------------------------------
// Access control in the pipeline
// ---------------------------------------------------------------------------

#[test]
fn denied_signer_is_rejected_on_every_signed_kind() {
    let acl = Arc::new(AccessControlStore::new(MemoryKvStore::new()));
    acl.deny(&addr(1)).unwrap();
    let (guard, _clock) = manual_guard();
    let guard = guard.with_access_policy(acl);

    for request in [
        nonce_request(addr(1), ip(10)),
        add_client_request(addr(1), ip(10)),
        put_request(addr(1), ip(10)),
        stage_request(addr(1), ip(10)),
    ] {
        match guard.inspect(&request) {
            Verdict::Reject(RejectReason::AccessDenied(a)) => assert_eq!(a, addr(1)),
            other => panic!("expected access denial, got {other:?}"),
        }
    }
    assert!(guard.inspect(&put_request(addr(2), ip(10))).is_proceed());
}

#[test]
fn anyone_may_query_a_denied_account() {
    let acl = Arc::new(AccessControlStore::new(MemoryKvStore::new()));
    acl.deny(&addr(1)).unwrap();
    let (guard, _clock) = manual_guard();
    let guard = guard.with_access_policy(acl);

    assert!(guard.inspect(&agent_query(addr(1), ip(12))).is_proceed());
    assert!(guard.inspect(&agent_query(addr(1), ip(13))).is_proceed());
    assert_eq!(guard.clients().state_queries(&addr(1)), 2);
}

#[test]
fn whitelisted_signer_is_never_managed() {
    let acl = Arc::new(AccessControlStore::new(MemoryKvStore::new()));
    let agent = addr(49);
    acl.allow_whitelist(&agent).unwrap();
    let (guard, clock) = manual_guard();
    let guard = guard.with_access_policy(acl);
    let from = ip(11);
    associate(&guard, from, 49);

    for _ in 0..5 {
        assert!(guard.inspect(&put_request(agent, from)).is_proceed());
        clock.advance(minutes(1));
    }
    assert!(!guard.is_staging_banned(&agent));
    assert_eq!(guard.detector().status(&agent), None);
}

#[test]
fn unavailable_store_admits_requests() {
    let acl = Arc::new(AccessControlStore::new(MemoryKvStore::new()));
    acl.deny(&addr(1)).unwrap();
    acl.backend().set_available(false);
    let (guard, _clock) = manual_guard();
    let guard = guard.with_access_policy(acl);

    assert!(guard.inspect(&put_request(addr(1), ip(12))).is_proceed());
}

// ---------------------------------------------------------------------------
// IP ban escalation
// ---------------------------------------------------------------------------

fn violation(from: std::net::IpAddr, count: u64) -> RuleViolation {
    RuleViolation {
        ip: from,
        rule: "*:/graphql".to_string(),
        limit: 100,
        period: "1m".to_string(),
        count,
        monitor_mode: false,
    }
}

#[test]
fn overage_below_threshold_keeps_ip() {
    let (guard, _clock) = manual_guard();
    assert!(!guard.on_rule_violation(&violation(ip(20), 109)));
    assert!(guard.inspect(&put_request(addr(1), ip(20))).is_proceed());
}

#[test]
fn overage_at_threshold_bans_ip_before_any_other_check() {
    let (guard, _clock) = manual_guard();
    let banned = ip(21);
    assert!(guard.on_rule_violation(&violation(banned, 110)));

    let verdict = guard.inspect(&put_request(addr(1), banned));
    assert_eq!(verdict.clone().into_result().unwrap_err(), GuardError::IpBanned(banned));
    assert!(matches!(verdict, Verdict::Reject(RejectReason::IpBanned(_))));
    // Rejected before classification: nothing recorded.
    assert_eq!(guard.registry().count(&banned), 0);
    assert!(guard.clients().is_empty());

    let record = guard.ip_bans().get(&banned).unwrap();
    assert_eq!(record.banned_at, t0());
    assert_eq!(record.rule.as_deref(), Some("*:/graphql"));

    assert!(guard.ip_bans().unban(&banned, t0()));
    assert!(guard.inspect(&put_request(addr(1), banned)).is_proceed());
}

// ---------------------------------------------------------------------------
// Client telemetry
// ---------------------------------------------------------------------------

#[test]
fn client_telemetry_follows_request_kinds() {
    let (guard, _clock) = manual_guard();
    let agent = addr(5);

    guard.inspect(&add_client_request(agent, ip(30)));
    guard.inspect(&put_request(agent, ip(31)));
    guard.inspect(&agent_query(agent, ip(32)));
    guard.inspect(&agent_query(agent, ip(32)));

    let info = guard.clients().info(&agent).unwrap();
    assert_eq!(info.device, Some(DeviceClass::Mobile));
    // Submissions from a known client do not touch its IPs; queries never do.
    assert_eq!(info.ips.len(), 1);
    assert_eq!(guard.clients().tx_submissions(&agent), 1);
    assert_eq!(guard.clients().state_queries(&agent), 2);
    // State queries do not associate the signer with the IP.
    assert_eq!(guard.registry().count(&ip(32)), 0);
}
