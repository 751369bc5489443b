//! End-to-end convergence tests.
//!
//! Tests verify that:
//! - Watch notifications flow through ingester, queue and reconciler into the
//!   derived store
//! - Removing an entity from its container deletes the derived object
//! - Out-of-band edits and deletions of derived objects are reverted
//! - A binding whose role ref changes is deleted and recreated
//! - A binding moving between binding containers keeps its derived object

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use polsync_core::ObjectKey;
use polsync_events::origin::PolicyRule;
use polsync_events::{
    DerivedClient, DerivedLister, ObjectMeta, ObjectReference, Policy, PolicyBinding, RbacRole,
    RbacRoleBinding, Role, RoleBinding, WatchEvent,
};
use polsync_reconciler::{ControllerConfig, Pipeline, RoleBindingProjection, RoleProjection};
use tokio::sync::watch;

const SETTLE: Duration = Duration::from_secs(5);

fn config() -> ControllerConfig {
    ControllerConfig::default()
        .with_workers(2)
        .with_backoff(Duration::from_millis(1), Duration::from_millis(20))
}

fn role(name: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: ObjectMeta::namespaced("a", name),
        rules,
    }
}

fn policy(roles: Vec<Role>) -> Policy {
    Policy {
        metadata: ObjectMeta::namespaced("a", "default"),
        roles,
    }
}

fn binding_policy(role_ref: &str) -> PolicyBinding {
    PolicyBinding {
        metadata: ObjectMeta::namespaced("a", ":default"),
        role_bindings: vec![RoleBinding {
            metadata: ObjectMeta::namespaced("a", "b1"),
            subjects: vec![ObjectReference::new("User", "alice")],
            role_ref: ObjectReference::new("", role_ref).in_namespace("a"),
        }],
    }
}

fn named_binding_policy(name: &str, role_bindings: Vec<RoleBinding>) -> PolicyBinding {
    PolicyBinding {
        metadata: ObjectMeta::namespaced("a", name),
        role_bindings,
    }
}

fn get_rule() -> PolicyRule {
    PolicyRule::new(["get"], [""], ["pods"])
}

fn list_rule() -> PolicyRule {
    PolicyRule::new(["list"], [""], ["services"])
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced("a", name).unwrap()
}

#[tokio::test]
async fn roles_converge_and_follow_their_policy() {
    // GIVEN: A running role pipeline over a policy with two roles
    let pipeline = Pipeline::<Policy, RoleProjection>::new(config()).unwrap();
    let initial = policy(vec![role("r1", vec![get_rule()]), role("r2", vec![get_rule()])]);
    assert!(pipeline.ingester().initial_list(&[initial.clone()]).is_clean());
    let (stop, shutdown) = watch::channel(false);
    let running = pipeline.spawn(shutdown);

    // WHEN: The controllers settle
    assert!(pipeline.settle(SETTLE).await);

    // THEN: Both roles exist in the derived store
    let store = pipeline.store();
    assert_eq!(store.len().await, 2);
    let r1 = store.get(&key("r1")).await.unwrap();
    assert_eq!(r1.rules.len(), 1);
    assert!(!r1.metadata.uid.is_empty());

    // WHEN: The policy gains a rule on r1 and drops r2
    let updated = policy(vec![role("r1", vec![get_rule(), list_rule()])]);
    pipeline.ingester().handle(WatchEvent::Modified {
        old: initial,
        new: updated,
    });
    assert!(pipeline.settle(SETTLE).await);

    // THEN: r1 is updated in place and r2 is gone
    let r1_after = store.get(&key("r1")).await.unwrap();
    assert_eq!(r1_after.rules.len(), 2);
    assert_eq!(r1_after.metadata.uid, r1.metadata.uid);
    assert!(store.get(&key("r2")).await.is_err_and(|e| e.is_not_found()));

    stop.send(true).unwrap();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn out_of_band_changes_are_reverted() {
    // GIVEN: A converged role pipeline
    let pipeline = Pipeline::<Policy, RoleProjection>::new(config()).unwrap();
    pipeline
        .ingester()
        .initial_list(&[policy(vec![role("r1", vec![get_rule()])])]);
    let (stop, shutdown) = watch::channel(false);
    let running = pipeline.spawn(shutdown);
    assert!(pipeline.settle(SETTLE).await);
    let store = pipeline.store();

    // WHEN: Someone edits the derived role behind the controller's back
    let mut tampered: RbacRole = store.get(&key("r1")).await.unwrap();
    tampered.rules.clear();
    store.update(tampered).await.unwrap();
    assert!(pipeline.settle(SETTLE).await);

    // THEN: The rule is restored
    assert_eq!(store.get(&key("r1")).await.unwrap().rules.len(), 1);

    // WHEN: Someone deletes it
    store.delete(&key("r1")).await.unwrap();
    assert!(pipeline.settle(SETTLE).await);

    // THEN: It is recreated
    assert_eq!(store.get(&key("r1")).await.unwrap().rules.len(), 1);

    stop.send(true).unwrap();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn binding_with_changed_role_ref_is_recreated() {
    // GIVEN: A converged binding pointing at role "viewer"
    let pipeline = Pipeline::<PolicyBinding, RoleBindingProjection>::new(config()).unwrap();
    let initial = binding_policy("viewer");
    pipeline.ingester().initial_list(&[initial.clone()]);
    let (stop, shutdown) = watch::channel(false);
    let running = pipeline.spawn(shutdown);
    assert!(pipeline.settle(SETTLE).await);
    let store = pipeline.store();
    let before: RbacRoleBinding = store.get(&key("b1")).await.unwrap();

    // WHEN: The source binding switches to role "editor", which the store
    // refuses as an update
    pipeline.ingester().handle(WatchEvent::Modified {
        old: initial,
        new: binding_policy("editor"),
    });
    assert!(pipeline.settle(SETTLE).await);

    // THEN: The derived binding was deleted and recreated with the new ref
    let after = store.get(&key("b1")).await.unwrap();
    assert_eq!(after.role_ref.name, "editor");
    assert_ne!(after.metadata.uid, before.metadata.uid);

    stop.send(true).unwrap();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn orphans_present_at_startup_are_deleted() {
    // GIVEN: A derived role with no source, created before the controller runs
    let pipeline = Pipeline::<Policy, RoleProjection>::new(config()).unwrap();
    pipeline
        .store()
        .create(RbacRole {
            metadata: ObjectMeta::namespaced("a", "stale"),
            rules: Vec::new(),
        })
        .await
        .unwrap();
    pipeline.ingester().initial_list(&[]);

    // WHEN: The controller runs
    let (stop, shutdown) = watch::channel(false);
    let running = pipeline.spawn(shutdown);
    assert!(pipeline.settle(SETTLE).await);

    // THEN: The orphan is gone
    assert!(pipeline.store().is_empty().await);

    stop.send(true).unwrap();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn binding_moved_between_containers_out_of_order_survives() {
    // GIVEN: A converged binding b1 listed by ":default", and an empty "a:default"
    let pipeline = Pipeline::<PolicyBinding, RoleBindingProjection>::new(config()).unwrap();
    let b1 = binding_policy("viewer").role_bindings;
    let losing = named_binding_policy(":default", b1.clone());
    let gaining = named_binding_policy("a:default", Vec::new());
    pipeline
        .ingester()
        .initial_list(&[losing.clone(), gaining.clone()]);
    let (stop, shutdown) = watch::channel(false);
    let running = pipeline.spawn(shutdown);
    assert!(pipeline.settle(SETTLE).await);
    let store = pipeline.store();
    let before: RbacRoleBinding = store.get(&key("b1")).await.unwrap();

    // WHEN: "a:default" gains b1 before ":default" reports losing it
    pipeline.ingester().handle(WatchEvent::Modified {
        old: gaining,
        new: named_binding_policy("a:default", b1),
    });
    pipeline.ingester().handle(WatchEvent::Modified {
        old: losing,
        new: named_binding_policy(":default", Vec::new()),
    });
    assert!(pipeline.settle(SETTLE).await);

    // THEN: The derived binding is untouched
    let after = store.get(&key("b1")).await.unwrap();
    assert_eq!(after.metadata.uid, before.metadata.uid);

    stop.send(true).unwrap();
    assert!(running.await.unwrap().is_ok());
}

#[tokio::test]
async fn settle_accepts_an_unbounded_timeout() {
    // GIVEN: A running pipeline with nothing to do
    let pipeline = Pipeline::<Policy, RoleProjection>::new(config()).unwrap();
    pipeline.ingester().initial_list(&[]);
    let (stop, shutdown) = watch::channel(false);
    let running = pipeline.spawn(shutdown);

    // WHEN: Settling with the largest possible timeout
    let settled = pipeline.settle(Duration::MAX).await;

    // THEN: It settles instead of overflowing the deadline
    assert!(settled);

    stop.send(true).unwrap();
    assert!(running.await.unwrap().is_ok());
}
