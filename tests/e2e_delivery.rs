//! E2E tests for outbound delivery between two running servers

mod common;

use common::{HANDLE, TestServer, assert_state, closed_port};
use fedikit::federation::{Destination, JobState};
use fedikit::vocab::builder;
use reqwest::StatusCode;

#[tokio::test]
async fn follow_is_answered_with_delivered_accept() {
    let alice = TestServer::new().await;
    let bob = TestServer::new().await;

    let follow = builder::follow(&bob.activity_id("follow"), &bob.actor_uri(), &alice.actor_uri())
        .unwrap();
    let response = bob
        .post_signed(&alice.inbox_url(), &follow.as_object().to_json())
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    assert_eq!(alice.instance.followers().await, vec![bob.actor_uri()]);

    let accept_id = alice.latest_outbox_id().await.expect("accept recorded");
    let jobs = alice.wait_for_jobs(&accept_id).await;
    assert_eq!(jobs.len(), 1);
    assert_state(&jobs, JobState::Delivered);
    // Bob advertises a shared inbox.
    assert_eq!(jobs[0].destination, Destination::Inbox(bob.url("/inbox")));
    assert_eq!(jobs[0].attempts, 1);
}

#[tokio::test]
async fn engine_delivers_create_to_remote_inbox() {
    let alice = TestServer::new().await;
    let bob = TestServer::new().await;

    let note = builder::note(
        &alice.url("/notes/1"),
        &alice.actor_uri(),
        "<p>hello bob</p>",
        "2026-01-01T00:00:00Z",
        &[bob.actor_uri()],
        &[],
    );
    let create = builder::create(&alice.activity_id("create"), &alice.actor_uri(), note).unwrap();
    let create_id = create.id().unwrap().to_string();

    let ids = alice
        .federation
        .enqueue_delivery(&create, &[bob.actor_uri()])
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let jobs = alice.wait_for_jobs(&create_id).await;
    assert_state(&jobs, JobState::Delivered);

    // Bob recorded it: a redelivery by hand is a duplicate.
    let response = alice
        .post_signed(&bob.url("/inbox"), &create.as_object().to_json())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreachable_recipient_is_abandoned_after_max_attempts() {
    let alice = TestServer::new().await;
    let dead_actor = format!("http://127.0.0.1:{}/users/{}", closed_port().await, HANDLE);

    let follow = builder::follow(&alice.activity_id("follow"), &alice.actor_uri(), &dead_actor)
        .unwrap();
    let follow_id = follow.id().unwrap().to_string();

    alice
        .federation
        .enqueue_delivery(&follow, &[dead_actor.clone()])
        .await
        .unwrap();

    let jobs = alice.wait_for_jobs(&follow_id).await;
    assert_state(&jobs, JobState::Abandoned);
    assert_eq!(jobs[0].attempts, alice.federation.config().delivery.max_attempts);
    assert!(jobs[0].last_error.is_some());
}

#[tokio::test]
async fn invalid_recipient_is_abandoned_without_retry() {
    let alice = TestServer::new().await;
    let bob = TestServer::new().await;
    // Bob's server answers 404 for unknown actors.
    let missing = bob.url("/users/nobody");

    let follow = builder::follow(&alice.activity_id("follow"), &alice.actor_uri(), &missing)
        .unwrap();
    let follow_id = follow.id().unwrap().to_string();

    alice
        .federation
        .enqueue_delivery(&follow, &[missing])
        .await
        .unwrap();

    let jobs = alice.wait_for_jobs(&follow_id).await;
    assert_state(&jobs, JobState::Abandoned);
    assert!(jobs[0].attempts <= 1);
}

#[tokio::test]
async fn unknown_local_actor_is_rejected_before_enqueue() {
    let alice = TestServer::new().await;
    let bob = TestServer::new().await;

    let stranger = alice.url("/users/stranger");
    let follow = builder::follow(&alice.activity_id("follow"), &stranger, &bob.actor_uri())
        .unwrap();

    let result = alice
        .federation
        .enqueue_delivery(&follow, &[bob.actor_uri()])
        .await;
    assert!(matches!(
        result,
        Err(fedikit::error::AppError::KeyNotFound(_))
    ));
    assert!(
        alice
            .federation
            .delivery()
            .jobs_for_activity(follow.id().unwrap())
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn blocked_destination_is_never_contacted() {
    let alice = TestServer::new().await;
    let bob = TestServer::new().await;

    alice.federation.delivery().block_destination(&bob.domain).await;

    let follow = builder::follow(&alice.activity_id("follow"), &alice.actor_uri(), &bob.actor_uri())
        .unwrap();
    let follow_id = follow.id().unwrap().to_string();
    alice
        .federation
        .enqueue_delivery(&follow, &[bob.actor_uri()])
        .await
        .unwrap();

    let jobs = alice.wait_for_jobs(&follow_id).await;
    assert_state(&jobs, JobState::Abandoned);
    assert!(bob.instance.followers().await.is_empty());
}
