/// Integration tests for the session manager
///
/// Covers the full sign-up/sign-in/sign-out flow against the in-memory
/// backend, listener delivery, and provider-pushed session changes.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{wait_for, EventLog, TestContext, PASSWORD};
use taskpad_shared::backend::AuthEvent;
use taskpad_shared::error::AuthError;
use taskpad_shared::models::{SessionEventKind, SessionStatus};
use taskpad_shared::session::Subscription;

#[tokio::test]
async fn test_start_resolves_signed_out() {
    let ctx = TestContext::new().await;

    let session = ctx.session.current_session();
    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert!(session.user.is_none());
    assert!(ctx.session.is_listening());
}

#[tokio::test]
async fn test_sign_up_then_sign_in_after_sign_out() {
    let ctx = TestContext::new().await;
    let log = EventLog::attach(&ctx.session);

    let session = ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();
    assert!(session.is_authenticated());

    ctx.session.sign_out().await.unwrap();
    assert_eq!(ctx.session.current_session().status, SessionStatus::Unauthenticated);
    assert!(ctx.session.current_user().is_none());

    let session = ctx.session.sign_in("ada@example.com", PASSWORD).await.unwrap();
    assert_eq!(session.user.unwrap().email, "ada@example.com");

    assert_eq!(
        log.kinds(),
        vec![
            SessionEventKind::Loading,
            SessionEventKind::SignedIn,
            SessionEventKind::SignedOut,
            SessionEventKind::Loading,
            SessionEventKind::SignedIn,
        ]
    );
}

#[tokio::test]
async fn test_sign_in_wrong_password() {
    let ctx = TestContext::new().await;
    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();
    ctx.session.sign_out().await.unwrap();

    let err = ctx.session.sign_in("ada@example.com", "wrong-password").await.unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);
    assert_eq!(err.to_string(), "Invalid email or password");
    assert_eq!(ctx.session.current_session().status, SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn test_duplicate_sign_up_is_rejected() {
    let ctx = TestContext::new().await;
    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();
    ctx.session.sign_out().await.unwrap();

    let err = ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap_err();
    assert_eq!(err, AuthError::Rejected("User already registered".to_string()));
}

#[tokio::test]
async fn test_verification_completed_elsewhere_signs_in() {
    let ctx = TestContext::with_email_confirmation().await;
    let log = EventLog::attach(&ctx.session);

    let pending = ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();
    assert_eq!(pending.status, SessionStatus::Unauthenticated);
    assert!(pending.user.is_some());

    // Not verified yet
    let err = ctx.session.sign_in("ada@example.com", PASSWORD).await.unwrap_err();
    assert_eq!(err, AuthError::Rejected("Email not confirmed".to_string()));

    ctx.backend.confirm_email("ada@example.com").unwrap();

    let session = ctx.session.clone();
    wait_for(move || session.current_session().is_authenticated(), 2_000)
        .await
        .unwrap();

    let user = ctx.session.current_user().unwrap();
    assert_eq!(user.email, "ada@example.com");
    assert!(user.is_confirmed());
    assert_eq!(log.kinds().last(), Some(&SessionEventKind::SignedIn));
}

#[tokio::test]
async fn test_pushed_sign_out() {
    let ctx = TestContext::signed_in("ada@example.com").await.unwrap();

    ctx.backend.push_event(AuthEvent::signed_out());

    let session = ctx.session.clone();
    wait_for(move || !session.current_session().is_authenticated(), 2_000)
        .await
        .unwrap();
    assert_eq!(ctx.session.access_token().unwrap_err(), AuthError::NoActiveSession);
}

#[tokio::test]
async fn test_listeners_notified_in_order_after_state_stored() {
    let ctx = TestContext::new().await;
    let calls = Arc::new(Mutex::new(Vec::new()));

    let mut subscriptions = Vec::new();
    for name in ["first", "second"] {
        let calls = calls.clone();
        let manager = Arc::downgrade(&ctx.session);
        subscriptions.push(ctx.session.subscribe(move |event| {
            let stored = manager.upgrade().map(|m| m.current_session().status);
            calls
                .lock()
                .unwrap()
                .push((name, event.session.status, stored));
        }));
    }

    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("first", SessionStatus::Loading, Some(SessionStatus::Loading)),
            ("second", SessionStatus::Loading, Some(SessionStatus::Loading)),
            ("first", SessionStatus::Authenticated, Some(SessionStatus::Authenticated)),
            ("second", SessionStatus::Authenticated, Some(SessionStatus::Authenticated)),
        ]
    );
    drop(subscriptions);
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let ctx = TestContext::new().await;
    let count = Arc::new(AtomicUsize::new(0));

    let counter = count.clone();
    let subscription = ctx.session.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(ctx.session.listener_count(), 1);

    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();
    let delivered = count.load(Ordering::SeqCst);
    assert!(delivered > 0);

    subscription.unsubscribe();
    assert_eq!(ctx.session.listener_count(), 0);

    ctx.session.sign_out().await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), delivered);
}

#[tokio::test]
async fn test_listener_can_unsubscribe_itself() {
    let ctx = TestContext::new().await;
    let count = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

    let counter = count.clone();
    let own = slot.clone();
    let subscription = ctx.session.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(subscription) = own.lock().unwrap().take() {
            subscription.unsubscribe();
        }
    });
    *slot.lock().unwrap() = Some(subscription);

    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.session.listener_count(), 0);
}

#[tokio::test]
async fn test_panicking_listener_does_not_break_sign_in() {
    let ctx = TestContext::new().await;
    let count = Arc::new(AtomicUsize::new(0));

    let _bad = ctx.session.subscribe(|_| panic!("listener bug"));
    let counter = count.clone();
    let _good = ctx.session.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let session = ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();
    assert!(session.is_authenticated());
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_shutdown_stops_pushed_events() {
    let ctx = TestContext::with_email_confirmation().await;
    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();

    ctx.session.shutdown();
    assert!(!ctx.session.is_listening());

    ctx.backend.confirm_email("ada@example.com").unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert_eq!(ctx.session.current_session().status, SessionStatus::Unauthenticated);
}

#[tokio::test]
async fn test_refresh_after_expiry() {
    let ctx = TestContext::signed_in("ada@example.com").await.unwrap();
    let token = ctx.session.access_token().unwrap();

    ctx.backend.expire_token(&token);
    let session = ctx.session.refresh().await.unwrap();
    assert!(session.is_authenticated());
    assert_ne!(ctx.session.access_token().unwrap(), token);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_last_delivered_event_matches_stored_state() {
    let ctx = TestContext::new().await;

    // While the sign-in is still being delivered, a pushed sign-out arrives
    // on the event pump
    let backend = ctx.backend.clone();
    let pushed = Arc::new(AtomicUsize::new(0));
    let _slow = ctx.session.subscribe(move |event| {
        if event.session.is_authenticated() && pushed.fetch_add(1, Ordering::SeqCst) == 0 {
            backend.push_event(AuthEvent::signed_out());
            std::thread::sleep(std::time::Duration::from_millis(300));
        }
    });
    // Registered after the slow listener, so it hears the sign-in last
    let log = EventLog::attach(&ctx.session);

    ctx.session.sign_up("ada@example.com", PASSWORD).await.unwrap();

    let session = ctx.session.clone();
    wait_for(
        move || session.current_session().status == SessionStatus::Unauthenticated,
        2_000,
    )
    .await
    .unwrap();

    let statuses: Vec<_> = log.events().into_iter().map(|e| e.session.status).collect();
    assert_eq!(
        statuses,
        vec![
            SessionStatus::Loading,
            SessionStatus::Authenticated,
            SessionStatus::Unauthenticated,
        ]
    );
    assert_eq!(
        statuses.last().copied(),
        Some(ctx.session.current_session().status)
    );
}
