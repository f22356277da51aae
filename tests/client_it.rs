#![cfg(feature = "reqwest")]

mod support;

// std
use std::{sync::Arc, time::Duration as StdDuration};
// crates.io
use httpmock::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use time::Duration;
// self
use bearer_session::{
	auth::TokenSecret,
	client::{AuthClient, LoginCredentials, LoginOutcome, PasswordResetOutcome},
	config::{ClientConfig, IdleConfig},
	error::{Error, TransportError},
	http::{ApiRequest, HttpTransport, ReqwestTransport, TransportFuture},
	http_types::{Request, Response, header::AUTHORIZATION},
	monitor::ActivityHub,
	signal::LogoutReason,
	store::MemoryStore,
	threat::ThreatKind,
	url::Url,
};
use support::{harness, harness_with, seed_session};

#[derive(Default)]
struct RecordingTransport {
	seen: Mutex<Vec<Request<Vec<u8>>>>,
}
impl HttpTransport for RecordingTransport {
	fn execute(&self, request: Request<Vec<u8>>) -> TransportFuture<'_> {
		self.seen.lock().push(request);

		Box::pin(async { Ok(Response::new(b"{}".to_vec())) })
	}
}

fn login_body() -> serde_json::Value {
	json!({
		"accessToken": "access-1",
		"refreshToken": "refresh-1",
		"expiresIn": 900,
		"user": { "id": 7, "role": "ADMIN", "email": "ana@example.com" }
	})
}

#[tokio::test]
async fn stored_token_is_attached_as_bearer() {
	let h = harness().await;

	seed_session(&h.client, "access-1", Some("refresh-1"), Duration::hours(1));

	let items = h
		.server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/items")
				.query_param("page", "2")
				.header("authorization", "Bearer access-1");
			then.status(200).body("[]");
		})
		.await;
	let response = h
		.client
		.send(ApiRequest::get("/api/items").query("page", "2"))
		.await
		.expect("Authorized request should succeed.");

	assert!(response.is_success());

	items.assert_async().await;
}

#[tokio::test]
async fn missing_or_expired_tokens_are_not_attached() {
	let transport = Arc::new(RecordingTransport::default());
	let config = ClientConfig::builder(
		Url::parse("https://api.example.com").expect("Base URL fixture should parse."),
	)
	.build()
	.expect("Configuration should validate.");
	let client = AuthClient::new(config, transport.clone(), Arc::new(MemoryStore::default()))
		.expect("Client should build.");

	client.send(ApiRequest::get("/public")).await.expect("Anonymous request should succeed.");
	seed_session(&client, "access-stale", Some("refresh-1"), Duration::minutes(-1));
	client.send(ApiRequest::get("/public")).await.expect("Expired session request should succeed.");

	let seen = transport.seen.lock();

	assert_eq!(seen.len(), 2);
	assert!(seen.iter().all(|request| request.headers().get(AUTHORIZATION).is_none()));
	assert_eq!(seen[0].uri().to_string(), "https://api.example.com/public");
}

#[tokio::test]
async fn non_auth_failures_pass_through() {
	let h = harness().await;

	seed_session(&h.client, "access-1", Some("refresh-1"), Duration::hours(1));

	let forbidden = h
		.server
		.mock_async(|when, then| {
			when.method(DELETE).path("/api/items/3");
			then.status(403).body("{\"error\":\"forbidden\"}");
		})
		.await;
	let response = h
		.client
		.send(ApiRequest::delete("/api/items/3"))
		.await
		.expect("Forbidden response should be returned.");

	assert_eq!(response.status, 403);

	forbidden.assert_calls_async(1).await;

	assert_eq!(h.client.coordinator().metrics().attempts(), 0);
	assert!(h.client.credentials().is_authenticated());
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
	let config =
		ClientConfig::builder(Url::parse("http://127.0.0.1:9").expect("Base URL should parse."))
			.build()
			.expect("Configuration should validate.");
	let client = AuthClient::new(
		config,
		Arc::new(ReqwestTransport::new().expect("Reqwest transport should build.")),
		Arc::new(MemoryStore::default()),
	)
	.expect("Client should build.");
	let err = client
		.send(ApiRequest::get("/api/items"))
		.await
		.expect_err("Connection refusal should surface.");

	assert!(matches!(err, Error::Transport(TransportError::Network { .. })));
}

#[tokio::test]
async fn login_stores_the_session() -> color_eyre::Result<()> {
	let h = harness().await;
	let login = h
		.server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/auth/login")
				.json_body(json!({ "email": "ana@example.com", "password": "hunter2" }));
			then.status(200).header("content-type", "application/json").json_body(login_body());
		})
		.await;
	let outcome =
		h.client.login(&LoginCredentials::new(" ana@example.com ", "hunter2")?).await?;

	login.assert_async().await;

	let LoginOutcome::Authenticated(user) = outcome else {
		panic!("Unexpected login outcome: {outcome:?}.");
	};
	let credentials = h.client.credentials();

	assert_eq!(user.email, "ana@example.com");
	assert_eq!(credentials.access_token()?, Some(TokenSecret::new("access-1")));
	assert_eq!(credentials.refresh_token()?, Some(TokenSecret::new("refresh-1")));
	assert_eq!(credentials.user()?, Some(user));
	assert!(credentials.last_activity()?.is_some());
	assert!(credentials.is_authenticated());

	let expires_at = credentials.expires_at()?.expect("Login should store an expiry.");
	let remaining = expires_at - time::OffsetDateTime::now_utc();

	assert!(remaining > Duration::seconds(880) && remaining <= Duration::seconds(900));

	Ok(())
}

#[tokio::test]
async fn repeated_login_failures_are_rate_limited() {
	let h = harness().await;
	let login = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/login");
			then.status(401).body("{\"error\":\"invalid credentials\"}");
		})
		.await;
	let credentials =
		LoginCredentials::new("ana@example.com", "wrong").expect("Credentials should validate.");

	for _ in 0..5 {
		let outcome = h.client.login(&credentials).await.expect("Login call should complete.");

		assert_eq!(outcome, LoginOutcome::InvalidCredentials);
	}

	let outcome = h.client.login(&credentials).await.expect("Blocked login should complete.");
	let LoginOutcome::RateLimited(directive) = outcome else {
		panic!("Sixth login should be rate limited, got {outcome:?}.");
	};

	assert!(directive.recommended_backoff > Duration::minutes(14));
	assert!(directive.recommended_backoff <= Duration::minutes(15));

	login.assert_calls_async(5).await;

	assert!(!h.client.credentials().is_authenticated());
}

#[tokio::test]
async fn suspicious_login_email_never_reaches_the_server() {
	let h = harness().await;
	let login = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/login");
			then.status(200).json_body(login_body());
		})
		.await;
	let credentials = LoginCredentials::new("x' OR '1'='1", "pw").expect("Credentials should validate.");
	let outcome = h.client.login(&credentials).await.expect("Screened login should complete.");

	let LoginOutcome::Rejected(threats) = outcome else {
		panic!("Injection attempt should be rejected, got {outcome:?}.");
	};

	assert!(threats.contains(&ThreatKind::Sql));

	login.assert_calls_async(0).await;
}

#[tokio::test]
async fn password_reset_is_limited_to_three_per_hour() {
	let h = harness().await;
	let reset = h
		.server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/auth/forgot-password")
				.json_body(json!({ "email": "ana@example.com" }));
			then.status(204);
		})
		.await;

	for _ in 0..3 {
		assert_eq!(
			h.client
				.request_password_reset("ana@example.com")
				.await
				.expect("Password reset should complete."),
			PasswordResetOutcome::Sent
		);
	}

	let outcome = h
		.client
		.request_password_reset("ana@example.com")
		.await
		.expect("Blocked password reset should complete.");

	assert!(matches!(outcome, PasswordResetOutcome::RateLimited(_)));

	reset.assert_calls_async(3).await;

	assert!(matches!(
		h.client.request_password_reset("  ").await,
		Err(Error::Validation { field: "email", .. })
	));
}

#[tokio::test]
async fn logout_clears_even_when_the_server_fails() {
	let h = harness().await;

	seed_session(&h.client, "access-1", Some("refresh-1"), Duration::hours(1));

	let logout = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/logout").header("authorization", "Bearer access-1");
			then.status(500);
		})
		.await;

	h.client.logout().await.expect("Logout should always clear local state.");

	logout.assert_async().await;

	assert!(h.store.is_empty());
	assert!(!h.client.credentials().is_authenticated());
	assert!(h.logouts.lock().is_empty());
}

#[tokio::test]
async fn idle_session_is_cleared_and_signalled() {
	let h = harness_with(|builder| {
		builder.idle(IdleConfig {
			max_idle: Duration::milliseconds(200),
			warning_threshold: Duration::milliseconds(150),
			check_interval: Duration::milliseconds(20),
			warning_cooldown: Duration::seconds(10),
		})
	})
	.await;

	seed_session(&h.client, "access-1", Some("refresh-1"), Duration::hours(1));

	let hub = ActivityHub::default();
	let warnings = Arc::new(Mutex::new(0_usize));
	let handle = h.client.monitor_idle(Arc::new(hub.clone()), {
		let warnings = warnings.clone();

		move |_| *warnings.lock() += 1
	});

	tokio::time::sleep(StdDuration::from_millis(600)).await;

	assert!(!handle.is_running());
	assert_eq!(hub.listener_count(), 0);
	assert_eq!(*warnings.lock(), 1);
	assert!(!h.client.credentials().is_authenticated());
	assert_eq!(*h.logouts.lock(), vec![LogoutReason::IdleTimeout]);
}
