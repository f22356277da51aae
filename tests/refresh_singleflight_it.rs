#![cfg(feature = "reqwest")]

mod support;

// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
use time::Duration;
// self
use bearer_session::{
	auth::TokenSecret,
	error::{Error, RefreshError},
	http::ApiRequest,
	refresh::RefreshPhase,
	signal::LogoutReason,
};
use support::{harness, seed_session};

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
	let h = harness().await;

	seed_session(&h.client, "access-old", Some("refresh-1"), Duration::hours(1));

	let rejected = h
		.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/items").header("authorization", "Bearer access-old");
			then.status(401);
		})
		.await;
	let accepted = h
		.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/items").header("authorization", "Bearer access-new");
			then.status(200).header("content-type", "application/json").body("{\"items\":[]}");
		})
		.await;
	let refresh = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh").json_body(json!({ "refreshToken": "refresh-1" }));
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(300))
				.body("{\"accessToken\":\"access-new\",\"refreshToken\":\"refresh-2\",\"expiresIn\":3600}");
		})
		.await;
	let (first, second, third) = tokio::join!(
		h.client.send(ApiRequest::get("/api/items")),
		h.client.send(ApiRequest::get("/api/items")),
		h.client.send(ApiRequest::get("/api/items")),
	);

	for response in [first, second, third] {
		let response = response.expect("Replayed request should succeed.");

		assert_eq!(response.status, 200);
		assert_eq!(response.text(), "{\"items\":[]}");
	}

	refresh.assert_calls_async(1).await;
	rejected.assert_calls_async(3).await;
	accepted.assert_calls_async(3).await;

	let credentials = h.client.credentials();

	assert_eq!(
		credentials.access_token().expect("Access token read should succeed."),
		Some(TokenSecret::new("access-new"))
	);
	assert_eq!(
		credentials.refresh_token().expect("Refresh token read should succeed."),
		Some(TokenSecret::new("refresh-2"))
	);
	assert_eq!(h.client.coordinator().state(), RefreshPhase::Idle);
	assert_eq!(h.client.coordinator().metrics().attempts(), 1);
	assert!(h.logouts.lock().is_empty());
}

#[tokio::test]
async fn refresh_rejection_clears_session_and_signals_once() {
	let h = harness().await;

	seed_session(&h.client, "access-old", Some("refresh-1"), Duration::hours(1));

	let rejected = h
		.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/items");
			then.status(401);
		})
		.await;
	let refresh = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(401).delay(StdDuration::from_millis(300)).body("{\"error\":\"invalid\"}");
		})
		.await;
	let results = tokio::join!(
		h.client.send(ApiRequest::get("/api/items")),
		h.client.send(ApiRequest::get("/api/items")),
		h.client.send(ApiRequest::get("/api/items")),
	);

	for result in [results.0, results.1, results.2] {
		assert!(matches!(
			result,
			Err(Error::RefreshFailed(RefreshError::Rejected { status: 401 }))
		));
	}

	refresh.assert_calls_async(1).await;
	rejected.assert_calls_async(3).await;

	assert!(h.store.is_empty());
	assert!(h.client.credentials().session().expect("Session read should succeed.").is_empty());
	assert!(!h.client.credentials().is_authenticated());
	assert_eq!(*h.logouts.lock(), vec![LogoutReason::RefreshFailed]);
}

#[tokio::test]
async fn rejection_after_a_failed_refresh_does_not_sign_out_twice() {
	let h = harness().await;

	seed_session(&h.client, "access-old", Some("refresh-1"), Duration::hours(1));

	h.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/fast");
			then.status(401);
		})
		.await;

	let slow = h
		.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/slow");
			then.status(401).delay(StdDuration::from_millis(600));
		})
		.await;
	let refresh = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(401).delay(StdDuration::from_millis(100));
		})
		.await;
	let (fast, late) = tokio::join!(
		h.client.send(ApiRequest::get("/api/fast")),
		h.client.send(ApiRequest::get("/api/slow")),
	);

	for result in [fast, late] {
		assert!(matches!(
			result,
			Err(Error::RefreshFailed(RefreshError::Rejected { status: 401 }))
		));
	}

	refresh.assert_calls_async(1).await;
	slow.assert_calls_async(1).await;

	assert!(h.store.is_empty());
	assert_eq!(h.client.coordinator().metrics().attempts(), 1);
	assert_eq!(*h.logouts.lock(), vec![LogoutReason::RefreshFailed]);
}

#[tokio::test]
async fn missing_refresh_token_never_calls_the_refresh_endpoint() {
	let h = harness().await;

	seed_session(&h.client, "access-old", None, Duration::hours(1));

	h.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/items");
			then.status(401);
		})
		.await;

	let refresh = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(200).body("{\"accessToken\":\"unused\"}");
		})
		.await;
	let err = h
		.client
		.send(ApiRequest::get("/api/items"))
		.await
		.expect_err("Request without a refresh token should fail.");

	assert!(matches!(err, Error::RefreshFailed(RefreshError::MissingRefreshToken)));

	refresh.assert_calls_async(0).await;

	assert!(h.store.is_empty());
	assert_eq!(*h.logouts.lock(), vec![LogoutReason::MissingRefreshToken]);
}

#[tokio::test]
async fn second_rejection_after_replay_is_auth_expired() {
	let h = harness().await;

	seed_session(&h.client, "access-old", Some("refresh-1"), Duration::hours(1));

	let rejected = h
		.server
		.mock_async(|when, then| {
			when.method(GET).path("/api/items");
			then.status(401);
		})
		.await;
	let refresh = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(200).body("{\"accessToken\":\"access-new\"}");
		})
		.await;
	let err = h
		.client
		.send(ApiRequest::get("/api/items"))
		.await
		.expect_err("Replayed request should not be refreshed again.");

	assert!(matches!(err, Error::AuthExpired));

	refresh.assert_calls_async(1).await;
	rejected.assert_calls_async(2).await;

	assert!(h.logouts.lock().is_empty());
}

#[tokio::test]
async fn refresh_endpoint_rejections_are_returned_as_is() {
	let h = harness().await;

	seed_session(&h.client, "access-old", Some("refresh-1"), Duration::hours(1));

	let refresh = h
		.server
		.mock_async(|when, then| {
			when.method(POST).path("/auth/refresh");
			then.status(401);
		})
		.await;
	let response = h
		.client
		.send(ApiRequest::post("/auth/refresh"))
		.await
		.expect("Refresh endpoint response should be returned.");

	assert_eq!(response.status, 401);

	refresh.assert_calls_async(1).await;

	assert!(h.client.credentials().is_authenticated());
	assert!(h.logouts.lock().is_empty());
}
