//! Shared fixtures for integration tests.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use httpmock::MockServer;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
// self
use bearer_session::{
	auth::{AuthSession, RoleName, UserId, UserRecord},
	client::{AuthClient, ReqwestAuthClient},
	config::{ClientConfig, ClientConfigBuilder},
	http::{HttpTransport, ReqwestTransport},
	signal::LogoutReason,
	store::MemoryStore,
	url::Url,
};

/// Client wired to a mock server plus everything a test wants to inspect.
pub struct Harness {
	pub server: MockServer,
	pub client: ReqwestAuthClient,
	pub store: MemoryStore,
	pub logouts: Arc<Mutex<Vec<LogoutReason>>>,
}

pub async fn harness() -> Harness {
	harness_with(|builder| builder).await
}

pub async fn harness_with(
	configure: impl FnOnce(ClientConfigBuilder) -> ClientConfigBuilder,
) -> Harness {
	let server = MockServer::start_async().await;
	// The mock server speaks plain HTTP on its socket address.
	let base_url = Url::parse(&format!("http://{}", server.address()))
		.expect("Mock server URL should parse.");
	let config = configure(ClientConfig::builder(base_url))
		.build()
		.expect("Test client configuration should validate.");
	let store = MemoryStore::default();
	let logouts = Arc::new(Mutex::new(Vec::new()));
	let client = AuthClient::new(
		config,
		Arc::new(ReqwestTransport::new().expect("Reqwest transport should build.")),
		Arc::new(store.clone()),
	)
	.expect("Test client should build.")
	.with_logout_handler({
		let logouts = logouts.clone();

		move |reason| logouts.lock().push(reason)
	});

	Harness { server, client, store, logouts }
}

pub fn user() -> UserRecord {
	UserRecord::new(
		UserId::new("7").expect("User id fixture should be valid."),
		RoleName::new("ADMIN").expect("Role fixture should be valid."),
		"ana@example.com",
	)
}

/// Stores a signed-in session whose access token expires after `expires_in`.
pub fn seed_session<T>(
	client: &AuthClient<T>,
	access: &str,
	refresh: Option<&str>,
	expires_in: Duration,
) where
	T: ?Sized + HttpTransport,
{
	let mut builder = AuthSession::builder()
		.access_token(access)
		.user(user())
		.expires_at(OffsetDateTime::now_utc() + expires_in);

	if let Some(refresh) = refresh {
		builder = builder.refresh_token(refresh);
	}

	client
		.credentials()
		.store_session(&builder.build().expect("Session fixture should build."))
		.expect("Session fixture should persist.");
}
