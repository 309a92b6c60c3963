#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use speakwatch_domain::WEBHOOK_USERNAME;
use speakwatch_platform::Upstream;

use crate::server::directory::{Directory, DirectoryConfig, DirectoryStats};
use crate::server::test_support::{ScriptedUpstream, channel, cid, init_test_logging, uid, user};

fn directory(upstream: &Arc<ScriptedUpstream>, cfg: DirectoryConfig) -> Arc<Directory> {
	let fetcher: Arc<dyn Upstream> = upstream.clone();
	Arc::new(Directory::new(fetcher, cfg))
}

#[tokio::test]
async fn bulk_loaded_entries_resolve_without_fetching() {
	init_test_logging();
	let upstream = Arc::new(ScriptedUpstream::new());
	let dir = directory(&upstream, DirectoryConfig::default());

	dir.bulk_load(vec![channel("c1", "general", None)], vec![user("u1", "alice")]);

	assert_eq!(dir.resolve_user(&uid("u1")).await, "alice");
	assert_eq!(dir.resolve_channel(&cid("c1")).await.map(|c| c.name), Some("general".to_string()));
	assert_eq!(upstream.user_fetches(), 0);
	assert_eq!(upstream.channel_fetches(), 0);
	assert_eq!(dir.stats(), DirectoryStats { channels: 1, users: 1 });
}

#[tokio::test]
async fn bulk_load_overwrites_existing_entries() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let dir = directory(&upstream, DirectoryConfig::default());

	dir.bulk_load(vec![], vec![user("u1", "alice")]);
	dir.bulk_load(vec![], vec![user("u1", "alice2")]);

	assert_eq!(dir.resolve_user(&uid("u1")).await, "alice2");
	assert_eq!(dir.stats().users, 1);
}

#[tokio::test]
async fn unknown_user_is_learned_once() {
	let upstream = Arc::new(ScriptedUpstream::new().with_user(user("u9", "carol")));
	let dir = directory(&upstream, DirectoryConfig::default());

	assert_eq!(dir.resolve_user(&uid("u9")).await, "carol");
	assert_eq!(dir.resolve_user(&uid("u9")).await, "carol");
	assert_eq!(upstream.user_fetches(), 1);
	assert_eq!(dir.stats().users, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_misses_share_a_single_fetch() {
	init_test_logging();
	let upstream = Arc::new(
		ScriptedUpstream::new()
			.with_user(user("u9", "carol"))
			.with_fetch_delay(Duration::from_millis(50)),
	);
	let dir = directory(&upstream, DirectoryConfig::default());

	let mut tasks = Vec::new();
	for _ in 0..16 {
		let dir = Arc::clone(&dir);
		tasks.push(tokio::spawn(async move { dir.resolve_user(&uid("u9")).await }));
	}

	for task in tasks {
		assert_eq!(task.await.expect("task"), "carol");
	}
	assert_eq!(upstream.user_fetches(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_channel_misses_share_a_single_fetch() {
	let upstream = Arc::new(
		ScriptedUpstream::new()
			.with_channel(channel("c9", "hidden", None))
			.with_fetch_delay(Duration::from_millis(50)),
	);
	let dir = directory(&upstream, DirectoryConfig::default());

	let id = cid("c9");
	let (a, b, c) = tokio::join!(dir.resolve_channel(&id), dir.resolve_channel(&id), dir.resolve_channel(&id));

	assert_eq!(a, b);
	assert_eq!(b, c);
	assert_eq!(a.map(|c| c.name), Some("hidden".to_string()));
	assert_eq!(upstream.channel_fetches(), 1);
}

#[tokio::test]
async fn failed_user_lookup_caches_webhook_fallback() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let dir = directory(&upstream, DirectoryConfig::default());

	assert_eq!(dir.resolve_user(&uid("ghost")).await, WEBHOOK_USERNAME);
	assert_eq!(dir.resolve_user(&uid("ghost")).await, WEBHOOK_USERNAME);
	assert_eq!(upstream.user_fetches(), 1, "fallback should be remembered");
}

#[tokio::test]
async fn uncached_fallback_retries_the_upstream() {
	let upstream = Arc::new(ScriptedUpstream::new().failing("flaky"));
	let dir = directory(
		&upstream,
		DirectoryConfig {
			cache_user_fallback: false,
		},
	);

	assert_eq!(dir.resolve_user(&uid("flaky")).await, WEBHOOK_USERNAME);
	assert_eq!(dir.resolve_user(&uid("flaky")).await, WEBHOOK_USERNAME);
	assert_eq!(upstream.user_fetches(), 2);
	assert_eq!(dir.stats().users, 0);
}

#[tokio::test]
async fn failed_channel_lookup_is_not_cached() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let dir = directory(&upstream, DirectoryConfig::default());

	assert!(dir.resolve_channel(&cid("nope")).await.is_none());
	assert!(dir.resolve_channel(&cid("nope")).await.is_none());
	assert_eq!(upstream.channel_fetches(), 2);
	assert_eq!(dir.stats().channels, 0);
}

#[tokio::test]
async fn channel_lookup_errors_are_retried_like_missing_channels() {
	let upstream = Arc::new(
		ScriptedUpstream::new()
			.with_channel(channel("c5", "flaky", None))
			.failing("c5"),
	);
	let dir = directory(&upstream, DirectoryConfig::default());

	assert!(dir.resolve_channel(&cid("c5")).await.is_none());
	assert!(dir.resolve_channel(&cid("c5")).await.is_none());
	assert_eq!(upstream.channel_fetches(), 2);
	assert_eq!(dir.stats().channels, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn followers_recover_when_the_leading_fetch_is_cancelled() {
	let upstream = Arc::new(
		ScriptedUpstream::new()
			.with_user(user("u9", "carol"))
			.with_fetch_delay(Duration::from_millis(100)),
	);
	let dir = directory(&upstream, DirectoryConfig::default());

	let leader = {
		let dir = Arc::clone(&dir);
		tokio::spawn(async move { dir.resolve_user(&uid("u9")).await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;

	let follower = {
		let dir = Arc::clone(&dir);
		tokio::spawn(async move { dir.resolve_user(&uid("u9")).await })
	};
	tokio::time::sleep(Duration::from_millis(20)).await;

	leader.abort();

	let name = tokio::time::timeout(Duration::from_secs(2), follower)
		.await
		.expect("follower should not hang")
		.expect("task");
	assert_eq!(name, "carol");
	assert_eq!(upstream.user_fetches(), 2);
}
