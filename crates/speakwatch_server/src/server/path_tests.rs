#![forbid(unsafe_code)]

use std::sync::Arc;

use speakwatch_domain::{ChannelEntity, ROOT_CHANNEL_ID};
use speakwatch_platform::Upstream;

use crate::server::directory::{Directory, DirectoryConfig};
use crate::server::path::PathResolver;
use crate::server::test_support::{ScriptedUpstream, channel, cid};

fn resolver(upstream: &Arc<ScriptedUpstream>, listed: Vec<ChannelEntity>, max_depth: usize) -> PathResolver {
	let fetcher: Arc<dyn Upstream> = upstream.clone();
	let dir = Arc::new(Directory::new(fetcher, DirectoryConfig::default()));
	dir.bulk_load(listed, vec![]);
	PathResolver::new(dir, max_depth)
}

#[tokio::test]
async fn builds_path_from_root_to_leaf() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let r = resolver(
		&upstream,
		vec![channel("b", "B", None), channel("a", "A", Some("b"))],
		64,
	);

	assert_eq!(r.resolve(&cid("a")).await.as_deref(), Some("/channels/B/A"));
	assert_eq!(r.resolve(&cid("b")).await.as_deref(), Some("/channels/B"));
}

#[tokio::test]
async fn missing_parent_and_root_parent_both_end_the_walk() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let r = resolver(
		&upstream,
		vec![
			ChannelEntity::new(cid("top"), "top", None),
			channel("mid", "mid", Some("top")),
			channel("zero", "zero", Some(ROOT_CHANNEL_ID)),
		],
		64,
	);

	assert_eq!(r.resolve(&cid("mid")).await.as_deref(), Some("/channels/top/mid"));
	assert_eq!(r.resolve(&cid("zero")).await.as_deref(), Some("/channels/zero"));
}

#[tokio::test]
async fn unknown_ancestor_yields_no_path() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let r = resolver(&upstream, vec![channel("leaf", "leaf", Some("gone"))], 64);

	assert_eq!(r.resolve(&cid("leaf")).await, None);
	assert_eq!(upstream.channel_fetches(), 1);
}

#[tokio::test]
async fn unknown_ancestor_is_learned_lazily() {
	let upstream = Arc::new(ScriptedUpstream::new().with_channel(channel("hidden", "hidden", None)));
	let r = resolver(&upstream, vec![channel("leaf", "leaf", Some("hidden"))], 64);

	assert_eq!(r.resolve(&cid("leaf")).await.as_deref(), Some("/channels/hidden/leaf"));
	assert_eq!(r.resolve(&cid("leaf")).await.as_deref(), Some("/channels/hidden/leaf"));
	assert_eq!(upstream.channel_fetches(), 1);
}

#[tokio::test]
async fn parent_cycle_is_rejected() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let r = resolver(
		&upstream,
		vec![channel("x", "x", Some("y")), channel("y", "y", Some("x"))],
		64,
	);

	assert_eq!(r.resolve(&cid("x")).await, None);
	assert_eq!(upstream.channel_fetches(), 0);
}

#[tokio::test]
async fn self_parent_is_rejected() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let r = resolver(&upstream, vec![channel("loop", "loop", Some("loop"))], 64);

	assert_eq!(r.resolve(&cid("loop")).await, None);
}

#[tokio::test]
async fn chains_longer_than_max_depth_are_rejected() {
	let upstream = Arc::new(ScriptedUpstream::new());
	let chain = vec![
		channel("c0", "c0", None),
		channel("c1", "c1", Some("c0")),
		channel("c2", "c2", Some("c1")),
		channel("c3", "c3", Some("c2")),
	];
	let r = resolver(&upstream, chain, 3);

	assert_eq!(r.resolve(&cid("c2")).await.as_deref(), Some("/channels/c0/c1/c2"));
	assert_eq!(r.resolve(&cid("c3")).await, None);
}
