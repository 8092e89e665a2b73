//! Follow-graph oracle
//!
//! The exchange never talks to the social network directly. Everything it
//! needs to know (does a profile exist and is it public, does A follow B) is
//! asked through [`FollowGraph`]. Answers are point-in-time snapshots and
//! every call is read-only, so callers may retry freely.
//!
//! Transport failures surface as [`Error::OracleUnavailable`] and must never
//! be read as "not following".

use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Read-only view of the external follow graph
#[async_trait]
pub trait FollowGraph: Send + Sync {
    /// False if the profile cannot be resolved or is private
    async fn profile_exists_and_is_public(&self, handle: &str) -> Result<bool>;

    /// True iff `follower` appears in `followee`'s follower list right now.
    /// An unknown `followee` yields false.
    async fn is_follower(&self, follower: &str, followee: &str) -> Result<bool>;
}

/// One profile in a graph snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSnapshot {
    /// Private profiles cannot be verified
    pub private: bool,

    /// Handles following this profile
    pub followers: HashSet<String>,
}

/// Serializable follow graph, keyed by lowercase handle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Known profiles
    pub profiles: HashMap<String, ProfileSnapshot>,
}

/// In-memory follow graph, optionally seeded from a JSON snapshot
///
/// ```json
/// { "profiles": { "alice": { "private": false, "followers": ["bob"] } } }
/// ```
#[derive(Debug, Default)]
pub struct SnapshotFollowGraph {
    graph: RwLock<GraphSnapshot>,
    unavailable: AtomicBool,
    latency: Option<Duration>,
}

fn normalize(handle: &str) -> String {
    handle.trim().to_lowercase()
}

impl SnapshotFollowGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph seeded from a snapshot
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let profiles = snapshot
            .profiles
            .into_iter()
            .map(|(handle, mut profile)| {
                profile.followers = profile.followers.iter().map(|f| normalize(f)).collect();
                (normalize(&handle), profile)
            })
            .collect();

        Self {
            graph: RwLock::new(GraphSnapshot { profiles }),
            ..Self::default()
        }
    }

    /// Load a JSON snapshot file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let snapshot: GraphSnapshot = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Invalid follow graph snapshot {}: {}", path.display(), e))
        })?;

        info!(
            path = %path.display(),
            profiles = snapshot.profiles.len(),
            "Loaded follow graph snapshot"
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Simulated lookup latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add or replace a profile
    pub fn add_profile(&self, handle: &str, private: bool) {
        let mut graph = self.graph.write();
        let profile = graph.profiles.entry(normalize(handle)).or_default();
        profile.private = private;
    }

    /// Change a profile's visibility, creating it if needed
    pub fn set_private(&self, handle: &str, private: bool) {
        self.add_profile(handle, private);
    }

    /// Record that `follower` follows `followee`
    pub fn follow(&self, follower: &str, followee: &str) {
        let mut graph = self.graph.write();
        graph
            .profiles
            .entry(normalize(followee))
            .or_default()
            .followers
            .insert(normalize(follower));
    }

    /// Remove a follow edge
    pub fn unfollow(&self, follower: &str, followee: &str) {
        let mut graph = self.graph.write();
        if let Some(profile) = graph.profiles.get_mut(&normalize(followee)) {
            profile.followers.remove(&normalize(follower));
        }
    }

    /// Make every lookup fail with a transport error
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Copy of the current graph
    pub fn snapshot(&self) -> GraphSnapshot {
        self.graph.read().clone()
    }

    async fn reach(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::OracleUnavailable(
                "follow graph is not reachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl FollowGraph for SnapshotFollowGraph {
    async fn profile_exists_and_is_public(&self, handle: &str) -> Result<bool> {
        self.reach().await?;
        let graph = self.graph.read();
        let public = graph
            .profiles
            .get(&normalize(handle))
            .map(|profile| !profile.private)
            .unwrap_or(false);
        debug!(handle, public, "Profile lookup");
        Ok(public)
    }

    async fn is_follower(&self, follower: &str, followee: &str) -> Result<bool> {
        self.reach().await?;
        let graph = self.graph.read();
        let following = graph
            .profiles
            .get(&normalize(followee))
            .map(|profile| profile.followers.contains(&normalize(follower)))
            .unwrap_or(false);
        debug!(follower, followee, following, "Follower lookup");
        Ok(following)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_profile_visibility() {
        let graph = SnapshotFollowGraph::new();
        graph.add_profile("Alice", false);
        graph.add_profile("bob", true);

        assert!(graph.profile_exists_and_is_public("alice").await.unwrap());
        assert!(!graph.profile_exists_and_is_public("bob").await.unwrap());
        assert!(!graph.profile_exists_and_is_public("carol").await.unwrap());

        graph.set_private("bob", false);
        assert!(graph.profile_exists_and_is_public("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_follow_edges() {
        let graph = SnapshotFollowGraph::new();
        graph.follow("bob", "alice");

        assert!(graph.is_follower("bob", "alice").await.unwrap());
        assert!(graph.is_follower("BOB", " alice ").await.unwrap());
        assert!(!graph.is_follower("alice", "bob").await.unwrap());
        assert!(!graph.is_follower("bob", "nobody").await.unwrap());

        graph.unfollow("bob", "alice");
        assert!(!graph.is_follower("bob", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_is_an_error() {
        let graph = SnapshotFollowGraph::new();
        graph.follow("bob", "alice");
        graph.set_unavailable(true);

        let result = graph.is_follower("bob", "alice").await;
        assert!(matches!(result, Err(Error::OracleUnavailable(_))));
        assert!(graph.profile_exists_and_is_public("alice").await.is_err());

        graph.set_unavailable(false);
        assert!(graph.is_follower("bob", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_load_snapshot_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"profiles": {{"Alice": {{"followers": ["Bob"]}}, "carol": {{"private": true}}}}}}"#
        )
        .unwrap();

        let graph = SnapshotFollowGraph::from_file(file.path()).unwrap();
        assert!(graph.is_follower("bob", "alice").await.unwrap());
        assert!(graph.profile_exists_and_is_public("alice").await.unwrap());
        assert!(!graph.profile_exists_and_is_public("carol").await.unwrap());
        assert_eq!(graph.snapshot().profiles.len(), 2);
    }

    #[test]
    fn test_malformed_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            SnapshotFollowGraph::from_file(file.path()),
            Err(Error::Config(_))
        ));
    }
}
