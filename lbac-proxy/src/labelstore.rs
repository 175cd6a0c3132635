//! Label store (spec §4.2): loads `labels.yaml` from the configured search
//! paths, preserving key case, and resolves a caller's merged policy with a
//! per-identity memoization cache. Watches the file for changes and swaps
//! the whole state atomically on reload, matching the teacher's pattern of
//! an `Arc<RwLock<_>>` snapshot swapped by a single writer
//! (`state.rs`/`admin.rs`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lbac_core::StartupError;
use notify::{RecursiveMode, Watcher};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::identity::UserIdentity;
use crate::policy::{self, LabelPolicy};

const LABELS_FILE_NAME: &str = "labels.yaml";

struct State {
	policies: HashMap<String, LabelPolicy>,
	merge_cache: HashMap<String, LabelPolicy>,
}

pub struct LabelStore {
	search_paths: Vec<PathBuf>,
	state: RwLock<State>,
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyLookupError {
	#[error("no policy found for user {username:?} or any of its groups")]
	NoMatchingEntry { username: String },
}

impl LabelStore {
	pub fn load(search_paths: Vec<PathBuf>) -> Result<Arc<Self>, StartupError> {
		let (path, contents) = read_labels_file(&search_paths)?;
		tracing::info!(path = %path.display(), "loaded labels.yaml");
		let policies = crate::policy_parser::parse_labels_file(&contents)?;
		Ok(Arc::new(Self {
			search_paths,
			state: RwLock::new(State { policies, merge_cache: HashMap::new() }),
		}))
	}

	/// Resolves the merged policy for `identity`, consulting (and
	/// populating) the per-identity memoization cache (spec §4.2 steps
	/// 1-6).
	pub async fn resolve(&self, identity: &UserIdentity) -> Result<LabelPolicy, PolicyLookupError> {
		let fingerprint = identity.fingerprint();
		{
			let state = self.state.read().await;
			if let Some(cached) = state.merge_cache.get(&fingerprint) {
				return Ok(cached.clone());
			}
		}

		let candidates = {
			let state = self.state.read().await;
			let mut candidates = Vec::new();
			if let Some(p) = state.policies.get(&identity.username) {
				candidates.push(p.clone());
			}
			for group in &identity.groups {
				if let Some(p) = state.policies.get(group) {
					candidates.push(p.clone());
				}
			}
			candidates
		};

		if candidates.is_empty() {
			return Err(PolicyLookupError::NoMatchingEntry { username: identity.username.clone() });
		}

		let merged = policy::merge(&candidates);

		let mut state = self.state.write().await;
		state.merge_cache.insert(fingerprint, merged.clone());
		Ok(merged)
	}

	/// Returns the raw (unmerged) policy for a single `labels.yaml` entry,
	/// used by the admin debug endpoint (SPEC_FULL §4.10).
	pub async fn entry(&self, name: &str) -> Option<LabelPolicy> {
		self.state.read().await.policies.get(name).cloned()
	}

	async fn reload(&self) -> Result<(), StartupError> {
		let (path, contents) = read_labels_file(&self.search_paths)?;
		let policies = crate::policy_parser::parse_labels_file(&contents)?;
		let mut state = self.state.write().await;
		state.policies = policies;
		state.merge_cache.clear();
		tracing::info!(path = %path.display(), "reloaded labels.yaml");
		Ok(())
	}
}

fn read_labels_file(search_paths: &[PathBuf]) -> Result<(PathBuf, String), StartupError> {
	for dir in search_paths {
		let candidate = dir.join(LABELS_FILE_NAME);
		if candidate.is_file() {
			let contents = std::fs::read_to_string(&candidate).map_err(|source| StartupError::ConfigRead {
				path: candidate.display().to_string(),
				source,
			})?;
			return Ok((candidate, contents));
		}
	}
	Err(StartupError::LabelFileNotFound(
		search_paths.iter().map(|p| p.display().to_string()).collect(),
	))
}

/// Watches every search-path directory for modifications to `labels.yaml`
/// and reloads the store on change. A single task drives the watcher, so
/// writes are inherently serialized (spec §5, "Writers are serialised by
/// the file-watch callback").
pub fn spawn_watch(store: Arc<LabelStore>, ct: CancellationToken) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		let (tx, mut rx) = tokio::sync::mpsc::channel(16);
		let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
			if let Ok(event) = res {
				let _ = tx.blocking_send(event);
			}
		}) {
			Ok(w) => w,
			Err(e) => {
				tracing::warn!(error = %e, "failed to start labels.yaml watcher; hot reload disabled");
				return;
			},
		};

		for dir in &store.search_paths {
			if dir.is_dir() {
				if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
					tracing::warn!(dir = %dir.display(), error = %e, "failed to watch directory");
				}
			}
		}

		loop {
			tokio::select! {
				_ = ct.cancelled() => {
					tracing::info!("labels.yaml watcher cancelled");
					return;
				},
				event = rx.recv() => {
					let Some(event) = event else { return; };
					if !touches_labels_file(&event) {
						continue;
					}
					match store.reload().await {
						Ok(()) => {},
						Err(e) => tracing::error!(error = %e, "failed to reload labels.yaml, keeping previous policies"),
					}
				}
			}
		}
	})
}

fn touches_labels_file(event: &notify::Event) -> bool {
	event.paths.iter().any(|p| p.file_name().map(|n| n == LABELS_FILE_NAME).unwrap_or(false))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_labels(dir: &Path, contents: &str) {
		std::fs::write(dir.join(LABELS_FILE_NAME), contents).unwrap();
	}

	fn identity(username: &str, groups: &[&str]) -> UserIdentity {
		UserIdentity {
			username: username.to_string(),
			groups: groups.iter().map(|s| s.to_string()).collect(),
		}
	}

	#[tokio::test]
	async fn resolves_direct_username_entry() {
		let dir = tempdir();
		write_labels(
			dir.path(),
			r#"
alice:
  _rules:
    - name: namespace
      operator: "="
      values: ["prod"]
"#,
		);
		let store = LabelStore::load(vec![dir.path().to_path_buf()]).unwrap();
		let policy = store.resolve(&identity("alice", &[])).await.unwrap();
		assert_eq!(policy.rules[0].name, "namespace");
	}

	#[tokio::test]
	async fn unknown_identity_is_rejected() {
		let dir = tempdir();
		write_labels(dir.path(), "alice:\n  _rules:\n    - name: a\n      operator: \"=\"\n      values: [\"b\"]\n");
		let store = LabelStore::load(vec![dir.path().to_path_buf()]).unwrap();
		let err = store.resolve(&identity("bob", &[])).await.unwrap_err();
		assert!(matches!(err, PolicyLookupError::NoMatchingEntry { .. }));
	}

	#[tokio::test]
	async fn casing_is_preserved_and_significant() {
		let dir = tempdir();
		write_labels(
			dir.path(),
			"Team-A:\n  _rules:\n    - name: namespace\n      operator: \"=\"\n      values: [\"prod\"]\n",
		);
		let store = LabelStore::load(vec![dir.path().to_path_buf()]).unwrap();
		assert!(store.resolve(&identity("Team-A", &[])).await.is_ok());
		assert!(store.resolve(&identity("team-a", &[])).await.is_err());
	}

	#[tokio::test]
	async fn merge_cache_returns_same_policy_on_second_lookup() {
		let dir = tempdir();
		write_labels(dir.path(), "alice:\n  _rules:\n    - name: a\n      operator: \"=\"\n      values: [\"b\"]\n");
		let store = LabelStore::load(vec![dir.path().to_path_buf()]).unwrap();
		let id = identity("alice", &[]);
		let first = store.resolve(&id).await.unwrap();
		let second = store.resolve(&id).await.unwrap();
		assert_eq!(first.rules, second.rules);
	}

	// Minimal temp-dir helper so this module doesn't need an extra dev-dependency.
	struct TempDir(PathBuf);
	impl TempDir {
		fn path(&self) -> &Path {
			&self.0
		}
	}
	impl Drop for TempDir {
		fn drop(&mut self) {
			let _ = std::fs::remove_dir_all(&self.0);
		}
	}
	fn tempdir() -> TempDir {
		use std::sync::atomic::{AtomicU64, Ordering};
		static COUNTER: AtomicU64 = AtomicU64::new(0);
		let n = COUNTER.fetch_add(1, Ordering::Relaxed);
		let dir = std::env::temp_dir().join(format!("lbac-labelstore-test-{}-{n}", std::process::id()));
		let _ = std::fs::remove_dir_all(&dir);
		std::fs::create_dir_all(&dir).unwrap();
		TempDir(dir)
	}
}
