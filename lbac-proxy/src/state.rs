//! Shared, cloneable application state handed to every axum handler,
//! mirroring the teacher's `admin::App` (`Arc`-wrapped state behind a
//! `Clone` struct passed to `Router::with_state`).

use std::sync::Arc;

use lbac_core::config::AppConfig;

use crate::identity::IdentityService;
use crate::labelstore::LabelStore;
use crate::proxy::Upstream;

#[derive(Clone)]
pub struct AppState {
	pub identity: Arc<IdentityService>,
	pub labels: Arc<LabelStore>,
	pub loki: Arc<Upstream>,
	pub thanos: Arc<Upstream>,
	pub tempo: Arc<Upstream>,
	pub config: Arc<AppConfig>,
}
