use std::sync::Arc;

use syslens_common::envelope::EnvelopeCodec;

use crate::identity::IdentityService;
use crate::persistence::Db;
use crate::tsdb::MetricsStore;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub store: Arc<dyn MetricsStore>,
    pub identity: IdentityService,
    pub codec: EnvelopeCodec,
    /// Bearer shared with aggregators; empty disables ingest auth.
    pub api_token: String,
}
