pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod id;
pub mod routes;
pub mod store;

use std::sync::Arc;

use auth::verifier::IdentityVerifier;
use config::Config;
use gateway::fanout::Fanout;
use gateway::membership::ChannelMembership;
use gateway::registry::ConnectionRegistry;
use gateway::relay::RunCoordinator;
use store::ChannelStore;

/// Shared application state available to all route handlers and to
/// in-process callers relaying generation output.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub membership: Arc<ChannelMembership>,
    pub channels: Arc<dyn ChannelStore>,
    pub fanout: Arc<Fanout>,
    pub runs: Arc<RunCoordinator>,
}

impl AppState {
    pub fn new(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        channels: Arc<dyn ChannelStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(verifier));
        let membership = Arc::new(ChannelMembership::new());
        let fanout = Arc::new(Fanout::new(registry.clone(), membership.clone()));
        let runs = Arc::new(RunCoordinator::new(fanout.clone()));

        Self {
            config: Arc::new(config),
            registry,
            membership,
            channels,
            fanout,
            runs,
        }
    }
}
