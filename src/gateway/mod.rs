pub mod authz;
pub mod events;
pub mod fanout;
pub mod membership;
pub mod registry;
pub mod relay;
pub mod server;
