/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The identity/session service origin (e.g. `http://localhost:4001`).
    pub identity_service_url: String,
    /// The conversation store origin channels are fetched from.
    pub conversation_store_url: String,
    /// Port the gateway binds to.
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            identity_service_url: required_var("IDENTITY_SERVICE_URL"),
            conversation_store_url: required_var("CONVERSATION_STORE_URL"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
