//! Falcon API endpoint constants

/// Default API base URL (US-1 cloud)
pub const DEFAULT_BASE_URL: &str = "https://api.crowdstrike.com";

/// OAuth2 client-credentials token endpoint
pub const TOKEN_PATH: &str = "/oauth2/token";

/// Event stream discovery endpoint
pub const DISCOVERY_PATH: &str = "/sensors/entities/datafeed/v2";
