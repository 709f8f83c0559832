//! CI dashboard configuration — loaded from environment variables.

#[derive(Clone, Debug)]
pub struct CiConfig {
    /// GitHub webhook secret for HMAC validation.
    pub github_webhook_secret: String,
    /// GitHub token for commit status calls.
    pub github_token: String,
    /// GitHub API base URL (overridable for GitHub Enterprise).
    pub github_api_url: String,
    /// Public base URL of the dashboard, used for commit status links.
    pub site_url: String,
    /// Token that identifies staff callers of the API.
    pub staff_token: String,
    /// Drop webhook deliveries whose `X-GitHub-Delivery` id was already dispatched.
    pub dedup_deliveries: bool,
    /// Capacity of the commit status queue.
    pub status_queue_size: usize,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            github_webhook_secret: String::new(),
            github_token: String::new(),
            github_api_url: "https://api.github.com".to_string(),
            site_url: "http://localhost:9090/ci".to_string(),
            staff_token: String::new(),
            dedup_deliveries: false,
            status_queue_size: 256,
        }
    }
}

impl CiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let github_webhook_secret = std::env::var("CI_WEBHOOK_SECRET").unwrap_or_default();
        let github_token = std::env::var("CI_GITHUB_TOKEN").unwrap_or_default();
        let github_api_url =
            std::env::var("CI_GITHUB_API_URL").unwrap_or(defaults.github_api_url);
        let site_url = std::env::var("CI_SITE_URL").unwrap_or(defaults.site_url);
        let staff_token = std::env::var("CI_STAFF_TOKEN").unwrap_or_default();
        let dedup_deliveries = std::env::var("CI_DEDUP_DELIVERIES")
            .ok()
            .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.dedup_deliveries);
        let status_queue_size = std::env::var("CI_STATUS_QUEUE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.status_queue_size);

        if github_webhook_secret.is_empty() {
            tracing::warn!("CI_WEBHOOK_SECRET not set -- all webhooks will be rejected");
        }
        if github_token.is_empty() {
            tracing::warn!("CI_GITHUB_TOKEN not set -- GitHub status updates disabled");
        }
        if staff_token.is_empty() {
            tracing::warn!("CI_STAFF_TOKEN not set -- staff API disabled");
        }

        Self {
            github_webhook_secret,
            github_token,
            github_api_url,
            site_url,
            staff_token,
            dedup_deliveries,
            status_queue_size,
        }
    }

    /// Whether `token` identifies a staff caller.
    pub fn is_staff_token(&self, token: &str) -> bool {
        !self.staff_token.is_empty() && token == self.staff_token
    }
}
