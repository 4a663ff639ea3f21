//! The fetch-worker invocation stored as a job's command.

use pollmesh_id::SubscriptionId;

use crate::subscriptions::AvailableApi;

const SUBSCRIPTION_FLAG: &str = "--subscriptionID";

/// Renders job commands for the configured fetch script.
#[derive(Debug, Clone)]
pub struct CommandTemplate {
    script: String,
}

impl CommandTemplate {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// `<script> --url <url> --tokenRequired <True|False> --subscriptionID <id> --apiID <id>`
    pub fn render(&self, api: &AvailableApi, subscription: SubscriptionId) -> String {
        let token_required = if api.api_token_required { "True" } else { "False" };
        format!(
            "{} --url {} --tokenRequired {} {} {} --apiID {}",
            self.script, api.url, token_required, SUBSCRIPTION_FLAG, subscription, api.id
        )
    }
}

/// Recovers the subscription a job belongs to from its command.
pub fn subscription_id_of(command: &str) -> Option<SubscriptionId> {
    let mut tokens = command.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == SUBSCRIPTION_FLAG {
            return tokens.next()?.parse().ok();
        }
        if let Some(value) = token.strip_prefix("--subscriptionID=") {
            return value.parse().ok();
        }
    }
    None
}
