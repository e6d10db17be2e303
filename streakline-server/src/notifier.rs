//! Discord webhook notification channel.
//!
//! Formats each activity event as one embed and posts it to a
//! Discord-compatible webhook. The pipeline treats any non-success status
//! as undelivered and retries on a later cycle.

use rust_decimal::Decimal;
use streakline_core::entities::activity_event::{ActivityEvent, EventPayload};
use streakline_core::processors::{Notifier, NotifyError};
use url::Url;

pub struct DiscordWebhookNotifier {
    webhook_url: Url,
    http_client: reqwest::Client,
}

impl DiscordWebhookNotifier {
    pub fn new(webhook_url: Url) -> Self {
        Self {
            webhook_url,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordWebhookNotifier {
    async fn notify(&self, event: &ActivityEvent) -> Result<(), NotifyError> {
        let embed = build_embed(event);
        let response = self
            .http_client
            .post(self.webhook_url.clone())
            .json(&serde_json::json!({ "embeds": [embed] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// One Discord embed per event.
fn build_embed(event: &ActivityEvent) -> serde_json::Value {
    let mut embed = serde_json::json!({
        "description": describe(event),
        "timestamp": event
            .occurred_at
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default(),
        "footer": { "text": event.resource().to_string() },
    });
    let mut author = serde_json::json!({ "name": event.actor });
    if let Some(avatar) = &event.actor_avatar {
        author["icon_url"] = serde_json::Value::String(avatar.clone());
    }
    embed["author"] = author;
    embed
}

fn format_price(price: &Decimal, currency: &str) -> String {
    format!("{} {}", price.normalize(), currency)
}

/// Human-readable one-liner for each event kind.
fn describe(event: &ActivityEvent) -> String {
    let actor = &event.actor;
    let resource = event.resource();
    match &event.payload.0 {
        EventPayload::Commit { message, branch, url, .. } => {
            let summary = message.lines().next().unwrap_or_default();
            format!("**{actor}** pushed to `{branch}`: [{summary}]({url})")
        }
        EventPayload::PullRequest { number, action, title, merged } => {
            let verb = if *merged { "merged" } else { action.as_str() };
            let title = title.as_deref().unwrap_or("untitled");
            format!("**{actor}** {verb} pull request #{number}: {title}")
        }
        EventPayload::Review { number, state, .. } => {
            format!("**{actor}** reviewed pull request #{number} ({state})")
        }
        EventPayload::Issue { number, action, title } => {
            let title = title.as_deref().unwrap_or("untitled");
            format!("**{actor}** {action} issue #{number}: {title}")
        }
        EventPayload::Release { tag, name, prerelease } => {
            let label = name.as_deref().unwrap_or(tag);
            if *prerelease {
                format!("**{actor}** published pre-release `{tag}`: {label}")
            } else {
                format!("**{actor}** published release `{tag}`: {label}")
            }
        }
        EventPayload::Create { ref_type, ref_name } => match ref_name {
            Some(name) => format!("**{actor}** created {ref_type} `{name}`"),
            None => format!("**{actor}** created a {ref_type}"),
        },
        EventPayload::Delete { ref_type, ref_name } => {
            format!("**{actor}** deleted {ref_type} `{ref_name}`")
        }
        EventPayload::Fork { fork_owner, fork_name } => {
            format!("**{actor}** forked {resource} to {fork_owner}/{fork_name}")
        }
        EventPayload::Star { .. } => format!("**{actor}** starred {resource}"),
        EventPayload::IssueComment { number, .. } => {
            format!("**{actor}** commented on issue #{number}")
        }
        EventPayload::ReviewComment { number, .. } => {
            format!("**{actor}** commented on a review of pull request #{number}")
        }
        EventPayload::CommitComment { sha } => {
            let short = &sha[..sha.len().min(7)];
            format!("**{actor}** commented on commit `{short}`")
        }
        EventPayload::Member { member, action } => {
            format!("**{actor}** {action} collaborator {member}")
        }
        EventPayload::Wiki { page, action } => {
            format!("**{actor}** {action} wiki page \"{page}\"")
        }
        EventPayload::Visibility { action } => {
            format!("**{actor}** made {resource} {action}")
        }
        EventPayload::Discussion { title, action } => {
            let title = title.as_deref().unwrap_or("untitled");
            format!("**{actor}** {action} discussion: {title}")
        }
        EventPayload::Mint { token_id, to } => {
            format!("**{to}** minted token #{token_id}")
        }
        EventPayload::Transfer { token_id, from, to } => {
            format!("**{from}** transferred token #{token_id} to {to}")
        }
        EventPayload::Burn { token_id, from } => {
            format!("**{from}** burned token #{token_id}")
        }
        EventPayload::Listing { listing_id, seller, price, currency } => {
            format!(
                "**{seller}** listed `{listing_id}` for {}",
                format_price(price, currency)
            )
        }
        EventPayload::Sale { buyer, price, currency, .. } => {
            format!(
                "**{buyer}** bought for {}",
                format_price(price, currency)
            )
        }
        EventPayload::Delisting { listing_id, seller } => match seller {
            Some(seller) => format!("**{seller}** delisted `{listing_id}`"),
            None => format!("listing `{listing_id}` was withdrawn"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;
    use time::macros::datetime;

    fn event(payload: EventPayload) -> ActivityEvent {
        ActivityEvent {
            event_id: "abc123".to_string(),
            kind: payload.kind(),
            occurred_at: datetime!(2025-03-01 12:00 UTC),
            resource_owner: "octocat".to_string(),
            resource_name: "hello-world".to_string(),
            actor: "octocat".to_string(),
            actor_avatar: Some("https://example.com/a.png".to_string()),
            is_public: true,
            venue: None,
            native_event_id: None,
            payload: Json(payload),
            posted: false,
            posted_at: None,
            created_at: datetime!(2025-03-01 12:00 UTC),
        }
    }

    #[test]
    fn commit_description_uses_first_message_line() {
        let text = describe(&event(EventPayload::Commit {
            sha: "abc123".to_string(),
            message: "fix parser\n\nlong body".to_string(),
            branch: "main".to_string(),
            url: "https://github.com/octocat/hello-world/commit/abc123".to_string(),
        }));
        assert!(text.contains("fix parser"));
        assert!(!text.contains("long body"));
        assert!(text.contains("`main`"));
    }

    #[test]
    fn merged_pull_request_says_merged() {
        let text = describe(&event(EventPayload::PullRequest {
            number: 42,
            action: "closed".to_string(),
            title: Some("Add feature".to_string()),
            merged: true,
        }));
        assert!(text.contains("merged pull request #42"));
    }

    #[test]
    fn sale_description_normalizes_trailing_zeroes() {
        let text = describe(&event(EventPayload::Sale {
            listing_id: None,
            seller: None,
            buyer: "0xbuyer".to_string(),
            price: Decimal::new(1500, 3),
            currency: "ETH".to_string(),
        }));
        assert!(text.contains("1.5 ETH"));
    }

    #[test]
    fn embed_carries_actor_and_repo() {
        let embed = build_embed(&event(EventPayload::Star {
            action: "started".to_string(),
        }));
        assert_eq!(embed["author"]["name"], "octocat");
        assert_eq!(embed["footer"]["text"], "octocat/hello-world");
    }
}
