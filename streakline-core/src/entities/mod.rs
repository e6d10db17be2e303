pub mod achievements;
pub mod activity_event;
pub mod feed_cursor;
pub mod listings;
pub mod streaks;
pub mod watermark;

use serde::{Deserialize, Serialize};

/// Closed set of activity categories the pipeline understands.
///
/// The first sixteen variants come from the source-control feed, the rest
/// from NFT marketplace feeds. The event store and delivery pipeline only
/// ever match exhaustively on this enum; adding a variant forces every
/// consumer to handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "event_kind")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Commit,
    PullRequest,
    Review,
    Issue,
    Release,
    Create,
    Delete,
    Fork,
    Star,
    IssueComment,
    ReviewComment,
    CommitComment,
    Member,
    Wiki,
    Visibility,
    Discussion,
    Mint,
    Transfer,
    Burn,
    Listing,
    Sale,
    Delisting,
}

impl EventKind {
    /// Every kind, in delivery iteration order.
    pub const ALL: [EventKind; 22] = [
        EventKind::Commit,
        EventKind::PullRequest,
        EventKind::Review,
        EventKind::Issue,
        EventKind::Release,
        EventKind::Create,
        EventKind::Delete,
        EventKind::Fork,
        EventKind::Star,
        EventKind::IssueComment,
        EventKind::ReviewComment,
        EventKind::CommitComment,
        EventKind::Member,
        EventKind::Wiki,
        EventKind::Visibility,
        EventKind::Discussion,
        EventKind::Mint,
        EventKind::Transfer,
        EventKind::Burn,
        EventKind::Listing,
        EventKind::Sale,
        EventKind::Delisting,
    ];

    /// Whether this kind originates from a marketplace feed and therefore
    /// carries a venue and a venue-native event id.
    pub fn is_marketplace(self) -> bool {
        matches!(
            self,
            EventKind::Mint
                | EventKind::Transfer
                | EventKind::Burn
                | EventKind::Listing
                | EventKind::Sale
                | EventKind::Delisting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Commit => "commit",
            EventKind::PullRequest => "pull_request",
            EventKind::Review => "review",
            EventKind::Issue => "issue",
            EventKind::Release => "release",
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Fork => "fork",
            EventKind::Star => "star",
            EventKind::IssueComment => "issue_comment",
            EventKind::ReviewComment => "review_comment",
            EventKind::CommitComment => "commit_comment",
            EventKind::Member => "member",
            EventKind::Wiki => "wiki",
            EventKind::Visibility => "visibility",
            EventKind::Discussion => "discussion",
            EventKind::Mint => "mint",
            EventKind::Transfer => "transfer",
            EventKind::Burn => "burn",
            EventKind::Listing => "listing",
            EventKind::Sale => "sale",
            EventKind::Delisting => "delisting",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Streak bucket granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "streak_kind")]
#[serde(rename_all = "lowercase")]
pub enum StreakKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl StreakKind {
    pub const ALL: [StreakKind; 4] = [
        StreakKind::Daily,
        StreakKind::Weekly,
        StreakKind::Monthly,
        StreakKind::Yearly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StreakKind::Daily => "daily",
            StreakKind::Weekly => "weekly",
            StreakKind::Monthly => "monthly",
            StreakKind::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for StreakKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
