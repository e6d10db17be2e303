//! GitHub public-events feed.
//!
//! Polls `/users/{user}/events`, newest first, up to ten pages of 100, and
//! normalizes each raw event into one or more [`NewActivityEvent`]s. Push
//! events fan out into one commit event per commit, keyed by the commit sha
//! so the same commit seen through different pushes deduplicates; every
//! other kind keeps GitHub's own event id.

use crate::entities::activity_event::{EventPayload, NewActivityEvent, ResourceRef};
use crate::entities::feed_cursor::FeedPosition;
use crate::feeds::{FeedBatch, FeedError, SourceFeed, SourceId};
use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::warn;

const GITHUB_API_URL: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;
const MAX_PAGES: u32 = 10;

/// Feed over one GitHub user's public timeline.
pub struct GithubEventsFeed {
    user: String,
    token: Option<String>,
    /// How far back a first poll reaches when no cursor exists yet.
    lookback: time::Duration,
    http_client: reqwest::Client,
}

impl GithubEventsFeed {
    pub fn new(user: String, token: Option<String>, lookback: time::Duration) -> Self {
        Self {
            user,
            token,
            lookback,
            http_client: reqwest::Client::new(),
        }
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<RawEvent>, FeedError> {
        let url = format!("{GITHUB_API_URL}/users/{}/events", self.user);
        let mut request = self
            .http_client
            .get(&url)
            .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header("User-Agent", "streakline");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::FORBIDDEN
            || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(FeedError::RateLimited { retry_after_secs });
        }
        if !response.status().is_success() {
            return Err(FeedError::Api {
                message: format!("GitHub returned {}", response.status()),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceFeed for GithubEventsFeed {
    fn source_id(&self) -> SourceId {
        SourceId::Github {
            user: self.user.clone(),
        }
    }

    async fn fetch_since(&self, position: Option<&FeedPosition>) -> Result<FeedBatch, FeedError> {
        let floor = position
            .and_then(|p| p.last_seen_at)
            .unwrap_or_else(|| OffsetDateTime::now_utc() - self.lookback);

        let mut events = Vec::new();
        let mut newest: Option<OffsetDateTime> = None;

        for page in 1..=MAX_PAGES {
            let raw_events = self.fetch_page(page).await?;
            let page_len = raw_events.len();
            let mut reached_floor = false;

            for raw in raw_events {
                if raw.created_at <= floor {
                    reached_floor = true;
                    continue;
                }
                newest = Some(newest.map_or(raw.created_at, |n| n.max(raw.created_at)));
                events.extend(normalize_event(raw));
            }

            if reached_floor || page_len < PER_PAGE as usize {
                break;
            }
        }

        Ok(FeedBatch {
            events,
            next_position: newest.map(FeedPosition::at),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    actor: RawActor,
    repo: RawRepo,
    payload: serde_json::Value,
    #[serde(default)]
    public: bool,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    login: String,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    /// `owner/name`.
    name: String,
}

fn split_repo(full_name: &str) -> ResourceRef {
    match full_name.split_once('/') {
        Some((owner, name)) => ResourceRef::new(owner, name),
        None => ResourceRef::new(full_name, ""),
    }
}

/// Normalize one raw GitHub event. A push fans out into one event per
/// commit; an unrecognized or malformed event yields nothing.
fn normalize_event(raw: RawEvent) -> Vec<NewActivityEvent> {
    let resource = split_repo(&raw.repo.name);
    let envelope = |event_id: String, payload: EventPayload| NewActivityEvent {
        event_id,
        occurred_at: raw.created_at,
        resource: resource.clone(),
        actor: raw.actor.login.clone(),
        actor_avatar: raw.actor.avatar_url.clone(),
        is_public: raw.public,
        venue: None,
        native_event_id: None,
        payload,
    };

    let payloads: Result<Vec<(String, EventPayload)>, serde_json::Error> = match raw.kind.as_str()
    {
        "PushEvent" => serde_json::from_value::<PushPayload>(raw.payload.clone()).map(|push| {
            let branch = push
                .r#ref
                .strip_prefix("refs/heads/")
                .unwrap_or(&push.r#ref)
                .to_string();
            push.commits
                .into_iter()
                .map(|commit| {
                    let url = format!(
                        "https://github.com/{}/commit/{}",
                        raw.repo.name, commit.sha
                    );
                    (
                        commit.sha.clone(),
                        EventPayload::Commit {
                            sha: commit.sha,
                            message: commit.message,
                            branch: branch.clone(),
                            url,
                        },
                    )
                })
                .collect()
        }),
        "PullRequestEvent" => {
            serde_json::from_value::<PullRequestPayload>(raw.payload.clone()).map(|p| {
                vec![(
                    raw.id.clone(),
                    EventPayload::PullRequest {
                        number: p.pull_request.number,
                        action: p.action,
                        title: p.pull_request.title,
                        merged: p.pull_request.merged.unwrap_or(false),
                    },
                )]
            })
        }
        "PullRequestReviewEvent" => {
            serde_json::from_value::<ReviewPayload>(raw.payload.clone()).map(|p| {
                vec![(
                    raw.id.clone(),
                    EventPayload::Review {
                        number: p.pull_request.number,
                        action: p.action,
                        state: p.review.state,
                    },
                )]
            })
        }
        "IssuesEvent" => serde_json::from_value::<IssuePayload>(raw.payload.clone()).map(|p| {
            vec![(
                raw.id.clone(),
                EventPayload::Issue {
                    number: p.issue.number,
                    action: p.action,
                    title: p.issue.title,
                },
            )]
        }),
        "ReleaseEvent" => serde_json::from_value::<ReleasePayload>(raw.payload.clone()).map(|p| {
            vec![(
                raw.id.clone(),
                EventPayload::Release {
                    tag: p.release.tag_name,
                    name: p.release.name,
                    prerelease: p.release.prerelease,
                },
            )]
        }),
        "CreateEvent" => serde_json::from_value::<RefPayload>(raw.payload.clone()).map(|p| {
            vec![(
                raw.id.clone(),
                EventPayload::Create {
                    ref_type: p.ref_type,
                    ref_name: p.r#ref,
                },
            )]
        }),
        "DeleteEvent" => serde_json::from_value::<RefPayload>(raw.payload.clone()).map(|p| {
            vec![(
                raw.id.clone(),
                EventPayload::Delete {
                    ref_type: p.ref_type,
                    ref_name: p.r#ref.unwrap_or_default(),
                },
            )]
        }),
        "ForkEvent" => serde_json::from_value::<ForkPayload>(raw.payload.clone()).map(|p| {
            let fork = split_repo(&p.forkee.full_name);
            vec![(
                raw.id.clone(),
                EventPayload::Fork {
                    fork_owner: fork.owner,
                    fork_name: fork.name,
                },
            )]
        }),
        "WatchEvent" => serde_json::from_value::<ActionPayload>(raw.payload.clone()).map(|p| {
            vec![(raw.id.clone(), EventPayload::Star { action: p.action })]
        }),
        "IssueCommentEvent" => {
            serde_json::from_value::<IssuePayload>(raw.payload.clone()).map(|p| {
                vec![(
                    raw.id.clone(),
                    EventPayload::IssueComment {
                        number: p.issue.number,
                        action: p.action,
                    },
                )]
            })
        }
        "PullRequestReviewCommentEvent" => {
            serde_json::from_value::<PullRequestPayload>(raw.payload.clone()).map(|p| {
                vec![(
                    raw.id.clone(),
                    EventPayload::ReviewComment {
                        number: p.pull_request.number,
                        action: p.action,
                    },
                )]
            })
        }
        "CommitCommentEvent" => {
            serde_json::from_value::<CommitCommentPayload>(raw.payload.clone()).map(|p| {
                vec![(
                    raw.id.clone(),
                    EventPayload::CommitComment {
                        sha: p.comment.commit_id,
                    },
                )]
            })
        }
        "MemberEvent" => serde_json::from_value::<MemberPayload>(raw.payload.clone()).map(|p| {
            vec![(
                raw.id.clone(),
                EventPayload::Member {
                    member: p.member.login,
                    action: p.action,
                },
            )]
        }),
        "GollumEvent" => serde_json::from_value::<GollumPayload>(raw.payload.clone()).map(|p| {
            p.pages
                .into_iter()
                .enumerate()
                .map(|(i, page)| {
                    (
                        format!("{}-{i}", raw.id),
                        EventPayload::Wiki {
                            page: page.page_name,
                            action: page.action,
                        },
                    )
                })
                .collect()
        }),
        "PublicEvent" => Ok(vec![(
            raw.id.clone(),
            EventPayload::Visibility {
                action: "public".to_string(),
            },
        )]),
        "DiscussionEvent" => {
            serde_json::from_value::<DiscussionPayload>(raw.payload.clone()).map(|p| {
                vec![(
                    raw.id.clone(),
                    EventPayload::Discussion {
                        title: p.discussion.title,
                        action: p.action,
                    },
                )]
            })
        }
        _ => Ok(Vec::new()),
    };

    match payloads {
        Ok(payloads) => payloads
            .into_iter()
            .map(|(event_id, payload)| envelope(event_id, payload))
            .collect(),
        Err(error) => {
            warn!(
                event_id = %raw.id,
                event_type = %raw.kind,
                %error,
                "Skipping malformed GitHub event"
            );
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    r#ref: String,
    #[serde(default)]
    commits: Vec<PushCommit>,
}

#[derive(Debug, Deserialize)]
struct PushCommit {
    sha: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    pull_request: PullRequestRef,
}

#[derive(Debug, Deserialize)]
struct PullRequestRef {
    number: i64,
    title: Option<String>,
    merged: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    action: String,
    pull_request: PullRequestRef,
    review: ReviewRef,
}

#[derive(Debug, Deserialize)]
struct ReviewRef {
    state: String,
}

#[derive(Debug, Deserialize)]
struct IssuePayload {
    action: String,
    issue: IssueRef,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    number: i64,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    release: ReleaseRef,
}

#[derive(Debug, Deserialize)]
struct ReleaseRef {
    tag_name: String,
    name: Option<String>,
    #[serde(default)]
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct RefPayload {
    ref_type: String,
    r#ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ForkPayload {
    forkee: ForkeeRef,
}

#[derive(Debug, Deserialize)]
struct ForkeeRef {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct ActionPayload {
    action: String,
}

#[derive(Debug, Deserialize)]
struct CommitCommentPayload {
    comment: CommitCommentRef,
}

#[derive(Debug, Deserialize)]
struct CommitCommentRef {
    commit_id: String,
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    action: String,
    member: MemberRef,
}

#[derive(Debug, Deserialize)]
struct MemberRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GollumPayload {
    #[serde(default)]
    pages: Vec<GollumPage>,
}

#[derive(Debug, Deserialize)]
struct GollumPage {
    page_name: String,
    action: String,
}

#[derive(Debug, Deserialize)]
struct DiscussionPayload {
    action: String,
    discussion: DiscussionRef,
}

#[derive(Debug, Deserialize)]
struct DiscussionRef {
    title: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::entities::EventKind;

    fn raw(kind: &str, payload: serde_json::Value) -> RawEvent {
        serde_json::from_value(serde_json::json!({
            "id": "22249084964",
            "type": kind,
            "actor": { "login": "octocat", "avatar_url": "https://example.com/a.png" },
            "repo": { "name": "octocat/hello-world" },
            "payload": payload,
            "public": true,
            "created_at": "2025-03-01T12:00:00Z",
        }))
        .unwrap()
    }

    #[test]
    fn push_event_fans_out_per_commit_keyed_by_sha() {
        let events = normalize_event(raw(
            "PushEvent",
            serde_json::json!({
                "ref": "refs/heads/main",
                "commits": [
                    { "sha": "abc123", "message": "fix parser" },
                    { "sha": "def456", "message": "add tests" },
                ],
            }),
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_id, "abc123");
        assert_eq!(events[1].event_id, "def456");
        assert_eq!(events[0].kind(), EventKind::Commit);
        match &events[0].payload {
            EventPayload::Commit { branch, url, .. } => {
                assert_eq!(branch, "main");
                assert_eq!(url, "https://github.com/octocat/hello-world/commit/abc123");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn pull_request_event_keeps_github_event_id() {
        let events = normalize_event(raw(
            "PullRequestEvent",
            serde_json::json!({
                "action": "closed",
                "pull_request": { "number": 42, "title": "Add feature", "merged": true },
            }),
        ));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "22249084964");
        match &events[0].payload {
            EventPayload::PullRequest { number, merged, .. } => {
                assert_eq!(*number, 42);
                assert!(merged);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_dropped() {
        assert!(normalize_event(raw("SponsorshipEvent", serde_json::json!({}))).is_empty());
    }

    #[test]
    fn malformed_payload_is_skipped_not_fatal() {
        let events = normalize_event(raw(
            "PullRequestEvent",
            serde_json::json!({ "action": "opened" }),
        ));
        assert!(events.is_empty());
    }

    #[test]
    fn fork_event_records_destination_repo() {
        let events = normalize_event(raw(
            "ForkEvent",
            serde_json::json!({ "forkee": { "full_name": "someone/hello-world" } }),
        ));
        match &events[0].payload {
            EventPayload::Fork {
                fork_owner,
                fork_name,
            } => {
                assert_eq!(fork_owner, "someone");
                assert_eq!(fork_name, "hello-world");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
