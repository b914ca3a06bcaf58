use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::{keys, CacheStore};
use crate::config::ClientConfig;
use crate::coordinator::RequestCoordinator;
use crate::db::{SqliteTokenStore, TokenStore};
use crate::error::{ForumError, Result};
use crate::models::{
    Comment, DetailThread, LeaderboardItem, LoginPayload, NewComment, NewThread, RegisterPayload, Thread, User,
    Votable, Vote, VoteType,
};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};

// `data` shapes of the individual endpoints. The whole `data` object is
// what gets cached, so these round-trip through the cache as well.

#[derive(Debug, Serialize, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserData {
    user: User,
}

#[derive(Debug, Serialize, Deserialize)]
struct UsersData {
    users: Vec<User>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadData {
    thread: Thread,
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadsData {
    threads: Vec<Thread>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailThreadData {
    detail_thread: DetailThread,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommentData {
    comment: Comment,
}

#[derive(Debug, Serialize, Deserialize)]
struct VoteData {
    vote: Vote,
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaderboardsData {
    leaderboards: Vec<LeaderboardItem>,
}

/// Invalidates cache families when dropped, so the cleanup after a vote
/// also runs when the vote future is cancelled or dropped mid-request.
struct InvalidateOnDrop<'a> {
    cache: &'a CacheStore,
    patterns: Vec<Regex>,
}

impl Drop for InvalidateOnDrop<'_> {
    fn drop(&mut self) {
        for pattern in &self.patterns {
            self.cache.invalidate(pattern);
        }
    }
}

/// Typed access to the forum API.
///
/// Construct one per application and share it; the cache and the in-flight
/// registry live inside and are shared by every operation.
pub struct ForumClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    cache: Arc<CacheStore>,
    coordinator: RequestCoordinator,
}

impl ForumClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, tokens: Arc<dyn TokenStore>) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache_ttl));
        let coordinator = RequestCoordinator::new(cache.clone());

        Self {
            config,
            transport,
            tokens,
            cache,
            coordinator,
        }
    }

    /// reqwest transport plus the SQLite session store in the configured data dir.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        let tokens = SqliteTokenStore::open_default(config.data_dir.as_deref())?;
        Ok(Self::new(config, Arc::new(transport), Arc::new(tokens)))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    // Session

    /// Stores a new bearer token. An empty token signs out.
    /// Cached data may be user-scoped, so any change drops the whole cache.
    pub fn put_access_token(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            self.tokens.clear()?;
        } else {
            self.tokens.save(token)?;
        }
        self.cache.clear();
        tracing::info!(signed_in = !token.is_empty(), "access token changed, cache cleared");
        Ok(())
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.tokens.load()
    }

    pub fn sign_out(&self) -> Result<()> {
        self.put_access_token("")
    }

    fn require_token(&self) -> Result<String> {
        self.tokens.load()?.ok_or(ForumError::Auth)
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        Ok(self.transport.send(request).await?)
    }

    // Fails with `Auth` before touching the network when no token is stored
    async fn send_authed(&self, request: ApiRequest) -> Result<ApiResponse> {
        let token = self.require_token()?;
        self.send(request.bearer(token)).await
    }

    // Users

    pub async fn register(&self, payload: &RegisterPayload) -> Result<User> {
        let url = self.config.endpoint("/register");
        let body = serde_json::to_value(payload)?;

        let data: UserData = self
            .coordinator
            .fetch(&url, || self.send(ApiRequest::post(&url).json(body)), None)
            .await?;

        tracing::info!(user = %data.user.id, "registered");
        Ok(data.user)
    }

    /// Exchanges credentials for a token and persists it (which clears the cache).
    pub async fn login(&self, email: &str, password: &str) -> Result<String> {
        let url = self.config.endpoint("/login");
        let body = serde_json::to_value(LoginPayload {
            email: email.to_string(),
            password: password.to_string(),
        })?;

        let data: TokenData = self
            .coordinator
            .fetch(&url, || self.send(ApiRequest::post(&url).json(body)), None)
            .await?;

        self.put_access_token(&data.token)?;
        Ok(data.token)
    }

    /// Login followed by a profile fetch.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        self.login(email, password).await?;
        self.get_own_profile().await
    }

    /// Startup check of a persisted session: the profile when the stored
    /// token still works, `None` when there is no token or the API refuses it.
    pub async fn restore_session(&self) -> Result<Option<User>> {
        if self.access_token()?.is_none() {
            return Ok(None);
        }

        match self.get_own_profile().await {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::info!(error = %e, "stored session could not be restored");
                Ok(None)
            }
        }
    }

    pub async fn get_all_users(&self) -> Result<Vec<User>> {
        let url = self.config.endpoint("/users");
        let data: UsersData = self
            .coordinator
            .fetch(&url, || self.send(ApiRequest::get(&url)), Some(keys::USERS))
            .await?;
        Ok(data.users)
    }

    pub async fn get_own_profile(&self) -> Result<User> {
        let url = self.config.endpoint("/users/me");
        let data: UserData = self
            .coordinator
            .fetch(&url, || self.send_authed(ApiRequest::get(&url)), Some(keys::PROFILE))
            .await?;
        Ok(data.user)
    }

    // Threads

    pub async fn create_thread(&self, thread: &NewThread) -> Result<Thread> {
        let url = self.config.endpoint("/threads");
        let body = serde_json::to_value(thread)?;

        let data: ThreadData = self
            .coordinator
            .fetch(&url, || self.send_authed(ApiRequest::post(&url).json(body)), None)
            .await?;

        self.cache.invalidate(&keys::threads_family());
        Ok(data.thread)
    }

    pub async fn see_all_threads(&self) -> Result<Vec<Thread>> {
        let url = self.config.endpoint("/threads");
        let data: ThreadsData = self
            .coordinator
            .fetch(&url, || self.send(ApiRequest::get(&url)), Some(keys::THREADS))
            .await?;
        Ok(data.threads)
    }

    pub async fn see_detail_thread(&self, thread_id: &str) -> Result<DetailThread> {
        let url = self.config.endpoint(&format!("/threads/{}", segment(thread_id)));
        let key = keys::thread(thread_id);
        let data: DetailThreadData = self
            .coordinator
            .fetch(&url, || self.send(ApiRequest::get(&url)), Some(key.as_str()))
            .await?;
        Ok(data.detail_thread)
    }

    /// Users and threads fetched concurrently, the way the home page loads.
    pub async fn populate_users_and_threads(&self) -> Result<(Vec<User>, Vec<Thread>)> {
        tokio::try_join!(self.get_all_users(), self.see_all_threads())
    }

    // Comments

    pub async fn create_comment(&self, thread_id: &str, content: &str) -> Result<Comment> {
        let url = self.config.endpoint(&format!("/threads/{}/comments", segment(thread_id)));
        let body = serde_json::to_value(NewComment {
            content: content.to_string(),
        })?;

        let data: CommentData = self
            .coordinator
            .fetch(&url, || self.send_authed(ApiRequest::post(&url).json(body)), None)
            .await?;

        self.cache.invalidate(&keys::thread_family(thread_id));
        Ok(data.comment)
    }

    // Votes

    pub async fn up_vote_thread(&self, thread_id: &str) -> Result<Vote> {
        self.vote_thread(thread_id, VoteType::Up).await
    }

    pub async fn down_vote_thread(&self, thread_id: &str) -> Result<Vote> {
        self.vote_thread(thread_id, VoteType::Down).await
    }

    pub async fn neutralize_vote_thread(&self, thread_id: &str) -> Result<Vote> {
        self.vote_thread(thread_id, VoteType::Neutral).await
    }

    pub async fn up_vote_comment(&self, thread_id: &str, comment_id: &str) -> Result<Vote> {
        self.vote_comment(thread_id, comment_id, VoteType::Up).await
    }

    pub async fn down_vote_comment(&self, thread_id: &str, comment_id: &str) -> Result<Vote> {
        self.vote_comment(thread_id, comment_id, VoteType::Down).await
    }

    pub async fn neutralize_vote_comment(&self, thread_id: &str, comment_id: &str) -> Result<Vote> {
        self.vote_comment(thread_id, comment_id, VoteType::Neutral).await
    }

    pub async fn vote_thread(&self, thread_id: &str, vote: VoteType) -> Result<Vote> {
        // Runs on failure or cancellation too, so a rejected vote never lingers in the cache
        let _cleanup = InvalidateOnDrop {
            cache: &self.cache,
            patterns: vec![keys::thread_family(thread_id), keys::threads_family()],
        };
        self.update_cached_detail(thread_id, |detail, user_id| detail.apply_vote(user_id, vote));

        let url = self
            .config
            .endpoint(&format!("/threads/{}/{}", segment(thread_id), vote.endpoint()));
        let data: VoteData = self
            .coordinator
            .fetch(&url, || self.send_authed(ApiRequest::post(&url)), None)
            .await?;

        Ok(data.vote)
    }

    pub async fn vote_comment(&self, thread_id: &str, comment_id: &str, vote: VoteType) -> Result<Vote> {
        let _cleanup = InvalidateOnDrop {
            cache: &self.cache,
            patterns: vec![keys::thread_family(thread_id)],
        };
        self.update_cached_detail(thread_id, |detail, user_id| {
            if let Some(comment) = detail.comment_mut(comment_id) {
                comment.apply_vote(user_id, vote);
            }
        });

        let url = self.config.endpoint(&format!(
            "/threads/{}/comments/{}/{}",
            segment(thread_id),
            segment(comment_id),
            vote.endpoint()
        ));
        let data: VoteData = self
            .coordinator
            .fetch(&url, || self.send_authed(ApiRequest::post(&url)), None)
            .await?;

        Ok(data.vote)
    }

    // Optimistic edit of a cached thread detail on behalf of the cached profile.
    // Skipped when either is missing from the cache.
    fn update_cached_detail(&self, thread_id: &str, edit: impl FnOnce(&mut DetailThread, &str)) {
        let user_id = match self.cache.get::<UserData>(keys::PROFILE) {
            Ok(Some(profile)) => profile.user.id,
            _ => return,
        };

        let key = keys::thread(thread_id);
        let mut cached = match self.cache.get::<DetailThreadData>(&key) {
            Ok(Some(cached)) => cached,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached thread detail unreadable, skipping optimistic update");
                return;
            }
        };

        edit(&mut cached.detail_thread, &user_id);
        if let Err(e) = self.cache.set(&key, &cached) {
            tracing::warn!(key = %key, error = %e, "optimistic update not stored");
        }
    }

    // Leaderboards

    pub async fn see_leaderboards(&self) -> Result<Vec<LeaderboardItem>> {
        let url = self.config.endpoint("/leaderboards");
        let data: LeaderboardsData = self
            .coordinator
            .fetch(&url, || self.send(ApiRequest::get(&url)), Some(keys::LEADERBOARDS))
            .await?;
        Ok(data.leaderboards)
    }

    // Maintenance

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cancel_all_pending(&self) {
        self.coordinator.cancel_all();
    }
}

fn segment(id: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_percent_encoded_in_paths() {
        assert_eq!(segment("thread-1"), "thread-1");
        assert_eq!(segment("a/b c"), "a%2Fb%20c");
    }

    #[test]
    fn detail_data_uses_camel_case_field() {
        let json = serde_json::json!({
            "detailThread": {
                "id": "thread-1",
                "title": "Hello",
                "body": "<div>Body</div>",
                "category": "General",
                "createdAt": "2021-06-21T07:00:00.000Z",
                "owner": {"id": "users-1", "name": "John", "avatar": ""},
                "upVotesBy": [],
                "downVotesBy": [],
                "comments": []
            }
        });
        let data: DetailThreadData = serde_json::from_value(json).unwrap();
        assert_eq!(data.detail_thread.owner.name, "John");
    }
}
