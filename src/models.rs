use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    // Not every endpoint returns the email
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: String,
}

/// Author summary embedded in threads and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub owner_id: String,
    #[serde(default)]
    pub up_votes_by: Vec<String>,
    #[serde(default)]
    pub down_votes_by: Vec<String>,
    #[serde(default)]
    pub total_comments: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailThread {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub owner: Owner,
    #[serde(default)]
    pub up_votes_by: Vec<String>,
    #[serde(default)]
    pub down_votes_by: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl DetailThread {
    pub fn comment_mut(&mut self, comment_id: &str) -> Option<&mut Comment> {
        self.comments.iter_mut().find(|c| c.id == comment_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub owner: Owner,
    #[serde(default)]
    pub up_votes_by: Vec<String>,
    #[serde(default)]
    pub down_votes_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardItem {
    pub user: User,
    pub score: i64,
}

/// Confirmation returned by every vote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub comment_id: Option<String>,
    pub vote_type: VoteType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteType {
    Up,
    Down,
    Neutral,
}

impl VoteType {
    pub fn as_i8(self) -> i8 {
        match self {
            VoteType::Up => 1,
            VoteType::Down => -1,
            VoteType::Neutral => 0,
        }
    }

    /// Last path segment of the matching vote endpoint.
    pub fn endpoint(self) -> &'static str {
        match self {
            VoteType::Up => "up-vote",
            VoteType::Down => "down-vote",
            VoteType::Neutral => "neutral-vote",
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoteType::Up => "up",
            VoteType::Down => "down",
            VoteType::Neutral => "neutral",
        };
        f.write_str(name)
    }
}

impl FromStr for VoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "up-vote" | "1" => Ok(VoteType::Up),
            "down" | "down-vote" | "-1" => Ok(VoteType::Down),
            "neutral" | "neutral-vote" | "0" => Ok(VoteType::Neutral),
            other => Err(format!("unknown vote type {:?}", other)),
        }
    }
}

impl Serialize for VoteType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.as_i8())
    }
}

impl<'de> Deserialize<'de> for VoteType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // The API sends 1 / -1 / 0, older clients typed it as a string
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(1) => Ok(VoteType::Up),
            Raw::Number(-1) => Ok(VoteType::Down),
            Raw::Number(0) => Ok(VoteType::Neutral),
            Raw::Number(n) => Err(de::Error::custom(format!("unknown vote type {}", n))),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// Moves `user_id` toward the requested vote state. Never toggles.
/// A user ends up in at most one of the two sets.
pub fn apply_vote(up: &mut Vec<String>, down: &mut Vec<String>, user_id: &str, vote: VoteType) {
    up.retain(|id| id != user_id || vote == VoteType::Up);
    down.retain(|id| id != user_id || vote == VoteType::Down);

    let target = match vote {
        VoteType::Up => up,
        VoteType::Down => down,
        VoteType::Neutral => return,
    };
    if !target.iter().any(|id| id == user_id) {
        target.push(user_id.to_string());
    }
}

/// Anything carrying `upVotesBy` / `downVotesBy` sets.
pub trait Votable {
    fn vote_sets(&mut self) -> (&mut Vec<String>, &mut Vec<String>);
    fn up_votes(&self) -> &[String];
    fn down_votes(&self) -> &[String];

    fn apply_vote(&mut self, user_id: &str, vote: VoteType) {
        let (up, down) = self.vote_sets();
        apply_vote(up, down, user_id, vote);
    }

    fn vote_state(&self, user_id: &str) -> VoteType {
        if self.up_votes().iter().any(|id| id == user_id) {
            VoteType::Up
        } else if self.down_votes().iter().any(|id| id == user_id) {
            VoteType::Down
        } else {
            VoteType::Neutral
        }
    }

    fn score(&self) -> i64 {
        self.up_votes().len() as i64 - self.down_votes().len() as i64
    }
}

macro_rules! impl_votable {
    ($($ty:ty),*) => {
        $(
            impl Votable for $ty {
                fn vote_sets(&mut self) -> (&mut Vec<String>, &mut Vec<String>) {
                    (&mut self.up_votes_by, &mut self.down_votes_by)
                }
                fn up_votes(&self) -> &[String] {
                    &self.up_votes_by
                }
                fn down_votes(&self) -> &[String] {
                    &self.down_votes_by
                }
            }
        )*
    };
}

impl_votable!(Thread, DetailThread, Comment);

// Request payloads

#[derive(Debug, Clone, Serialize)]
pub struct RegisterPayload {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginPayload {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewThread {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewComment {
    pub content: String,
}

/// `{status, message, data}` wrapper around every API response body.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}
