use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub owner_id: i64,
    pub message: String,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message: String,
}
