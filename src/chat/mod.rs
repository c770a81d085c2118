pub mod adjustment;
pub mod estimation;
pub mod feedback;
pub mod monitor;
pub mod retrieval;
pub mod router;

use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// One conversational turn as received from the UI collaborator. The
/// context summaries are optional; missing ones are derived from the
/// database.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user_id: Uuid,
    pub message: String,
    pub history: Vec<ChatMessage>,
    pub inventory_summary: Option<String>,
    pub meal_plan_summary: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    MealAdjustment,
    MealRetrieval,
    CalorieEstimation,
    GeneralChat,
}

impl ChatAction {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "meal_adjustment" => Some(Self::MealAdjustment),
            "meal_retrieval" => Some(Self::MealRetrieval),
            "calorie_estimation" => Some(Self::CalorieEstimation),
            "general_chat" => Some(Self::GeneralChat),
            _ => None,
        }
    }
}

/// One typed step of a planned turn, produced by the planner call.
#[derive(Debug, Clone)]
pub struct ChatStep {
    pub action: ChatAction,
    pub date: Option<Date>,
    pub meal_type: Option<String>,
    pub instruction: String,
}

impl ChatStep {
    pub fn general(instruction: impl Into<String>) -> Self {
        Self {
            action: ChatAction::GeneralChat,
            date: None,
            meal_type: None,
            instruction: instruction.into(),
        }
    }
}

/// Streamed turn output: progress strings first, then the reply.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Status(String),
    Content(String),
}
