//! 用户档案库：JSON 文件（user_id -> 档案对象），以及读取档案、更新联系偏好两个工具
//!
//! 由 river-profile-server 通过 stdio 暴露给对话进程；REPL 也直接读取它来生成人设提示词。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::tools::schema::{args_schema, parse_args};
use crate::tools::Tool;

pub const DEFAULT_USER_ID: &str = "user_123";

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile database not found.")]
    DatabaseNotFound,

    #[error("User {0} not found.")]
    UserNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("profile database must be a JSON object keyed by user id")]
    InvalidLayout,
}

/// 档案中对话需要的字段；其余字段原样保留
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub outstanding_debt: f64,
    #[serde(default)]
    pub risk_score: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_communication: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_currency() -> String {
    "INR".to_string()
}

impl UserProfile {
    pub fn risk_score_display(&self) -> String {
        match &self.risk_score {
            Value::String(s) => s.clone(),
            Value::Null => "unknown".to_string(),
            other => other.to_string(),
        }
    }
}

/// 档案文件访问；写操作串行，写入走临时文件后 rename
#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProfileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load_all(&self) -> Result<Map<String, Value>, ProfileError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Err(ProfileError::DatabaseNotFound);
        }
        let data = tokio::fs::read_to_string(&self.path).await?;
        match serde_json::from_str::<Value>(&data)? {
            Value::Object(map) => Ok(map),
            _ => Err(ProfileError::InvalidLayout),
        }
    }

    /// 原始档案对象
    pub async fn get_raw(&self, user_id: &str) -> Result<Value, ProfileError> {
        self.load_all()
            .await?
            .remove(user_id)
            .ok_or_else(|| ProfileError::UserNotFound(user_id.to_string()))
    }

    pub async fn get(&self, user_id: &str) -> Result<UserProfile, ProfileError> {
        Ok(serde_json::from_value(self.get_raw(user_id).await?)?)
    }

    /// 全部用户（按 id 排序），跳过无法解析的条目
    pub async fn list(&self) -> Result<Vec<(String, UserProfile)>, ProfileError> {
        let mut users: Vec<(String, UserProfile)> = self
            .load_all()
            .await?
            .into_iter()
            .filter_map(|(id, v)| match serde_json::from_value::<UserProfile>(v) {
                Ok(p) => Some((id, p)),
                Err(e) => {
                    tracing::warn!(user_id = %id, error = %e, "skipping malformed profile");
                    None
                }
            })
            .collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(users)
    }

    pub async fn set_preference(&self, user_id: &str, preference: &str) -> Result<(), ProfileError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load_all().await?;
        let entry = all
            .get_mut(user_id)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| ProfileError::UserNotFound(user_id.to_string()))?;
        entry.insert(
            "preferred_communication".to_string(),
            Value::String(preference.to_string()),
        );
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&Value::Object(all))?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::info!(user_id, preference, "communication preference updated");
        Ok(())
    }
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetProfileArgs {
    /// The user id to look up. Defaults to the current logged-in user.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdatePreferenceArgs {
    /// How the user wants to be contacted (e.g., 'WhatsApp', 'Email', 'Phone').
    pub preference: String,
    /// The user id to update. Defaults to the current logged-in user.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn profile_error_text(err: &ProfileError, action: &str) -> String {
    match err {
        ProfileError::DatabaseNotFound | ProfileError::UserNotFound(_) => format!("Error: {err}"),
        other => format!("Error {action} profile: {other}"),
    }
}

/// 读取完整档案（含欠款与风险分）
pub struct GetUserProfileTool {
    store: Arc<ProfileStore>,
}

impl GetUserProfileTool {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetUserProfileTool {
    fn name(&self) -> &str {
        "get_user_profile"
    }

    fn description(&self) -> &str {
        "Reads the full user profile including debt details and risk score. \
         Use this to understand the user's background before negotiating. \
         If no user_id is provided, it defaults to the current logged-in user."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<GetProfileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let a: GetProfileArgs = parse_args(args)?;
        let profile = self
            .store
            .get_raw(&a.user_id)
            .await
            .map_err(|e| profile_error_text(&e, "reading"))?;
        serde_json::to_string_pretty(&profile).map_err(|e| format!("Error reading profile: {e}"))
    }
}

/// 更新联系偏好
pub struct UpdatePreferenceTool {
    store: Arc<ProfileStore>,
}

impl UpdatePreferenceTool {
    pub fn new(store: Arc<ProfileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for UpdatePreferenceTool {
    fn name(&self) -> &str {
        "update_communication_preference"
    }

    fn description(&self) -> &str {
        "Updates how the user wants to be contacted (e.g., 'WhatsApp', 'Email', 'Phone')."
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<UpdatePreferenceArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let a: UpdatePreferenceArgs = parse_args(args)?;
        self.store
            .set_preference(&a.user_id, &a.preference)
            .await
            .map_err(|e| profile_error_text(&e, "updating"))?;
        Ok(format!(
            "Success: Updated preference to {} for {}.",
            a.preference, a.user_id
        ))
    }
}
