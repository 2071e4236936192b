use serde::{Deserialize, Serialize};

/// Identity information for an authenticated principal, as returned by the
/// identity backend's login and profile endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: i64,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}
