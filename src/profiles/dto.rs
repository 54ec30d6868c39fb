use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::repo::AccountKind;
use crate::profiles::repo::Profile;

/// Profile fields as submitted by the client. Every field is independently
/// present-or-absent; PATCH applies only the fields that were sent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub full_name: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub experience_level: Option<String>,
    pub skills: Option<Vec<String>>,
    pub bio: Option<String>,
    pub timezone: Option<String>,
    pub country: Option<String>,
    pub avatar_url: Option<String>,
    pub portfolio_links: Option<HashMap<String, String>>,
}

impl ProfileInput {
    pub fn has_updates(&self) -> bool {
        self.full_name.is_some()
            || self.display_name.is_some()
            || self.title.is_some()
            || self.category.is_some()
            || self.experience_level.is_some()
            || self.skills.is_some()
            || self.bio.is_some()
            || self.timezone.is_some()
            || self.country.is_some()
            || self.avatar_url.is_some()
            || self.portfolio_links.is_some()
    }
}

/// Limited, non-sensitive owner fields joined onto a public profile read.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProfileOwner {
    pub email: String,
    #[serde(rename = "userType")]
    pub account_kind: AccountKind,
    #[serde(rename = "createdAt")]
    pub created_at: OffsetDateTime,
}

/// Response for GET /api/profile/:id.
#[derive(Debug, Serialize)]
pub struct ProfileDetails {
    #[serde(flatten)]
    pub profile: Profile,
    pub user: ProfileOwner,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_updates() {
        let input = ProfileInput::default();
        assert!(!input.has_updates());
    }

    #[test]
    fn any_single_field_counts_as_update() {
        let input = ProfileInput {
            bio: Some("rust freelancer".into()),
            ..Default::default()
        };
        assert!(input.has_updates());
    }

    #[test]
    fn input_deserializes_camel_case_fields() {
        let input: ProfileInput = serde_json::from_str(
            r#"{
                "fullName": "Ada L",
                "experienceLevel": "senior",
                "avatarUrl": "https://img.example/a.png",
                "skills": ["rust", "sql"],
                "portfolioLinks": {"github": "https://github.com/ada"}
            }"#,
        )
        .unwrap();
        assert_eq!(input.full_name.as_deref(), Some("Ada L"));
        assert_eq!(input.experience_level.as_deref(), Some("senior"));
        assert_eq!(input.skills.as_deref(), Some(["rust".to_string(), "sql".to_string()].as_slice()));
        assert_eq!(
            input.portfolio_links.as_ref().and_then(|m| m.get("github")).map(String::as_str),
            Some("https://github.com/ada")
        );
        assert!(input.title.is_none());
    }
}
