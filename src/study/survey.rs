//! Survey links and completion codes.

use serde::Serialize;

use super::group::UserGroup;
use super::progress::SurveyKind;
use crate::config::env_or;

/// Links for one study group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyLinks {
    pub pre: String,
    pub post: String,
}

impl SurveyLinks {
    pub fn url(&self, kind: SurveyKind) -> &str {
        match kind {
            SurveyKind::Pre => &self.pre,
            SurveyKind::Post => &self.post,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SurveyConfig {
    pub group_a: SurveyLinks,
    pub group_b: SurveyLinks,
    /// Stored uppercase.
    pub pre_code: String,
    pub post_code: String,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self::new(
            SurveyLinks {
                pre: "https://forms.gle/graph-gullible-a-pre".to_string(),
                post: "https://forms.gle/graph-gullible-a-post".to_string(),
            },
            SurveyLinks {
                pre: "https://forms.gle/graph-gullible-b-pre".to_string(),
                post: "https://forms.gle/graph-gullible-b-post".to_string(),
            },
            "PRE-DONE",
            "POST-DONE",
        )
    }
}

impl SurveyConfig {
    pub fn new(
        group_a: SurveyLinks,
        group_b: SurveyLinks,
        pre_code: &str,
        post_code: &str,
    ) -> Self {
        Self {
            group_a,
            group_b,
            pre_code: normalize_code(pre_code),
            post_code: normalize_code(post_code),
        }
    }

    /// Read links and codes from `GRAPH_GULLIBLE_*`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let links = |group: &str, fallback: &SurveyLinks| SurveyLinks {
            pre: env_or(&format!("GRAPH_GULLIBLE_SURVEY_{group}_PRE_URL"), &fallback.pre),
            post: env_or(&format!("GRAPH_GULLIBLE_SURVEY_{group}_POST_URL"), &fallback.post),
        };
        Self::new(
            links("A", &defaults.group_a),
            links("B", &defaults.group_b),
            &env_or("GRAPH_GULLIBLE_PRE_CODE", &defaults.pre_code),
            &env_or("GRAPH_GULLIBLE_POST_CODE", &defaults.post_code),
        )
    }

    pub fn links(&self, group: UserGroup) -> &SurveyLinks {
        match group {
            UserGroup::A => &self.group_a,
            UserGroup::B => &self.group_b,
        }
    }

    pub fn url(&self, group: UserGroup, kind: SurveyKind) -> &str {
        self.links(group).url(kind)
    }

    /// Case-insensitive, whitespace-tolerant code check.
    pub fn verify(&self, kind: SurveyKind, input: &str) -> bool {
        let expected = match kind {
            SurveyKind::Pre => &self.pre_code,
            SurveyKind::Post => &self.post_code,
        };
        !expected.is_empty() && normalize_code(input) == *expected
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SurveyConfig {
        SurveyConfig::new(
            SurveyLinks {
                pre: "https://a/pre".to_string(),
                post: "https://a/post".to_string(),
            },
            SurveyLinks {
                pre: "https://b/pre".to_string(),
                post: "https://b/post".to_string(),
            },
            "chart-start",
            "CHART-END",
        )
    }

    #[test]
    fn url_depends_on_group() {
        let config = config();
        assert_eq!(config.url(UserGroup::A, SurveyKind::Pre), "https://a/pre");
        assert_eq!(config.url(UserGroup::B, SurveyKind::Post), "https://b/post");
    }

    #[test]
    fn verify_trims_and_uppercases() {
        let config = config();
        assert!(config.verify(SurveyKind::Pre, "  Chart-Start \n"));
        assert!(config.verify(SurveyKind::Post, "chart-end"));
        assert!(!config.verify(SurveyKind::Pre, "chart-end"));
        assert!(!config.verify(SurveyKind::Post, ""));
    }
}
