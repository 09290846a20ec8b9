use serde::{Deserialize, Serialize};

/// Repository owner as shown next to a release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Language {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct License {
    #[serde(default)]
    pub spdx_id: Option<String>,
}

/// Repository details denormalized into every release of that repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RepoRef {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: Owner,
    #[serde(default)]
    pub stargazer_count: u32,
    #[serde(default)]
    pub primary_language: Option<Language>,
    /// Top languages ordered by size, at most five.
    #[serde(default)]
    pub languages: Vec<Language>,
    #[serde(default)]
    pub license_info: Option<License>,
}

impl RepoRef {
    /// `owner/name`, the repository identity used for grouping and sorting.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner.login, self.name)
    }
}

/// A starred repository without its releases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StarredRepo {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub url: String,
    #[serde(default)]
    pub stargazer_count: u32,
    #[serde(default)]
    pub primary_language: Option<Language>,
    #[serde(default)]
    pub languages: Vec<Language>,
    #[serde(default)]
    pub license_info: Option<License>,
    #[serde(default)]
    pub avatar_url: String,
}

impl StarredRepo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Expands the starred repo into the reference embedded in its releases.
    ///
    /// The owner URL is the repository URL without its last path segment.
    pub fn to_repo_ref(&self) -> RepoRef {
        let owner_url = self
            .url
            .trim_end_matches('/')
            .rsplit_once('/')
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| format!("https://github.com/{}", self.owner));

        RepoRef {
            id: self.id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            description: None,
            owner: Owner {
                login: self.owner.clone(),
                avatar_url: self.avatar_url.clone(),
                url: owner_url,
            },
            stargazer_count: self.stargazer_count,
            primary_language: self.primary_language.clone(),
            languages: self.languages.clone(),
            license_info: self.license_info.clone(),
        }
    }
}
