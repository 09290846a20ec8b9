//! GraphQL documents sent to the upstream API.

const RATE_LIMIT_FIELDS: &str = "rateLimit { cost limit remaining resetAt used }";

fn release_fragment(with_details: bool) -> String {
    format!(
        r#"fragment ReleaseFields on Release {{
  id
  isDraft
  isPrerelease
  name
  tagName
  publishedAt
  updatedAt
  url
  {}
}}"#,
        if with_details { "descriptionHTML" } else { "" }
    )
}

const REPOSITORY_HEADER: &str = r#"id
    name
    url
    description
    primaryLanguage { id name }
    owner { login avatarUrl url }
    stargazerCount
    languages(first: 5, orderBy: {field: SIZE, direction: DESC}) {
      totalCount
      edges { node { id name } }
    }
    licenseInfo { spdxId }"#;

/// Starred repositories, newest star first, each with its `releases` most
/// recent releases.
pub fn starred_releases(with_details: bool, releases: u32) -> String {
    format!(
        r#"{fragment}
query($cursor: String, $pageSize: Int!) {{
  viewer {{
    starredRepositories(first: $pageSize, after: $cursor, orderBy: {{field: STARRED_AT, direction: DESC}}) {{
      pageInfo {{ endCursor hasNextPage }}
      edges {{ node {{
    {header}
    releases(first: {releases}, orderBy: {{field: CREATED_AT, direction: DESC}}) {{
      totalCount
      pageInfo {{ hasNextPage endCursor }}
      edges {{ node {{ ...ReleaseFields }} }}
    }}
      }} }}
    }}
  }}
  {rate_limit}
}}"#,
        fragment = release_fragment(with_details),
        header = REPOSITORY_HEADER,
        releases = releases,
        rate_limit = RATE_LIMIT_FIELDS,
    )
}

/// Starred repositories with identifying fields only.
pub fn starred_repos() -> String {
    format!(
        r#"query($cursor: String, $pageSize: Int!) {{
  viewer {{
    starredRepositories(first: $pageSize, after: $cursor, orderBy: {{field: STARRED_AT, direction: DESC}}) {{
      totalCount
      pageInfo {{ endCursor hasNextPage }}
      edges {{
        node {{
          id
          name
          url
          stargazerCount
          primaryLanguage {{ id name }}
          languages(first: 5, orderBy: {{field: SIZE, direction: DESC}}) {{ edges {{ node {{ id name }} }} }}
          licenseInfo {{ spdxId }}
          owner {{ login avatarUrl }}
        }}
      }}
    }}
  }}
  {rate_limit}
}}"#,
        rate_limit = RATE_LIMIT_FIELDS,
    )
}

/// A page of one repository's releases, looked up by node id.
pub fn repo_releases(with_details: bool) -> String {
    format!(
        r#"{fragment}
query($repoId: ID!, $first: Int!, $cursor: String) {{
  node(id: $repoId) {{
    ... on Repository {{
    {header}
    releases(first: $first, after: $cursor, orderBy: {{field: CREATED_AT, direction: DESC}}) {{
      totalCount
      pageInfo {{ hasNextPage endCursor }}
      edges {{ node {{ ...ReleaseFields }} }}
    }}
    }}
  }}
  {rate_limit}
}}"#,
        fragment = release_fragment(with_details),
        header = REPOSITORY_HEADER,
        rate_limit = RATE_LIMIT_FIELDS,
    )
}

/// Release bodies by release node id.
pub fn release_descriptions() -> String {
    format!(
        r#"query($ids: [ID!]!) {{
  nodes(ids: $ids) {{
    ... on Release {{ id descriptionHTML }}
  }}
  {rate_limit}
}}"#,
        rate_limit = RATE_LIMIT_FIELDS,
    )
}
