//! GraphQL document used to page through a repository's issues.
//!
//! Issues are ordered by `UPDATED_AT` ascending so that the last issue of a
//! page is always the most recently updated one seen so far, which is what
//! the sync cursor records. Test queries in the GraphQL explorer:
//! https://docs.github.com/en/graphql/overview/explorer

pub(crate) const ISSUES_WITH_COMMENTS_LABELS_QUERY: &str = r#"
query paginate(
  $cursor: String
  $owner: String!
  $repo: String!
  $since: DateTime
  $first: Int!
) {
  repository(owner: $owner, name: $repo) {
    issues(
      first: $first
      after: $cursor
      orderBy: { field: UPDATED_AT, direction: ASC }
      filterBy: { since: $since }
    ) {
      nodes {
        id
        number
        title
        body
        url
        state
        stateReason
        createdAt
        updatedAt
        closedAt
        author {
          login
          url
        }
        labels(first: 10) {
          nodes {
            id
            name
            color
            description
          }
        }
        comments(first: 100, orderBy: { field: UPDATED_AT, direction: ASC }) {
          totalCount
          nodes {
            id
            author {
              login
              url
            }
            body
            createdAt
            updatedAt
          }
        }
      }
      pageInfo {
        hasNextPage
        endCursor
      }
    }
  }
}
"#;
