use std::fmt::{self, Display};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct RepoKey {
    pub owner: String,
    pub name: String,
}

impl Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl RepoKey {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
        }
    }
}
