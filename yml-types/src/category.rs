use async_trait::async_trait;
use typesafe_repository::async_ops::Select;
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{IdentityOf, SelectBy, Selector};

/// Alias of the synthetic nested-set root.
pub const ROOT_ALIAS: &str = "root";

#[derive(Id, Clone, Debug, PartialEq, Eq)]
#[Id(ref_id, get_id)]
pub struct CategoryNode {
    #[id]
    pub id: i64,
    pub title: String,
    pub parent_id: Option<IdentityOf<CategoryNode>>,
}

impl CategoryNode {
    /// Parent id to write into the feed, `None` for top-level categories.
    pub fn feed_parent(&self, root_id: IdentityOf<CategoryNode>) -> Option<IdentityOf<CategoryNode>> {
        self.parent_id.filter(|p| *p > 0 && *p != root_id)
    }
}

/// Categories with the given ids, never including the root.
pub struct ByIds(pub Vec<IdentityOf<CategoryNode>>);

impl Selector for ByIds {}
impl SelectBy<ByIds> for CategoryNode {}

#[async_trait]
pub trait CategoryRepository:
    Repository<CategoryNode, Error = anyhow::Error> + Select<CategoryNode, ByIds> + Send + Sync
{
    /// Ids of every category whose nested-set interval contains the given one,
    /// the category itself included.
    async fn ancestor_ids(
        &self,
        id: IdentityOf<CategoryNode>,
    ) -> Result<Vec<IdentityOf<CategoryNode>>, Self::Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn root_and_missing_parents_are_not_written() {
        let node = |parent_id| CategoryNode {
            id: 10,
            title: "Rings".to_string(),
            parent_id,
        };
        assert_eq!(node(Some(1)).feed_parent(1), None);
        assert_eq!(node(Some(0)).feed_parent(1), None);
        assert_eq!(node(None).feed_parent(1), None);
        assert_eq!(node(Some(4)).feed_parent(1), Some(4));
    }
}
