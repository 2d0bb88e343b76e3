use super::{ClusterContext, ContextError};
use tracing::{debug, info};

impl ClusterContext {
    /// Create this slot's namespace
    ///
    /// Fails with [`ContextError::Namespace`] when the namespace already
    /// exists: a leftover from an earlier run is never silently reused, and
    /// teardown leaves it alone.
    pub async fn create_namespace(&self) -> Result<(), ContextError> {
        self.client
            .create_namespace(&self.namespace)
            .await
            .map_err(|source| ContextError::Namespace {
                namespace: self.namespace.clone(),
                source,
            })?;
        self.mark_namespace_created(true);

        info!(slot = %self.slot(), namespace = %self.namespace, "Created test namespace");
        Ok(())
    }

    /// Delete this slot's namespace
    ///
    /// A namespace that is already gone counts as deleted.
    pub async fn delete_namespace(&self) -> Result<(), ContextError> {
        match self.client.delete_namespace(&self.namespace).await {
            Ok(()) => {
                self.mark_namespace_created(false);
                info!(slot = %self.slot(), namespace = %self.namespace, "Deleted test namespace");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.mark_namespace_created(false);
                debug!(namespace = %self.namespace, "Namespace already gone");
                Ok(())
            }
            Err(source) => Err(ContextError::Cleanup {
                namespace: self.namespace.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{ClusterContext, ContextError, Role};
    use crate::credentials::Credential;
    use crate::cluster::ClusterApi;
    use crate::testing::FakeCluster;
    use std::sync::Arc;

    fn context(cluster: &Arc<FakeCluster>) -> ClusterContext {
        ClusterContext::new(
            Role::Public,
            1,
            "ns",
            Credential::new("/k/config"),
            cluster.clone(),
        )
    }

    #[tokio::test]
    async fn test_create_namespace_refuses_existing() {
        let cluster = Arc::new(FakeCluster::new());
        let ctx = context(&cluster);

        ctx.create_namespace().await.unwrap();
        assert!(cluster.has_namespace("public-ns-1"));

        let err = ctx.create_namespace().await.unwrap_err();
        assert!(ctx.created_namespace(), "first create still owns it");
        match err {
            ContextError::Namespace { namespace, source } => {
                assert_eq!(namespace, "public-ns-1");
                assert!(source.is_already_exists());
            }
            other => panic!("expected Namespace error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_existing_namespace_is_not_owned() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.create_namespace("public-ns-1").await.unwrap();
        let ctx = context(&cluster);

        assert!(ctx.create_namespace().await.is_err());
        assert!(!ctx.created_namespace());

        // Clones share ownership, as topologies clone their contexts
        let other = context(&cluster);
        let clone = other.clone();
        other.delete_namespace().await.unwrap();
        clone.create_namespace().await.unwrap();
        assert!(other.created_namespace());
    }

    #[tokio::test]
    async fn test_delete_namespace_tolerates_missing() {
        let cluster = Arc::new(FakeCluster::new());
        let ctx = context(&cluster);

        ctx.delete_namespace().await.unwrap();

        ctx.create_namespace().await.unwrap();
        ctx.delete_namespace().await.unwrap();
        assert!(!cluster.has_namespace("public-ns-1"));
    }

    #[tokio::test]
    async fn test_delete_namespace_surfaces_other_errors() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail_namespace_deletes();
        let ctx = context(&cluster);

        let err = ctx.delete_namespace().await.unwrap_err();
        assert!(matches!(err, ContextError::Cleanup { .. }));
    }
}
