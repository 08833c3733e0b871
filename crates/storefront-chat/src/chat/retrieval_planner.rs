use crate::gateway::Intent;
use crate::store::{ContextStore, StoreContext};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// How much of each catalog section to fetch for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextPlan {
    /// Limit for the keyword search over products and collections
    pub search_limit: usize,
    /// Pages fetched regardless of keywords; 0 means only keyword matches
    pub pages_limit: usize,
    /// Blog posts fetched regardless of keywords
    pub blog_posts_limit: usize,
}

impl ContextPlan {
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::ProductSearch => Self { search_limit: 20, pages_limit: 0, blog_posts_limit: 0 },
            Intent::PolicyQuestion => Self { search_limit: 5, pages_limit: 20, blog_posts_limit: 10 },
            Intent::Complaint => Self { search_limit: 5, pages_limit: 10, blog_posts_limit: 0 },
            Intent::GeneralInquiry | Intent::Other => {
                Self { search_limit: 10, pages_limit: 10, blog_posts_limit: 5 }
            }
        }
    }
}

/// Resolves the store context snapshot for a turn
pub struct RetrievalPlanner {
    store: Arc<dyn ContextStore>,
    store_names: DashMap<String, String>,
}

impl RetrievalPlanner {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            store_names: DashMap::new(),
        }
    }

    pub async fn resolve_context(
        &self,
        store_id: &str,
        intent: Intent,
        query_text: &str,
    ) -> anyhow::Result<StoreContext> {
        let plan = ContextPlan::for_intent(intent);
        debug!("Context plan for {} in store {}: {:?}", intent, store_id, plan);

        let mut context = self.store.search_store_data(store_id, query_text, plan.search_limit).await?;

        if plan.pages_limit > 0 {
            let pages = self.store.get_pages(store_id, plan.pages_limit).await?;
            for page in pages {
                if !context.pages.iter().any(|p| p.id == page.id) {
                    context.pages.push(page);
                }
            }
        }
        if plan.blog_posts_limit > 0 {
            let posts = self.store.get_blog_posts(store_id, plan.blog_posts_limit).await?;
            for post in posts {
                if !context.blog_posts.iter().any(|p| p.id == post.id) {
                    context.blog_posts.push(post);
                }
            }
        }

        Ok(context)
    }

    /// Display name for prompts. Falls back to a generic name if the store
    /// row is missing or unreadable; never fails the turn.
    pub async fn store_name(&self, store_id: &str) -> String {
        if let Some(name) = self.store_names.get(store_id) {
            return name.clone();
        }
        match self.store.get_store(store_id).await {
            Ok(Some(store)) => {
                self.store_names.insert(store_id.to_string(), store.name.clone());
                store.name
            }
            Ok(None) => "our store".to_string(),
            Err(e) => {
                warn!("Failed to load store {}: {}", store_id, e);
                "our store".to_string()
            }
        }
    }

    /// Forget a cached display name after a catalog import renames the store.
    pub fn invalidate_store(&self, store_id: &str) {
        self.store_names.remove(store_id);
    }
}
