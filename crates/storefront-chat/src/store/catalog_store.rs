use crate::store::schema::*;
use crate::store::conversation_store::format_timestamp;
use crate::utils::KeywordExtractor;
use rusqlite::{params, Row, Connection, OptionalExtension};
use chrono::Utc;
use tracing::{info, debug};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Read side of the mirrored storefront catalog, plus the import that fills it
#[derive(Clone)]
pub struct CatalogStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
    keywords: KeywordExtractor,
}

const PRODUCT_COLUMNS: &str =
    "id, handle, title, description, product_type, vendor, status, price_min, price_max, tags";
const COLLECTION_COLUMNS: &str = "id, handle, title, description, products_count";
const PAGE_COLUMNS: &str = "id, handle, title, body";
const BLOG_POST_COLUMNS: &str = "id, handle, title, excerpt, body";

impl CatalogStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            pool,
            keywords: KeywordExtractor::default(),
        }
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    pub fn get_store(&self, store_id: &str) -> anyhow::Result<Option<Store>> {
        let conn = self.get_conn()?;
        let store = conn
            .query_row(
                "SELECT id, shop_domain, name FROM stores WHERE id = ?1",
                [store_id],
                |row| Ok(Store { id: row.get(0)?, shop_domain: row.get(1)?, name: row.get(2)? }),
            )
            .optional()?;
        Ok(store)
    }

    /// Replace a store's catalog with the pushed snapshot in one transaction.
    pub fn import_catalog(&self, store_id: &str, snapshot: &CatalogSnapshot) -> anyhow::Result<CatalogImportStats> {
        let mut conn = self.get_conn()?;
        let now = format_timestamp(&Utc::now());
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO stores (id, shop_domain, name, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET shop_domain = excluded.shop_domain,
                                           name = excluded.name,
                                           updated_at = excluded.updated_at",
            params![store_id, &snapshot.shop_domain, &snapshot.name, &now],
        )?;

        for table in ["products", "collections", "pages", "blog_posts"] {
            tx.execute(&format!("DELETE FROM {} WHERE store_id = ?1", table), [store_id])?;
        }

        for product in &snapshot.products {
            tx.execute(
                "INSERT INTO products
                 (store_id, id, handle, title, description, product_type, vendor, status,
                  price_min, price_max, tags, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    store_id,
                    &product.id,
                    &product.handle,
                    &product.title,
                    &product.description,
                    &product.product_type,
                    &product.vendor,
                    &product.status,
                    product.price_min,
                    product.price_max,
                    serde_json::to_string(&product.tags)?,
                    &now,
                ],
            )?;
        }

        for collection in &snapshot.collections {
            tx.execute(
                "INSERT INTO collections (store_id, id, handle, title, description, products_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    store_id,
                    &collection.id,
                    &collection.handle,
                    &collection.title,
                    &collection.description,
                    collection.products_count,
                    &now,
                ],
            )?;
        }

        for page in &snapshot.pages {
            tx.execute(
                "INSERT INTO pages (store_id, id, handle, title, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![store_id, &page.id, &page.handle, &page.title, &page.body, &now],
            )?;
        }

        for post in &snapshot.blog_posts {
            tx.execute(
                "INSERT INTO blog_posts (store_id, id, handle, title, excerpt, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![store_id, &post.id, &post.handle, &post.title, &post.excerpt, &post.body, &now],
            )?;
        }

        tx.commit()?;

        let stats = CatalogImportStats {
            products: snapshot.products.len(),
            collections: snapshot.collections.len(),
            pages: snapshot.pages.len(),
            blog_posts: snapshot.blog_posts.len(),
        };
        info!(
            "Imported catalog for store {}: {} products, {} collections, {} pages, {} posts",
            store_id, stats.products, stats.collections, stats.pages, stats.blog_posts
        );
        Ok(stats)
    }

    /// Keyword filter over the catalog. Products fall back to the most recently
    /// imported active items when nothing matches so the model always sees some range.
    pub fn search_store_data(&self, store_id: &str, query_text: &str, limit: usize) -> anyhow::Result<StoreContext> {
        let keywords = self.keywords.extract(query_text);
        let conn = self.get_conn()?;
        debug!("Catalog search for store {} with keywords {:?}", store_id, keywords);

        let mut products = Self::query_matching(
            &conn,
            "products",
            PRODUCT_COLUMNS,
            &["title", "description", "product_type", "tags"],
            "status = 'active'",
            store_id,
            &keywords,
            limit,
            Self::row_to_product,
        )?;
        if products.is_empty() {
            products = Self::query_matching(
                &conn, "products", PRODUCT_COLUMNS, &[], "status = 'active'",
                store_id, &[], limit, Self::row_to_product,
            )?;
        }

        let collections = Self::query_matching(
            &conn, "collections", COLLECTION_COLUMNS, &["title", "description"], "1 = 1",
            store_id, &keywords, limit, Self::row_to_collection,
        )?;
        let pages = if keywords.is_empty() {
            Vec::new()
        } else {
            Self::query_matching(
                &conn, "pages", PAGE_COLUMNS, &["title", "body"], "1 = 1",
                store_id, &keywords, limit, Self::row_to_page,
            )?
        };
        let blog_posts = if keywords.is_empty() {
            Vec::new()
        } else {
            Self::query_matching(
                &conn, "blog_posts", BLOG_POST_COLUMNS, &["title", "excerpt", "body"], "1 = 1",
                store_id, &keywords, limit, Self::row_to_blog_post,
            )?
        };

        Ok(StoreContext { products, collections, pages, blog_posts })
    }

    pub fn get_pages(&self, store_id: &str, limit: usize) -> anyhow::Result<Vec<Page>> {
        let conn = self.get_conn()?;
        Self::query_matching(&conn, "pages", PAGE_COLUMNS, &[], "1 = 1", store_id, &[], limit, Self::row_to_page)
    }

    pub fn get_blog_posts(&self, store_id: &str, limit: usize) -> anyhow::Result<Vec<BlogPost>> {
        let conn = self.get_conn()?;
        Self::query_matching(
            &conn, "blog_posts", BLOG_POST_COLUMNS, &[], "1 = 1", store_id, &[], limit, Self::row_to_blog_post,
        )
    }

    /// `SELECT .. WHERE store_id = ? AND <filter> [AND (any keyword LIKE any column)]`.
    /// With no keywords every row passes the keyword clause.
    #[allow(clippy::too_many_arguments)]
    fn query_matching<T>(
        conn: &Connection,
        table: &str,
        columns: &str,
        search_columns: &[&str],
        filter: &str,
        store_id: &str,
        keywords: &[String],
        limit: usize,
        map_row: fn(&Row) -> anyhow::Result<T>,
    ) -> anyhow::Result<Vec<T>> {
        let mut query = format!(
            "SELECT {} FROM {} WHERE store_id = ? AND {}",
            columns, table, filter
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(store_id.to_string())];

        if !keywords.is_empty() && !search_columns.is_empty() {
            let mut clauses = Vec::new();
            for keyword in keywords {
                for column in search_columns {
                    clauses.push(format!("LOWER(COALESCE({}, '')) LIKE ?", column));
                    params.push(Box::new(format!("%{}%", keyword.to_lowercase())));
                }
            }
            query.push_str(&format!(" AND ({})", clauses.join(" OR ")));
        }

        query.push_str(" ORDER BY updated_at DESC, title LIMIT ?");
        params.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&query)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(param_refs))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            results.push(map_row(row)?);
        }
        Ok(results)
    }

    fn row_to_product(row: &Row) -> anyhow::Result<Product> {
        let tags: String = row.get(9)?;
        Ok(Product {
            id: row.get(0)?,
            handle: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            product_type: row.get(4)?,
            vendor: row.get(5)?,
            status: row.get(6)?,
            price_min: row.get(7)?,
            price_max: row.get(8)?,
            tags: serde_json::from_str(&tags).unwrap_or_default(),
        })
    }

    fn row_to_collection(row: &Row) -> anyhow::Result<Collection> {
        Ok(Collection {
            id: row.get(0)?,
            handle: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            products_count: row.get(4)?,
        })
    }

    fn row_to_page(row: &Row) -> anyhow::Result<Page> {
        Ok(Page { id: row.get(0)?, handle: row.get(1)?, title: row.get(2)?, body: row.get(3)? })
    }

    fn row_to_blog_post(row: &Row) -> anyhow::Result<BlogPost> {
        Ok(BlogPost {
            id: row.get(0)?,
            handle: row.get(1)?,
            title: row.get(2)?,
            excerpt: row.get(3)?,
            body: row.get(4)?,
        })
    }
}
