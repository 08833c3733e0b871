//! System prompt construction from a store context snapshot

use crate::store::{Product, StoreContext};
use crate::utils::TextUtils;
use std::fmt::Write;

/// Caps on how much of the snapshot goes into one prompt
#[derive(Debug, Clone)]
pub struct PromptLimits {
    pub max_products: usize,
    pub max_collections: usize,
    pub max_blog_posts: usize,
    pub product_description_chars: usize,
    pub collection_description_chars: usize,
    pub page_body_chars: usize,
    pub blog_post_chars: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_products: 20,
            max_collections: 10,
            max_blog_posts: 10,
            product_description_chars: 200,
            collection_description_chars: 150,
            page_body_chars: 200,
            blog_post_chars: 150,
        }
    }
}

pub struct PromptBuilder {
    limits: PromptLimits,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(PromptLimits::default())
    }
}

impl PromptBuilder {
    pub fn new(limits: PromptLimits) -> Self {
        Self { limits }
    }

    pub fn build_system_prompt(&self, store_name: &str, context: &StoreContext) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "You are a helpful shopping assistant for {store}. Only answer questions about {store}: \
             its products, collections, policies and content. If a question is about anything else, \
             politely steer the customer back to this store.",
            store = store_name
        );
        prompt.push_str(
            "When you recommend a product, always include its handle in the form [handle: <handle>] \
             so the storefront can link to it. Never invent products, prices or policies that are \
             not listed below; say you are not sure instead.\n",
        );

        if !context.products.is_empty() {
            prompt.push_str("\nPRODUCTS:\n");
            for product in context.products.iter().take(self.limits.max_products) {
                self.write_product(&mut prompt, product);
            }
        }

        if !context.collections.is_empty() {
            prompt.push_str("\nCOLLECTIONS:\n");
            for collection in context.collections.iter().take(self.limits.max_collections) {
                let _ = writeln!(
                    prompt,
                    "- {} (handle: {}, {} products): {}",
                    collection.title,
                    collection.handle,
                    collection.products_count,
                    TextUtils::summarize(&collection.description, self.limits.collection_description_chars),
                );
            }
        }

        if !context.pages.is_empty() {
            prompt.push_str("\nPAGES:\n");
            for page in &context.pages {
                let _ = writeln!(
                    prompt,
                    "- {} (handle: {}): {}",
                    page.title,
                    page.handle,
                    TextUtils::summarize(&page.body, self.limits.page_body_chars),
                );
            }
        }

        if !context.blog_posts.is_empty() {
            prompt.push_str("\nBLOG POSTS:\n");
            for post in context.blog_posts.iter().take(self.limits.max_blog_posts) {
                let text = post
                    .excerpt
                    .as_deref()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or(&post.body);
                let _ = writeln!(
                    prompt,
                    "- {} (handle: {}): {}",
                    post.title,
                    post.handle,
                    TextUtils::summarize(text, self.limits.blog_post_chars),
                );
            }
        }

        if context.is_empty() {
            prompt.push_str(
                "\nNo catalog data matched this question. Offer to help the customer browse the store.\n",
            );
        }

        prompt
    }

    fn write_product(&self, prompt: &mut String, product: &Product) {
        let _ = write!(prompt, "- {} (handle: {})", product.title, product.handle);
        match (product.price_min, product.price_max) {
            (Some(min), Some(max)) if (max - min).abs() > f64::EPSILON => {
                let _ = write!(prompt, ", price: {:.2}-{:.2}", min, max);
            }
            (Some(price), _) | (None, Some(price)) => {
                let _ = write!(prompt, ", price: {:.2}", price);
            }
            (None, None) => {}
        }
        if let Some(product_type) = product.product_type.as_deref().filter(|t| !t.is_empty()) {
            let _ = write!(prompt, ", type: {}", product_type);
        }
        if let Some(vendor) = product.vendor.as_deref().filter(|v| !v.is_empty()) {
            let _ = write!(prompt, ", vendor: {}", vendor);
        }
        let _ = writeln!(
            prompt,
            ", status: {}: {}",
            product.status,
            TextUtils::summarize(&product.description, self.limits.product_description_chars),
        );
    }
}
