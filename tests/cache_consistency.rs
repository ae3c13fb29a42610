//! Read-your-writes through the application services: a committed write is
//! visible on the next read, a failed write leaves the cache untouched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use storefront::application::content::ContentService;
use storefront::application::error::AppError;
use storefront::application::pagination::{PageRequest, Paged};
use storefront::application::repos::{ContentRepo, RepoError};
use storefront::cache::{
    CacheAside, CacheKey, CacheStore, Invalidator, MemoryStore, Mutation, Segment, TtlPolicy,
};
use storefront::domain::entities::{CommentRecord, NewComment, PostDetail, PostRecord};
use time::OffsetDateTime;
use time::macros::datetime;
use uuid::Uuid;

const SLUG: &str = "spring-sale";

#[derive(Default)]
struct InMemoryContent {
    posts: Mutex<BTreeMap<String, PostDetail>>,
    detail_reads: AtomicUsize,
    listing_reads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryContent {
    fn with_post(slug: &str) -> Self {
        let repo = Self::default();
        let post = PostRecord {
            id: Uuid::new_v4(),
            slug: slug.to_string(),
            title: "Spring sale".to_string(),
            excerpt: "Everything must go".to_string(),
            author_name: "Editor".to_string(),
            comment_count: 0,
            published_at: datetime!(2024-03-01 9:00 UTC),
        };
        repo.posts.lock().expect("posts lock").insert(
            slug.to_string(),
            PostDetail {
                post,
                body: "Discounts all week.".to_string(),
                comments: Vec::new(),
            },
        );
        repo
    }
}

#[async_trait]
impl ContentRepo for InMemoryContent {
    async fn list_posts(&self, page: PageRequest) -> Result<Paged<PostRecord>, RepoError> {
        self.listing_reads.fetch_add(1, Ordering::SeqCst);
        let posts = self.posts.lock().expect("posts lock");
        let items: Vec<PostRecord> = posts.values().map(|detail| detail.post.clone()).collect();
        let total = items.len() as u64;
        Ok(Paged::new(items, page, total))
    }

    async fn find_post(&self, slug: &str) -> Result<Option<PostDetail>, RepoError> {
        self.detail_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.posts.lock().expect("posts lock").get(slug).cloned())
    }

    async fn insert_comment(
        &self,
        slug: &str,
        comment: &NewComment,
    ) -> Result<CommentRecord, RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("connection reset"));
        }
        let mut posts = self.posts.lock().expect("posts lock");
        let detail = posts.get_mut(slug).ok_or(RepoError::NotFound)?;
        let record = CommentRecord {
            id: Uuid::new_v4(),
            post_id: detail.post.id,
            author_name: comment.author_name.clone(),
            body: comment.body.clone(),
            created_at: OffsetDateTime::now_utc(),
        };
        detail.comments.push(record.clone());
        detail.post.comment_count += 1;
        Ok(record)
    }

    async fn save_post(&self, post: &PostRecord, body: &str) -> Result<PostRecord, RepoError> {
        let mut posts = self.posts.lock().expect("posts lock");
        let comments = posts
            .get(&post.slug)
            .map(|detail| detail.comments.clone())
            .unwrap_or_default();
        posts.insert(
            post.slug.clone(),
            PostDetail {
                post: post.clone(),
                body: body.to_string(),
                comments,
            },
        );
        Ok(post.clone())
    }
}

fn fixture() -> (Arc<InMemoryContent>, Arc<MemoryStore>, ContentService) {
    let repo = Arc::new(InMemoryContent::with_post(SLUG));
    let store = Arc::new(MemoryStore::new());
    let service = ContentService::new(
        repo.clone(),
        CacheAside::new(store.clone(), Arc::new(TtlPolicy::default())),
        Invalidator::new(store.clone()),
    );
    (repo, store, service)
}

fn comment(body: &str) -> NewComment {
    NewComment {
        author_name: "Shopper".to_string(),
        body: body.to_string(),
    }
}

#[tokio::test]
async fn comment_is_visible_on_next_read() {
    let (repo, _store, service) = fixture();

    let before = service.post(SLUG).await.expect("post");
    assert!(before.comments.is_empty());
    let listing = service.posts(PageRequest::default()).await.expect("posts");
    assert_eq!(listing.items[0].comment_count, 0);

    // Served from cache.
    service.post(SLUG).await.expect("post");
    service.posts(PageRequest::default()).await.expect("posts");
    assert_eq!(repo.detail_reads.load(Ordering::SeqCst), 1);
    assert_eq!(repo.listing_reads.load(Ordering::SeqCst), 1);

    service
        .add_comment(SLUG, comment("See you there"))
        .await
        .expect("comment");

    let after = service.post(SLUG).await.expect("post");
    assert_eq!(after.comments.len(), 1);
    assert_eq!(after.comments[0].body, "See you there");
    let listing = service.posts(PageRequest::default()).await.expect("posts");
    assert_eq!(listing.items[0].comment_count, 1);
    assert_eq!(repo.detail_reads.load(Ordering::SeqCst), 2);
    assert_eq!(repo.listing_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn every_listing_page_is_evicted() {
    let (repo, store, service) = fixture();
    for page in 1..=3 {
        service
            .posts(PageRequest::new(page, 10))
            .await
            .expect("posts");
    }
    assert_eq!(store.len(), 3);

    service
        .add_comment(SLUG, comment("First"))
        .await
        .expect("comment");
    assert!(store.is_empty());

    service
        .posts(PageRequest::new(2, 10))
        .await
        .expect("posts");
    assert_eq!(repo.listing_reads.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failed_write_keeps_cached_entries() {
    let (repo, store, service) = fixture();
    service.post(SLUG).await.expect("post");
    repo.fail_writes.store(true, Ordering::SeqCst);

    let result = service.add_comment(SLUG, comment("Lost")).await;
    assert!(matches!(result, Err(AppError::Repo(RepoError::Persistence(_)))));

    let key = CacheKey::Post {
        slug: Segment::new(SLUG).expect("valid slug"),
    };
    assert!(store.get(&key.to_string()).await.expect("get").is_some());
    service.post(SLUG).await.expect("post");
    assert_eq!(repo.detail_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn invalid_comment_is_rejected_before_commit() {
    let (repo, _store, service) = fixture();
    let result = service.add_comment(SLUG, comment("  ")).await;
    assert!(matches!(result, Err(AppError::Domain(_))));
    assert!(repo.posts.lock().expect("posts lock")[SLUG].comments.is_empty());
}

#[tokio::test]
async fn missing_post_is_not_found_and_not_cached() {
    let (repo, store, service) = fixture();
    for _ in 0..2 {
        let result = service.post("no-such-post").await;
        assert!(matches!(result, Err(AppError::NotFound)));
    }
    assert_eq!(repo.detail_reads.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn review_write_evicts_only_that_product() {
    let store = Arc::new(MemoryStore::new());
    let aside = CacheAside::new(store.clone(), Arc::new(TtlPolicy::default()));
    let invalidator = Invalidator::new(store.clone());
    let reviewed = Uuid::new_v4();
    let other = Uuid::new_v4();

    for product_id in [reviewed, other] {
        let _: Result<u32, RepoError> = aside
            .cached(
                &CacheKey::Reviews {
                    product_id,
                    page: PageRequest::default(),
                },
                || async { Ok(3) },
            )
            .await;
        let _: Result<u32, RepoError> = aside
            .cached(&CacheKey::Product { id: product_id }, || async { Ok(4) })
            .await;
    }
    assert_eq!(store.len(), 4);

    let report = invalidator
        .invalidate(&[Mutation::ReviewSubmitted {
            product_id: reviewed,
        }])
        .await;
    assert!(report.is_complete());
    assert_eq!(report.deleted, 2);

    let other_reviews = CacheKey::Reviews {
        product_id: other,
        page: PageRequest::default(),
    };
    assert!(
        store
            .get(&other_reviews.to_string())
            .await
            .expect("get")
            .is_some()
    );
    assert!(
        store
            .get(&CacheKey::Product { id: other }.to_string())
            .await
            .expect("get")
            .is_some()
    );
}
