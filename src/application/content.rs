//! Blog posts and comments.

use std::sync::Arc;

use crate::application::error::{AppError, found};
use crate::application::pagination::{PageRequest, Paged};
use crate::application::repos::ContentRepo;
use crate::cache::{CacheAside, CacheKey, Invalidator, Mutation, Segment};
use crate::domain::entities::{CommentRecord, NewComment, PostDetail, PostRecord};

#[derive(Clone)]
pub struct ContentService {
    repo: Arc<dyn ContentRepo>,
    cache: CacheAside,
    invalidator: Invalidator,
}

impl ContentService {
    pub fn new(repo: Arc<dyn ContentRepo>, cache: CacheAside, invalidator: Invalidator) -> Self {
        Self {
            repo,
            cache,
            invalidator,
        }
    }

    pub async fn posts(&self, page: PageRequest) -> Result<Paged<PostRecord>, AppError> {
        let posts = self
            .cache
            .cached(&CacheKey::Posts(page), || self.repo.list_posts(page))
            .await?;
        Ok(posts)
    }

    pub async fn post(&self, slug: &str) -> Result<PostDetail, AppError> {
        let key = CacheKey::Post {
            slug: Segment::new(slug)?,
        };
        let detail = self
            .cache
            .cached(&key, || self.repo.find_post(slug))
            .await?;
        found(detail)
    }

    /// Persist a comment, then evict the post detail and every post listing
    /// page (they carry the comment count).
    pub async fn add_comment(
        &self,
        slug: &str,
        comment: NewComment,
    ) -> Result<CommentRecord, AppError> {
        comment.validate()?;
        let post_slug = Segment::new(slug)?;
        let record = self
            .invalidator
            .after_commit(
                Mutation::CommentAdded { post_slug },
                self.repo.insert_comment(slug, &comment),
            )
            .await?;
        Ok(record)
    }

    /// Slugs are stable once published; only the saved slug is evicted.
    pub async fn save_post(&self, post: PostRecord, body: String) -> Result<PostRecord, AppError> {
        let slug = Segment::new(post.slug.as_str())?;
        let saved = self
            .invalidator
            .after_commit(Mutation::PostChanged { slug }, self.repo.save_post(&post, &body))
            .await?;
        Ok(saved)
    }
}
