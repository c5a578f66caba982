use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::{
    catalog::{require_course, require_user, required},
    error::{AppError, AppResult},
    models::{CreateDiscussionReq, Discussion, LikeOutcome, Reply, ReplyReq},
    store::RecordStore,
};

pub async fn create_discussion(
    store: &dyn RecordStore,
    course_id: Uuid,
    req: CreateDiscussionReq,
) -> AppResult<Discussion> {
    require_course(store, course_id).await?;
    require_user(store, req.author_id).await?;
    let discussion = Discussion {
        id: Uuid::new_v4(),
        course_id,
        author_id: req.author_id,
        title: required("title", &req.title)?,
        content: required("content", &req.content)?,
        replies: vec![],
        likes: vec![],
        created_at: Utc::now(),
    };
    store.insert_discussion(&discussion).await?;
    info!(discussion_id = %discussion.id, %course_id, "discussion opened");
    Ok(discussion)
}

pub async fn list_course_discussions(store: &dyn RecordStore, course_id: Uuid) -> AppResult<Vec<Discussion>> {
    require_course(store, course_id).await?;
    Ok(store.course_discussions(course_id).await?)
}

pub async fn get_discussion(store: &dyn RecordStore, discussion_id: Uuid) -> AppResult<Discussion> {
    store
        .find_discussion(discussion_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("discussion {discussion_id}")))
}

pub async fn add_reply(store: &dyn RecordStore, discussion_id: Uuid, req: ReplyReq) -> AppResult<Discussion> {
    require_user(store, req.author_id).await?;
    let reply = Reply {
        id: Uuid::new_v4(),
        author_id: req.author_id,
        content: required("content", &req.content)?,
        created_at: Utc::now(),
    };
    if !store.add_reply(discussion_id, &reply).await? {
        return Err(AppError::not_found(format!("discussion {discussion_id}")));
    }
    get_discussion(store, discussion_id).await
}

/// A second like from the same user takes the first one back.
pub async fn toggle_like(store: &dyn RecordStore, discussion_id: Uuid, user_id: Uuid) -> AppResult<LikeOutcome> {
    require_user(store, user_id).await?;
    store
        .toggle_like(discussion_id, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("discussion {discussion_id}")))
}
