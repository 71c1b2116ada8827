// Public example gallery

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::{app::AppState, models::example_headshot::ExampleHeadshot, utils::ServiceError};

#[derive(Debug, Deserialize)]
pub struct ExampleFilter {
    pub style: Option<String>,
}

/// GET /api/examples?style=
pub async fn list_examples(
    State(state): State<AppState>,
    Query(filter): Query<ExampleFilter>,
) -> Result<Json<Vec<ExampleHeadshot>>, ServiceError> {
    let style = filter.style.as_deref().filter(|s| !s.is_empty());
    let mut conn = state.diesel_pool.get().await?;
    Ok(Json(ExampleHeadshot::list(&mut conn, style).await?))
}

/// GET /api/examples/:id
pub async fn get_example(
    State(state): State<AppState>,
    Path(example_id): Path<i32>,
) -> Result<Json<ExampleHeadshot>, ServiceError> {
    let mut conn = state.diesel_pool.get().await?;
    let example = ExampleHeadshot::find_by_id(&mut conn, example_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("Example".to_string()))?;
    Ok(Json(example))
}
