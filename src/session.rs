//! Session collaborator: resolves the caller's bearer token to a user
//! snapshot. The snapshot is the working copy for exactly one transition;
//! nothing in the core reads ambient session state.

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crate::db::Db;
use crate::error::CoreError;
use crate::models::{User, UserRole};
use crate::store;

#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl std::ops::Deref for CurrentUser {
    type Target = User;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl CurrentUser {
    pub fn require_admin(&self) -> Result<(), CoreError> {
        match self.role {
            UserRole::Admin => Ok(()),
            UserRole::Learner => Err(CoreError::Forbidden),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    Db: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = CoreError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| CoreError::Unauthorized)?;
        let db = Db::from_ref(state);
        let user = store::find_user_by_token(&db, bearer.token())
            .await?
            .ok_or(CoreError::Unauthorized)?;
        Ok(CurrentUser(user))
    }
}
