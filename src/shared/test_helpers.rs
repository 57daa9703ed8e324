#[cfg(test)]
use crate::features::auth::model::AuthenticatedUser;

#[cfg(test)]
use axum::{extract::Request, middleware::Next, response::Response, Router};

#[cfg(test)]
pub fn create_test_user(sub: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        sub: sub.to_string(),
        roles: vec![],
    }
}

#[cfg(test)]
pub fn create_admin_user(sub: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        sub: sub.to_string(),
        roles: vec![crate::shared::constants::ROLE_ADMIN.to_string()],
    }
}

/// Layer the router so every request runs as `user`
#[cfg(test)]
pub fn with_user(router: Router, user: AuthenticatedUser) -> Router {
    router.layer(axum::middleware::from_fn(
        move |mut request: Request, next: Next| {
            let user = user.clone();
            async move {
                request.extensions_mut().insert(user);
                let response: Response = next.run(request).await;
                response
            }
        },
    ))
}
