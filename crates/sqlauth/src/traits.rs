//! Username/password authentication trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::attributes::AttributeSet;
use crate::error::AuthError;

/// Trait for username/password authentication sources.
///
/// Implementations must be thread-safe (`Send + Sync`) as the host may call
/// them concurrently from multiple requests.
#[async_trait]
pub trait UserPassAuth: Send + Sync {
    /// Verify a username/password pair.
    ///
    /// # Returns
    /// * `Ok(AttributeSet)` - the user's attributes
    /// * `Err(AuthError::InvalidCredentials)` - unknown user or wrong password
    /// * `Err(_)` - any other failure of the attempt
    async fn login(&self, username: &str, password: &str) -> Result<AttributeSet, AuthError>;
}

/// Blanket implementation for `Arc<A>` where `A: UserPassAuth`.
#[async_trait]
impl<A: UserPassAuth + ?Sized> UserPassAuth for Arc<A> {
    #[inline]
    async fn login(&self, username: &str, password: &str) -> Result<AttributeSet, AuthError> {
        (**self).login(username, password).await
    }
}

/// Blanket implementation for `Box<A>` where `A: UserPassAuth`.
#[async_trait]
impl<A: UserPassAuth + ?Sized> UserPassAuth for Box<A> {
    #[inline]
    async fn login(&self, username: &str, password: &str) -> Result<AttributeSet, AuthError> {
        (**self).login(username, password).await
    }
}
