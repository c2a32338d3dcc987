use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes HTTP requests; the seam tests and wrappers plug into.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
