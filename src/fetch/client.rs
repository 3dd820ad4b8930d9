use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes one HTTP request. The seam between feed sources and the network.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
