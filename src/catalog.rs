//! Topic catalog published by the stream source over HTTP.

use log::debug;
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicCatalog {
    pub topics: Vec<String>,
}

/// GET `url` and parse `{"topics": [...]}`.
pub async fn fetch(url: String) -> Result<Vec<String>> {
    debug!("catalog: GET {url}");
    let catalog: TopicCatalog = reqwest::get(&url)
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(catalog.topics)
}
