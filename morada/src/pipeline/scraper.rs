//! Listing scraper adapter: external HTTP service, with a fixture fallback
//! when the scraper is disabled.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::store::ListingImage;

use super::state::ScrapedListing;

/// Scrapes a property listing URL into structured data plus image URLs.
#[async_trait]
pub trait ListingScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedListing, AgentError>;
}

/// Deterministic canned listing, used when no scraper service is configured
/// and in tests.
pub struct FixtureScraper;

#[async_trait]
impl ListingScraper for FixtureScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedListing, AgentError> {
        Ok(ScrapedListing {
            url: url.to_string(),
            title: "T2 remodelável em Alfama".to_string(),
            location: "Alfama, Lisboa".to_string(),
            price_eur: 285_000,
            typology: "T2".to_string(),
            area_m2: 78.0,
            images: vec![
                ListingImage {
                    url: format!("{}/img/cozinha.jpg", url),
                    tag: Some("cozinha".to_string()),
                },
                ListingImage {
                    url: format!("{}/img/sala.jpg", url),
                    tag: Some("sala".to_string()),
                },
                ListingImage {
                    url: format!("{}/img/quarto-1.jpg", url),
                    tag: Some("quarto 1".to_string()),
                },
                ListingImage {
                    url: format!("{}/img/quarto-2.jpg", url),
                    tag: Some("quarto 2".to_string()),
                },
                ListingImage {
                    url: format!("{}/img/wc.jpg", url),
                    tag: None,
                },
                ListingImage {
                    url: format!("{}/img/planta.jpg", url),
                    tag: Some("planta".to_string()),
                },
            ],
        })
    }
}

/// HTTP scraper client against the external scraping service.
///
/// `GET {base_url}/scrape?url=<listing>` returning the listing JSON. 5xx and
/// transport failures surface as transient, 4xx as permanent.
pub struct HttpScraper {
    base_url: String,
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ListingScraper for HttpScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedListing, AgentError> {
        let endpoint = format!("{}/scrape", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&endpoint)
            .query(&[("url", url)])
            .send()
            .await
            .map_err(|e| AgentError::Transient(format!("scraper unreachable: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AgentError::Transient(format!("scraper returned {}", status)));
        }
        if !status.is_success() {
            return Err(AgentError::Permanent(format!("scraper returned {}", status)));
        }
        response
            .json::<ScrapedListing>()
            .await
            .map_err(|e| AgentError::Permanent(format!("scraper body invalid: {}", e)))
    }
}
