use anyhow::{Context, Result};

use fitlog_core::openfoodfacts::{NutritionFacts, SearchResponse, product_to_nutrition};

const SEARCH_URL: &str = "https://world.openfoodfacts.org/cgi/search.pl";

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
}

impl OpenFoodFactsClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "fitlog/{} (fitness tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Look up per-100g nutrition facts for a food by name. Returns the
    /// first usable search hit; no hit is a normal outcome, not an error.
    pub async fn lookup_name_async(&self, food_name: &str) -> Result<Option<NutritionFacts>> {
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("search_terms", food_name),
                ("json", "1"),
                ("page_size", "5"),
            ])
            .send()
            .await
            .context("Failed to reach OpenFoodFacts API")?;

        let data: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse OpenFoodFacts search response")?;

        Ok(data.products.into_iter().find_map(product_to_nutrition))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Integration tests (hit real OpenFoodFacts API) ---

    #[tokio::test]
    #[ignore = "hits OpenFoodFacts API"]
    async fn test_lookup_known_food() {
        let client = OpenFoodFactsClient::new().unwrap();
        let facts = client
            .lookup_name_async("nutella")
            .await
            .unwrap()
            .expect("nutella should exist in OpenFoodFacts");
        assert!(facts.calories_per_100g > 0.0);
    }

    #[tokio::test]
    #[ignore = "hits OpenFoodFacts API"]
    async fn test_lookup_gibberish_returns_none() {
        let client = OpenFoodFactsClient::new().unwrap();
        let facts = client
            .lookup_name_async("zzzz-no-such-food-zzzz")
            .await
            .unwrap();
        assert!(facts.is_none());
    }
}
