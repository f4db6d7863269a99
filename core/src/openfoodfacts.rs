use serde::Deserialize;

use crate::models::NewCachedFood;

/// Per-100g nutrition facts for one food, as returned by a lookup.
#[derive(Debug, Clone)]
pub struct NutritionFacts {
    pub calories_per_100g: f64,
    pub protein_per_100g: Option<f64>,
    pub carbs_per_100g: Option<f64>,
    pub fat_per_100g: Option<f64>,
}

impl NutritionFacts {
    /// Cache entry for these facts under the user's food name.
    #[must_use]
    pub fn into_cached(self, name: &str) -> NewCachedFood {
        NewCachedFood {
            name: name.to_lowercase(),
            calories_per_100g: self.calories_per_100g,
            protein_per_100g: self.protein_per_100g,
            carbs_per_100g: self.carbs_per_100g,
            fat_per_100g: self.fat_per_100g,
            source: "openfoodfacts".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub products: Vec<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductData {
    pub product_name: Option<String>,
    pub nutriments: Option<Nutriments>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g")]
    pub energy_kcal_100g: Option<f64>,
    pub proteins_100g: Option<f64>,
    pub carbohydrates_100g: Option<f64>,
    pub fat_100g: Option<f64>,
}

/// Map a product to nutrition facts. Products without a name or a calorie
/// figure are unusable and dropped.
#[must_use]
pub fn product_to_nutrition(p: ProductData) -> Option<NutritionFacts> {
    p.product_name.filter(|n| !n.is_empty())?;
    let nutriments = p.nutriments?;
    let calories = nutriments.energy_kcal_100g?;

    Some(NutritionFacts {
        calories_per_100g: calories,
        protein_per_100g: nutriments.proteins_100g,
        carbs_per_100g: nutriments.carbohydrates_100g,
        fat_per_100g: nutriments.fat_100g,
    })
}
