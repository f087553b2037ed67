use std::future::Future;

use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::nutrition::PortionLabel;

/// Outcome of the food/not-food gate model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FoodCheck {
    pub is_food: bool,
    pub confidence: f64,
}

/// Candidate dish proposed by the dish recognition model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishCandidate {
    pub dish_name_guess: String,
    pub portion_label: PortionLabel,
    pub confidence: f64,
}

/// Black-box model capability providers consumed by the pipeline.
///
/// Implementations are loaded once and read-only at inference time, so a
/// stage timeout can drop an in-flight call without leaving shared state
/// half-mutated.
pub trait VisionModels: Send + Sync {
    fn classify_food(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<FoodCheck, VisionError>> + Send;

    fn describe_dish(
        &self,
        image: &[u8],
    ) -> impl Future<Output = Result<DishCandidate, VisionError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model unavailable: {0}")]
    Unavailable(String),
}

/// HTTP client for the local vision inference sidecar, which hosts the
/// actual classifier and dish-description models.
pub struct HttpVisionClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct InferRequest<'a> {
    /// Base64-encoded image payload.
    image: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    is_food: bool,
    confidence: f64,
}

#[derive(Deserialize)]
struct DescribeResponse {
    dish_name: String,
    portion_label: Option<String>,
    confidence: Option<f64>,
}

impl HttpVisionClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_image<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        image: &[u8],
    ) -> Result<T, VisionError> {
        let payload = base64::engine::general_purpose::STANDARD.encode(image);
        let response = self
            .http
            .post(format!("{}{endpoint}", self.base_url))
            .json(&InferRequest { image: &payload })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

impl VisionModels for HttpVisionClient {
    async fn classify_food(&self, image: &[u8]) -> Result<FoodCheck, VisionError> {
        let body: ClassifyResponse = self.post_image("/v1/classify-food", image).await?;
        Ok(FoodCheck {
            is_food: body.is_food,
            confidence: clamp_confidence(body.confidence),
        })
    }

    async fn describe_dish(&self, image: &[u8]) -> Result<DishCandidate, VisionError> {
        let body: DescribeResponse = self.post_image("/v1/describe-dish", image).await?;
        let dish_name_guess = match body.dish_name.trim() {
            "" => "unknown".to_string(),
            name => name.to_string(),
        };
        Ok(DishCandidate {
            dish_name_guess,
            portion_label: body
                .portion_label
                .as_deref()
                .map(PortionLabel::from_description)
                .unwrap_or_default(),
            // Model confidences are not trusted to stay in range.
            confidence: clamp_confidence(body.confidence.unwrap_or(0.5)),
        })
    }
}

pub(crate) fn clamp_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_is_clamped_into_unit_range() {
        assert_eq!(clamp_confidence(0.73), 0.73);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(7.0), 1.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.5);
    }
}
