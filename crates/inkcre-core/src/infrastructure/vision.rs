//! Image understanding through a vision-capable chat model

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::graph::{ContentUnderstanding, ImageAnalysis, ImageSource};
use crate::error::{Error, Result};
use crate::llm::{LlmClient, Message};

const ANALYSIS_PROMPT: &str = r#"Read this image and extract what a person would want to remember from it.

Respond with JSON only, in this shape:
{
  "summary": "one or two sentences describing the image",
  "details": [
    {
      "content": "a key piece of information shown in the image",
      "type": "what kind of information it is, e.g. date, address, phone number, event",
      "actions": ["something a person could do that needs this kind of information"]
    }
  ]
}

Use an empty details array when the image holds no key information."#;

/// [`ContentUnderstanding`] backed by the configured vision model
#[derive(Debug, Clone)]
pub struct VisionAnalyzer {
    client: LlmClient,
}

impl VisionAnalyzer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentUnderstanding for VisionAnalyzer {
    async fn analyze(&self, image: &ImageSource) -> Result<ImageAnalysis> {
        let message = Message::user_with_image(image.to_url(), ANALYSIS_PROMPT);
        let model = self.client.vision_model().to_string();

        let response = self.client.chat(vec![message], Some(&model)).await?;
        debug!(
            model = %response.model,
            tokens = response.tokens_used,
            "Vision model answered"
        );

        parse_analysis(&response.content)
    }
}

/// Parse the model's JSON answer, tolerating code fences and prose
pub fn parse_analysis(response: &str) -> Result<ImageAnalysis> {
    let json = extract_json_from_response(response);
    let analysis: ImageAnalysis = serde_json::from_str(&json).map_err(|e| {
        warn!(error = %e, "Vision response is not valid analysis JSON");
        Error::ExtractionFailed(format!("unreadable image analysis: {}", e))
    })?;

    if analysis.summary.trim().is_empty() {
        return Err(Error::ExtractionFailed(
            "image analysis has an empty summary".to_string(),
        ));
    }
    Ok(analysis)
}

fn extract_json_from_response(response: &str) -> String {
    if let Some(start) = response.find("```json") {
        let json_start = start + 7;
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim().to_string();
        }
    }

    if let Some(start) = response.find("```") {
        let potential_start = start + 3;
        let json_start = match response[potential_start..].find('\n') {
            Some(newline) => potential_start + newline + 1,
            None => potential_start,
        };
        if let Some(end) = response[json_start..].find("```") {
            return response[json_start..json_start + end].trim().to_string();
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}'))
        && start < end
    {
        return response[start..=end].to_string();
    }

    response.to_string()
}
