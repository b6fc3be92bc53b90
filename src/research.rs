//! Real-time event research for prediction markets
//!
//! Builds the dated research prompt for an event and its markets and runs
//! it through Sonar's web-grounded search, appending source citations to
//! the returned analysis.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::client::{SonarClient, MODEL_REASONING};
use crate::error::SonarResult;
use crate::types::{ChatCompletionRequest, ChatMessage, SearchRecency};

/// Markets below this total volume are left out of the research prompt
const MIN_MARKET_VOLUME: f64 = 1000.0;

const RESEARCH_SYSTEM_PROMPT: &str = "You are a prediction market research analyst. \
    Provide thorough, real-time research with probability estimates. \
    Always cite sources with dates. Be specific and data-driven.";

/// Event under research
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventInfo {
    pub event_ticker: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub mutually_exclusive: bool,
}

/// A market within an event, without odds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub ticker: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub open_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub volume: f64,
}

impl SonarClient {
    /// Research an event and its markets using Sonar's real-time search
    ///
    /// Returns the analysis as free text with a numbered `**Sources:**`
    /// section appended when the API returns citations.
    #[instrument(skip(self, event, markets), fields(event_ticker = %event.event_ticker))]
    pub async fn research_event(
        &self,
        event: &EventInfo,
        markets: &[MarketInfo],
    ) -> SonarResult<String> {
        let prompt = build_research_prompt(event, markets, Utc::now());

        info!("Starting Sonar research for event {}", event.event_ticker);

        let request = ChatCompletionRequest {
            model: self
                .config
                .model
                .clone()
                .unwrap_or_else(|| MODEL_REASONING.to_string()),
            messages: vec![
                ChatMessage::system(RESEARCH_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ],
            // Low temperature for factual responses
            temperature: 0.1,
            max_tokens: None,
            search_recency_filter: Some(SearchRecency::Day),
            return_citations: true,
        };

        let response = self.transport.chat(&request).await?;

        let mut content = response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if !response.citations.is_empty() {
            content.push_str(&render_citations(&response.citations));
        }

        info!("Completed Sonar research for event {}", event.event_ticker);

        Ok(content)
    }
}

/// Build the research prompt for an event and its markets
///
/// Low-volume markets are skipped; numbering follows each market's position
/// in the input list.
pub fn build_research_prompt(
    event: &EventInfo,
    markets: &[MarketInfo],
    now: DateTime<Utc>,
) -> String {
    let current_date = now.format("%B %d, %Y");
    let current_time = now.format("%H:%M UTC");
    let current_year = now.year();

    let event_info = format!(
        "Event: {}\nSubtitle: {}\nMutually Exclusive: {}\n",
        event.title, event.subtitle, event.mutually_exclusive
    );

    let mut markets_info = String::from("Markets:\n");
    for (index, market) in markets.iter().enumerate() {
        if market.volume < MIN_MARKET_VOLUME {
            continue;
        }
        markets_info.push_str(&format!("{}. {}", index + 1, market.title));
        if !market.ticker.is_empty() {
            markets_info.push_str(&format!(" (Ticker: {})", market.ticker));
        }
        markets_info.push('\n');
        if let Some(subtitle) = &market.subtitle {
            markets_info.push_str(&format!("   Subtitle: {}\n", subtitle));
        }
        markets_info.push_str(&format!("   Open: {}\n", format_time(market.open_time)));
        markets_info.push_str(&format!("   Close: {}\n\n", format_time(market.close_time)));
    }

    format!(
        r#"TODAY'S DATE: {current_date} (Current time: {current_time}). Year: {current_year}.

You are a prediction market research analyst. Your task is to research this event and provide probability estimates for each market.

{event_info}

{markets_info}

RESEARCH REQUIREMENTS:
1. Search for the LATEST real-time information about this event
2. For financial assets: Get the CURRENT price as of today with source
3. For sports: Get CURRENT {current_year} season standings, recent game results, injury reports
4. For politics/events: Get the latest news, polls, and developments
5. ALWAYS cite your sources with dates

Please provide:
1. **Current Status** (as of {current_date}): State current prices, standings, or situation with specific numbers and sources
2. **Recent News & Developments**: Key news from the past week with dates
3. **Key Factors**: What will influence the outcome?
4. **For Each Market**:
   - Probability estimate (0-100%) for YES outcome
   - Confidence level (1-10)
   - Brief reasoning with cited sources
5. **Risks & Catalysts**: What could change the outcome?

CRITICAL - MARKET SEMANTICS:
- If market asks "Will X go BELOW $Y?" -> probability of going BELOW that level
- If market asks "Will X go ABOVE $Y?" -> probability of going ABOVE that level
- Pay close attention to the exact wording of each market

IMPORTANT: Include the market ticker with each probability prediction.
Format: "TICKER: XX%" or "Market Name (TICKER): XX% probability"

Provide your analysis with real-time data and source citations."#
    )
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn render_citations(citations: &[String]) -> String {
    let mut output = String::from("\n\n**Sources:**\n");
    for (index, citation) in citations.iter().enumerate() {
        output.push_str(&format!("{}. {}\n", index + 1, citation));
    }
    output
}
