use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::extract::{extract_json_object, flatten_riddle};
use crate::gifts::{DealResult, GiftRequest, OutputLayout, ResultRow};
use crate::llm::{LlmProvider, RunRequest};

// ─── Prompts ────────────────────────────────────────────────────────────────

pub fn riddle_prompt(name: &str, gift: &str) -> String {
    format!(
        r#"Write a 4-line Christmas riddle for {name} about their gift "{gift}".
Hint at what the gift is WITHOUT saying it directly.
Make it festive and fun. Return ONLY the riddle, no intro."#
    )
}

pub fn deal_prompt(gift: &str, budget: Option<f64>) -> String {
    let budget_clause = budget
        .map(|b| format!(" under ${}", b))
        .unwrap_or_default();
    format!(
        r#"Search for the best deal to buy "{gift}" online{budget_clause}.
Find a real product with actual price and purchase link.
Return ONLY a JSON object in this exact format:
{{"price": 29.99, "link": "https://...", "product_name": "Full Product Name"}}
No explanation, just the JSON."#
    )
}

pub fn fallback_riddle(name: &str) -> String {
    format!("A special gift awaits for you, {}!", name)
}

fn preview(text: &str) -> String {
    text.chars().take(150).collect()
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// Drives riddle synthesis (and optionally deal lookup) over a list of gift requests.
///
/// Each row's failures are absorbed into fallback values, so `process` always
/// returns one result per request, in request order.
#[derive(Debug, Clone)]
pub struct Pipeline {
    provider: Arc<dyn LlmProvider>,
    model: String,
    search_tools: Vec<String>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            search_tools: Vec::new(),
            concurrency: 1,
        }
    }

    pub fn with_search_tools(mut self, tools: Vec<String>) -> Self {
        self.search_tools = tools;
        self
    }

    /// Rows in flight at once; 1 (the default) is strictly sequential.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Riddle Synthesis. Never fails; the fallback still names the recipient.
    pub async fn generate_riddle(&self, gift: &str, name: &str) -> String {
        let prompt = riddle_prompt(name, gift);
        match self
            .provider
            .run(RunRequest::new(&prompt, &self.model))
            .await
        {
            Ok(resp) => {
                let riddle = flatten_riddle(&resp.final_output);
                if riddle.is_empty() {
                    warn!("[riddle] Empty riddle for {}, using fallback", name);
                    fallback_riddle(name)
                } else {
                    riddle
                }
            }
            Err(e) => {
                warn!("[riddle] Error for {}: {}", name, e);
                fallback_riddle(name)
            }
        }
    }

    /// Deal Lookup. Never fails; errors come back as a fallback record.
    pub async fn search_best_deal(&self, gift: &str, budget: Option<f64>) -> DealResult {
        match budget {
            Some(b) => info!("[deal] Searching for: {} (budget: ${})", gift, b),
            None => info!("[deal] Searching for: {} (no budget)", gift),
        }

        let prompt = deal_prompt(gift, budget);
        let request = RunRequest::new(&prompt, &self.model).with_tools(&self.search_tools);
        let resp = match self.provider.run(request).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[deal] Error: {}", e);
                return DealResult::fallback(gift, e);
            }
        };

        let text = resp.final_output.trim();
        debug!("[deal] Raw response: {}...", preview(text));

        match extract_json_object(text) {
            Ok(map) => {
                let deal = DealResult::from_json(&map, gift);
                if !deal.price.is_amount() {
                    debug!("[deal] Price for {} is not numeric: {}", gift, deal.price);
                }
                info!("[deal] Found: {} - {}", deal.product_name, deal.price);
                deal
            }
            Err(e) => {
                warn!("[deal] Error: {}", e);
                DealResult::fallback(gift, e)
            }
        }
    }

    /// Runs every stage the layout needs for one row. Deal lookup goes first.
    pub async fn process_row(&self, request: GiftRequest, layout: OutputLayout) -> ResultRow {
        let deal = match layout {
            OutputLayout::Deals => Some(
                self.search_best_deal(&request.gift_description, request.budget)
                    .await,
            ),
            OutputLayout::Riddles => None,
        };
        let riddle = self
            .generate_riddle(&request.gift_description, &request.recipient_name)
            .await;

        ResultRow {
            request,
            riddle,
            deal,
        }
    }

    /// Processes all rows; output order always equals input order.
    pub async fn process(
        &self,
        requests: Vec<GiftRequest>,
        layout: OutputLayout,
    ) -> Vec<ResultRow> {
        let total = requests.len();
        info!(
            "[pipeline] Processing {} recipients (concurrency={})",
            total, self.concurrency
        );

        let rows: Vec<ResultRow> = stream::iter(requests.into_iter().enumerate())
            .map(move |(i, request)| async move {
                info!("[{}/{}] Processing {}...", i + 1, total, request.recipient_name);
                self.process_row(request, layout).await
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let failed_deals = rows
            .iter()
            .filter(|r| r.deal.as_ref().is_some_and(DealResult::is_fallback))
            .count();
        if failed_deals > 0 {
            warn!("[pipeline] {} of {} deal lookups fell back", failed_deals, total);
        }

        rows
    }
}
