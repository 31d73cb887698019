use std::fmt;
use std::io::{Read, Write};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

// ─── Input ──────────────────────────────────────────────────────────────────

/// One validated input row.
#[derive(Debug, Clone, PartialEq)]
pub struct GiftRequest {
    pub recipient_name: String,
    pub gift_description: String,
    /// Budget cell as written, trimmed; echoed back in the output table.
    pub budget_text: String,
    /// Parsed budget, used only for the deal prompt.
    pub budget: Option<f64>,
}

/// Raw CSV row; every column is optional so incomplete rows can be skipped
/// instead of failing the whole file.
#[derive(Debug, Deserialize)]
struct InputRow {
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Gift Idea", default)]
    gift_idea: Option<String>,
    #[serde(rename = "Budget", default)]
    budget: Option<String>,
}

impl InputRow {
    fn into_request(self) -> Option<GiftRequest> {
        let recipient_name = non_empty(self.name)?;
        let gift_description = non_empty(self.gift_idea)?;
        let budget_text = non_empty(self.budget).unwrap_or_default();
        let budget = if budget_text.is_empty() {
            None
        } else {
            let parsed = parse_budget(&budget_text);
            if parsed.is_none() {
                warn!(
                    "[ingest] Unreadable budget {:?} for {}, deal search runs without one",
                    budget_text, recipient_name
                );
            }
            parsed
        };

        Some(GiftRequest {
            recipient_name,
            gift_description,
            budget_text,
            budget,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Accepts "100", "$100", "1,250.50"; rejects negatives and non-finite values.
pub fn parse_budget(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    cleaned
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|b| b.is_finite() && *b >= 0.0)
}

/// Reads gift requests from CSV with a header row, preserving order.
///
/// Rows missing `Name` or `Gift Idea`, and rows the CSV reader cannot decode,
/// are skipped. Only a failure to read the header is an error.
pub fn read_requests<R: Read>(reader: R) -> Result<Vec<GiftRequest>> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV header")?.clone();
    for required in ["Name", "Gift Idea"] {
        if !headers.iter().any(|h| h == required) {
            warn!(
                "[ingest] CSV header has no {:?} column, every row will be skipped",
                required
            );
        }
    }

    let mut requests = Vec::new();
    for (i, row) in rdr.deserialize::<InputRow>().enumerate() {
        match row {
            Ok(row) => match row.into_request() {
                Some(request) => requests.push(request),
                None => warn!("[ingest] Skipping row {}: missing Name or Gift Idea", i + 2),
            },
            Err(e) => warn!("[ingest] Skipping row {}: {}", i + 2, e),
        }
    }

    Ok(requests)
}

// ─── Deal Lookup Result ─────────────────────────────────────────────────────

/// A price as the model reported it: a number, or whatever text it chose.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Price {
    Amount(f64),
    Text(String),
}

impl Price {
    pub const NOT_AVAILABLE: &'static str = "N/A";

    pub fn not_available() -> Self {
        Self::Text(Self::NOT_AVAILABLE.to_string())
    }

    pub fn is_amount(&self) -> bool {
        matches!(self, Self::Amount(_))
    }

    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(n)) => n
                .as_f64()
                .map_or_else(Self::not_available, Self::Amount),
            Some(Value::String(s)) if !s.trim().is_empty() => Self::Text(s.trim().to_string()),
            _ => Self::not_available(),
        }
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amount(amount) => write!(f, "{}", amount),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealResult {
    pub price: Price,
    #[serde(rename = "link")]
    pub purchase_link: String,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DealResult {
    /// Maps the model's JSON object onto a deal, defaulting missing fields.
    pub fn from_json(map: &Map<String, Value>, gift_description: &str) -> Self {
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        Self {
            price: Price::from_value(map.get("price")),
            purchase_link: text("link").unwrap_or_default().to_string(),
            product_name: text("product_name")
                .unwrap_or(gift_description)
                .to_string(),
            error: None,
        }
    }

    /// Substitute record for a failed lookup.
    pub fn fallback(gift_description: &str, error: impl fmt::Display) -> Self {
        Self {
            price: Price::not_available(),
            purchase_link: String::new(),
            product_name: gift_description.to_string(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Column layout of the output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// Name, Gift Idea, Budget, Riddle
    Riddles,
    /// Name, Gift Idea, Budget, Product Found, Price, Link, Riddle
    Deals,
}

impl OutputLayout {
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            Self::Riddles => &["Name", "Gift Idea", "Budget", "Riddle"],
            Self::Deals => &[
                "Name",
                "Gift Idea",
                "Budget",
                "Product Found",
                "Price",
                "Link",
                "Riddle",
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub request: GiftRequest,
    pub riddle: String,
    pub deal: Option<DealResult>,
}

impl ResultRow {
    fn cells(&self, layout: OutputLayout) -> Vec<String> {
        let mut cells = vec![
            self.request.recipient_name.clone(),
            self.request.gift_description.clone(),
            self.request.budget_text.clone(),
        ];

        if layout == OutputLayout::Deals {
            match &self.deal {
                Some(deal) => cells.extend([
                    deal.product_name.clone(),
                    deal.price.to_string(),
                    deal.purchase_link.clone(),
                ]),
                None => cells.extend([
                    self.request.gift_description.clone(),
                    Price::NOT_AVAILABLE.to_string(),
                    String::new(),
                ]),
            }
        }

        cells.push(self.riddle.clone());
        cells
    }
}

/// Writes the header and one record per row; the header is written even for no rows.
pub fn write_results<W: Write>(
    writer: W,
    rows: &[ResultRow],
    layout: OutputLayout,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(layout.headers())
        .context("Failed to write CSV header")?;
    for row in rows {
        wtr.write_record(row.cells(layout))
            .context("Failed to write CSV row")?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
