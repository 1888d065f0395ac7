// ===============================
// src/dialogue.rs (free-form shopkeeper chatter)
// ===============================
//
// Dipanggil HANYA saat parser tidak menemukan intent terstruktur.
// Dua backend:
// - Mock   : balasan kalengan deterministik (offline/dev/test)
// - Gemini : generateContent REST, prompt berisi konteks pasar toko
//
// Kontrak best-effort: timeout 20s, error apa pun dipulihkan caller jadi
// APOLOGY, tidak pernah naik sebagai kegagalan sistem.
//

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

use crate::config::{Args, DialogueMode};

pub const APOLOGY: &str =
    "Sorry, I lost my train of thought. Ask me again in a moment?";

/// Konteks pasar yang dibawa ke prompt (disusun engine di bawah lock,
/// string saja supaya lock bisa dilepas sebelum await).
#[derive(Debug, Clone)]
pub struct ShopContext {
    pub shop_name: String,
    pub competitors: Vec<String>,
    pub price_board: String,
    pub demand_note: String,
    pub recent_lines: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("gemini request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gemini returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("gemini reply had no text")]
    EmptyReply,
}

pub enum Backend {
    Mock,
    Gemini(GeminiClient),
}

impl Backend {
    pub fn from_config(args: &Args) -> Backend {
        match args.dialogue_mode {
            DialogueMode::Mock => Backend::Mock,
            DialogueMode::Gemini => match &args.gemini_api_key {
                Some(key) => Backend::Gemini(GeminiClient::new(
                    args.gemini_base_url.clone(),
                    args.gemini_model.clone(),
                    key.clone(),
                )),
                None => {
                    warn!("DIALOGUE_MODE=gemini but GEMINI_API_KEY missing, using mock");
                    Backend::Mock
                }
            },
        }
    }

    pub async fn reply(&self, ctx: &ShopContext, utterance: &str) -> Result<String, DialogueError> {
        match self {
            Backend::Mock => Ok(format!(
                "[{}] Board rates today: {}. Name an item, a quantity and a price and we can haggle.",
                ctx.shop_name, ctx.price_board
            )),
            Backend::Gemini(client) => client.generate(&build_prompt(ctx, utterance)).await,
        }
    }
}

/// Prompt konteks pasar untuk si penjaga toko (semua toko melihat data
/// pasar yang sama tapi menawar dengan gayanya sendiri).
fn build_prompt(ctx: &ShopContext, utterance: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are an independent shopkeeper in a competitive electronics bazaar.\n\
         - Your shop: {}\n\
         - Competing shops: {}\n\
         - Current market prices: {}\n\
         - {}\n",
        ctx.shop_name,
        ctx.competitors.join(", "),
        ctx.price_board,
        ctx.demand_note,
    ));
    if !ctx.recent_lines.is_empty() {
        prompt.push_str("- Recent market talk:\n");
        for line in &ctx.recent_lines {
            prompt.push_str(&format!("    {line}\n"));
        }
    }
    prompt.push_str(
        "Negotiate based on market conditions and competition. Stay in character, keep it short.\n",
    );
    prompt.push_str(&format!("\nUser: {utterance}\nShopkeeper:"));
    prompt
}

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: String, model: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self { http, base_url, model, api_key }
    }

    async fn generate(&self, prompt: &str) -> Result<String, DialogueError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            urlencoding::encode(&self.api_key),
        );
        let body = json!({
            "contents": [ { "parts": [ { "text": prompt } ] } ]
        });

        let rsp = self.http.post(url).json(&body).send().await?;
        if !rsp.status().is_success() {
            return Err(DialogueError::Status(rsp.status()));
        }

        let v = rsp.json::<Value>().await?;
        let text = v
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.pointer("/content/parts/0/text"))
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(DialogueError::EmptyReply)?;
        Ok(text)
    }
}
