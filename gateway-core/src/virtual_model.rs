//! Virtual-model resolution: `auto`, `auto-fast`, `auto-cheap`, `auto-vi`,
//! `auto-code`, `auto-smart` classify a request and pick a concrete
//! `(model, channel)` pair under a feature-derived strategy.
//!
//! New module; there is no teacher counterpart for virtual models, but the
//! scoring shape mirrors [`crate::health::HealthView::score_with_strategy`]
//! and the channel enumeration mirrors [`crate::channel::ChannelRegistry`].

use std::collections::HashMap;

use crate::channel::{Channel, ChannelRegistry};
use crate::health::HealthTracker;
use crate::models::{ChatRequest, Content, Part};
use crate::routing::SelectionStrategy;

pub const VIRTUAL_MODELS: &[&str] = &[
    "auto",
    "auto-fast",
    "auto-cheap",
    "auto-vi",
    "auto-code",
    "auto-smart",
];

pub fn is_virtual_model(model: &str) -> bool {
    VIRTUAL_MODELS.contains(&model)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedLanguage {
    Vietnamese,
    Cjk,
    English,
}

/// Result of analyzing a chat request's message content.
#[derive(Debug, Clone)]
pub struct RequestFeatures {
    pub language: DetectedLanguage,
    pub has_code: bool,
    pub has_vision: bool,
    pub estimated_tokens: u32,
    pub long_context: bool,
    pub complexity: f64,
}

const VIETNAMESE_DIACRITICS: &str = "ăâđêôơưàằầèéìíòóùúỳáảãạắặẳẵậấẩẫẹẻẽịỉĩọỏõụủũỷýỹ";
const VIETNAMESE_FUNCTION_WORDS: &[&str] = &["là", "của", "và", "không", "có", "được", "này"];
const CODE_KEYWORDS: &[&str] = &[
    "def", "func", "function", "class", "import", "const", "let", "var", "public", "private",
    "package",
];

/// Extract the concatenated text of every user-role turn in the request.
fn user_turn_text(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .filter(|m| m.role == crate::models::Role::User)
        .map(|m| m.content.as_text())
        .collect::<Vec<_>>()
        .join("\n")
}

fn detect_language(text: &str) -> DetectedLanguage {
    let lower = text.to_lowercase();
    if lower.chars().any(|c| VIETNAMESE_DIACRITICS.contains(c))
        || VIETNAMESE_FUNCTION_WORDS
            .iter()
            .any(|w| lower.split_whitespace().any(|tok| tok == *w))
    {
        return DetectedLanguage::Vietnamese;
    }

    let cjk_chars = text
        .chars()
        .filter(|c| is_cjk_codepoint(*c))
        .count();
    if cjk_chars > 0 {
        return DetectedLanguage::Cjk;
    }

    DetectedLanguage::English
}

fn is_cjk_codepoint(c: char) -> bool {
    let cp = c as u32;
    (0x4E00..=0x9FFF).contains(&cp) // CJK Unified Ideographs
        || (0x3040..=0x30FF).contains(&cp) // Hiragana/Katakana
        || (0xAC00..=0xD7A3).contains(&cp) // Hangul syllables
}

fn detect_code(text: &str) -> bool {
    text.contains("```") || CODE_KEYWORDS.iter().any(|kw| text.contains(kw))
}

fn detect_vision(request: &ChatRequest) -> bool {
    request.messages.iter().any(|m| m.content.has_image())
}

fn cjk_fraction(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    let cjk = text.chars().filter(|c| is_cjk_codepoint(*c)).count();
    cjk as f64 / total as f64
}

/// Analyze a chat request's message content to derive routing features.
pub fn analyze_request(request: &ChatRequest) -> RequestFeatures {
    let text = user_turn_text(request);
    let language = detect_language(&text);
    let has_code = detect_code(&text);
    let has_vision = detect_vision(request);

    let char_count = text.chars().count() as f64;
    let divisor = if cjk_fraction(&text) > 0.25 { 2.0 } else { 4.0 };
    let estimated_tokens = (char_count / divisor).ceil() as u32;
    let long_context = estimated_tokens > 30_000;

    let mut complexity = 0.5;
    if has_code {
        complexity += 0.2;
    }
    if has_vision {
        complexity += 0.2;
    }
    if long_context {
        complexity += 0.1;
    }
    if estimated_tokens > 10_000 {
        complexity += 0.1;
    }

    RequestFeatures {
        language,
        has_code,
        has_vision,
        estimated_tokens,
        long_context,
        complexity: complexity.min(1.0),
    }
}

/// Per-model quality tiers, consulted when no feature-specific table
/// applies. Callers supply this from channel configuration; a reasonable
/// gateway default treats unlisted models as tier "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    One,
    Two,
    Three,
    Unknown,
}

impl ModelTier {
    fn quality(self) -> f64 {
        match self {
            ModelTier::One => 0.95,
            ModelTier::Two => 0.75,
            ModelTier::Three => 0.55,
            ModelTier::Unknown => 0.6,
        }
    }
}

/// Quality/cost lookup tables consulted by `calculate_score`. All three
/// maps do substring matching against the model name, so a key like "gpt-4"
/// matches "gpt-4-1106-preview"; the longest matching key wins so a more
/// specific entry (e.g. "gpt-4o-mini") takes priority over a shorter one
/// that also matches (e.g. "gpt-4o").
#[derive(Debug, Clone, Default)]
pub struct ScoringTables {
    pub vietnamese_quality: HashMap<String, f64>,
    pub code_quality: HashMap<String, f64>,
    pub tier: HashMap<String, ModelTier>,
    pub cost_ratio: HashMap<String, f64>,
}

impl ScoringTables {
    /// The gateway's built-in scoring data, covering the model families
    /// offered by the providers in `gateway_core::providers`. Absent a
    /// config-driven override, this is what `calculate_score` consults.
    pub fn gateway_default() -> Self {
        let vietnamese_quality = [
            ("gpt-4o-mini", 0.75),
            ("gpt-4o", 0.95),
            ("claude-3-5-sonnet", 0.95),
            ("claude-3-haiku", 0.6),
            ("gemini-1.5-pro", 0.8),
            ("deepseek-v3", 0.65),
        ];
        let code_quality = [
            ("claude-3-5-sonnet", 0.97),
            ("gpt-4o-mini", 0.72),
            ("gpt-4o", 0.9),
            ("deepseek-v3", 0.88),
            ("gemini-1.5-pro", 0.85),
            ("gpt-3.5", 0.6),
        ];
        let tier = [
            ("gpt-4o-mini", ModelTier::Two),
            ("gpt-4o", ModelTier::One),
            ("gpt-4-turbo", ModelTier::One),
            ("gpt-4", ModelTier::One),
            ("gpt-3.5", ModelTier::Two),
            ("claude-3-5-sonnet", ModelTier::One),
            ("claude-3-opus", ModelTier::One),
            ("claude-3-haiku", ModelTier::Two),
            ("claude-3", ModelTier::Two),
            ("gemini-1.5-pro", ModelTier::One),
            ("gemini-1.5-flash", ModelTier::Two),
            ("deepseek-v3", ModelTier::Two),
            ("deepseek", ModelTier::Two),
            ("llama-3.1-70b", ModelTier::Two),
            ("llama", ModelTier::Three),
            ("mixtral", ModelTier::Three),
        ];
        let cost_ratio = [
            ("gpt-4o-mini", 0.3),
            ("gpt-4o", 1.0),
            ("claude-3-5-sonnet", 1.1),
            ("claude-3-opus", 2.0),
            ("claude-3-haiku", 0.25),
            ("gemini-1.5-pro", 0.9),
            ("gemini-1.5-flash", 0.2),
            ("deepseek-v3", 0.05),
            ("deepseek", 0.08),
            ("gpt-3.5", 0.2),
            ("mixtral", 0.1),
            ("llama", 0.15),
        ];

        Self {
            vietnamese_quality: vietnamese_quality
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            code_quality: code_quality
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            tier: tier.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            cost_ratio: cost_ratio
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

fn lookup_substring(table: &HashMap<String, f64>, model: &str) -> Option<f64> {
    table
        .iter()
        .filter(|(key, _)| model.contains(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, v)| *v)
}

fn lookup_tier(table: &HashMap<String, ModelTier>, model: &str) -> ModelTier {
    table
        .iter()
        .filter(|(key, _)| model.contains(key.as_str()))
        .max_by_key(|(key, _)| key.len())
        .map(|(_, tier)| *tier)
        .unwrap_or(ModelTier::Unknown)
}

/// A scored `(channel, model)` candidate produced during resolution.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub channel_id: i64,
    pub model: String,
    pub score: f64,
}

/// Outcome of resolving a virtual model for a request.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub requested_model: String,
    pub selected_model: String,
    pub channel_id: i64,
    pub score: f64,
    pub reason: String,
}

fn calculate_score(
    channel: &Channel,
    model: &str,
    features: &RequestFeatures,
    strategy: &SelectionStrategy,
    health: &HealthTracker,
    tables: &ScoringTables,
) -> f64 {
    let quality = if features.language == DetectedLanguage::Vietnamese {
        lookup_substring(&tables.vietnamese_quality, model).unwrap_or_else(|| {
            lookup_tier(&tables.tier, model).quality()
        })
    } else if features.has_code {
        lookup_substring(&tables.code_quality, model).unwrap_or_else(|| {
            lookup_tier(&tables.tier, model).quality()
        })
    } else {
        lookup_tier(&tables.tier, model).quality()
    };

    let view = health.snapshot(channel.id);
    let health_score = if view.total == 0 { 0.8 } else { view.score(1.0).min(1.0).max(0.0) };
    let cost_ratio = tables.cost_ratio.get(model).copied().unwrap_or(1.0);
    let cost = 1.0 / (1.0 + cost_ratio);

    let base = quality * strategy.quality + health_score * strategy.speed + cost * strategy.cost;
    base * channel.weight.max(1.0) * (1.0 + channel.priority as f64 * 0.1)
}

/// Resolve a virtual model name to a concrete `(model, channel)` pair.
///
/// Returns `None` when there are no enabled channels serving the caller's
/// group; callers should fall through to the regular channel selector with
/// a safe fallback model in that case.
pub fn resolve_virtual_model(
    virtual_name: &str,
    group: &str,
    features: &RequestFeatures,
    registry: &ChannelRegistry,
    health: &HealthTracker,
    tables: &ScoringTables,
) -> Option<ResolvedModel> {
    let mut strategy = SelectionStrategy::by_name(virtual_name);
    let mut vietnamese_override = false;
    if features.language == DetectedLanguage::Vietnamese {
        strategy = SelectionStrategy::AUTO_VI;
        vietnamese_override = true;
    }

    let channels = registry.channels_for_group(group);
    let mut best: Option<ScoredCandidate> = None;

    for channel in channels.iter().filter(|c| c.is_dispatchable()) {
        for model in &channel.models {
            let score = calculate_score(channel, model, features, &strategy, health, tables);
            let candidate = ScoredCandidate {
                channel_id: channel.id,
                model: model.clone(),
                score,
            };
            best = Some(match best {
                Some(current) if current.score >= candidate.score => current,
                _ => candidate,
            });
        }
    }

    best.map(|candidate| ResolvedModel {
        requested_model: virtual_name.to_string(),
        selected_model: candidate.model,
        channel_id: candidate.channel_id,
        score: candidate.score,
        reason: selection_reason(virtual_name, vietnamese_override),
    })
}

/// Maps the virtual model name (and whether the Vietnamese-language
/// override fired) to a fixed, human-readable selection reason surfaced in
/// the `X-Auto-Selection-Reason` header and the audit log.
fn selection_reason(virtual_name: &str, vietnamese_override: bool) -> String {
    if vietnamese_override {
        return "Selected for Vietnamese-language quality".to_string();
    }
    match virtual_name {
        "auto-cheap" => "Selected for cost efficiency".to_string(),
        "auto-fast" => "Selected for response speed".to_string(),
        "auto-code" => "Selected for code quality".to_string(),
        "auto-smart" => "Selected for highest overall quality".to_string(),
        "auto-vi" => "Selected for Vietnamese-language quality".to_string(),
        _ => "Selected via balanced quality/speed/cost scoring".to_string(),
    }
}
