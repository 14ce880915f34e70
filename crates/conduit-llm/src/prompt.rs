use serde::Serialize;

/// 3-tier system prompt for Anthropic prompt caching.
///
/// TIER 1 (static): persona constitution + traits — identical for every
///   user, every turn. This is the block the stable-prefix invariant
///   measures. → cache_control: {type: "ephemeral"}, >90% hit rate.
/// TIER 2 (per-user): rendered memory context. → cache_control:
///   {type: "ephemeral"}, hits while the same user keeps talking.
/// TIER 3 (volatile): turn count + local time line. → NO cache, placed
///   last so it never breaks the tier-1/tier-2 prefix.
#[derive(Debug, Clone)]
pub struct SystemPrompt {
    pub static_tier: String,
    pub user_tier: String,
    pub volatile_tier: String,
}

impl SystemPrompt {
    pub fn to_plain_text(&self) -> String {
        let mut out = self.static_tier.clone();
        if !self.user_tier.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.user_tier);
        }
        if !self.volatile_tier.is_empty() {
            out.push_str("\n\n");
            out.push_str(&self.volatile_tier);
        }
        out
    }

    /// Anthropic API format with up to two cache breakpoints.
    pub fn to_anthropic_blocks(&self) -> Vec<serde_json::Value> {
        let mut blocks = Vec::with_capacity(3);

        blocks.push(serde_json::json!({
            "type": "text",
            "text": self.static_tier,
            "cache_control": { "type": "ephemeral" }
        }));

        if !self.user_tier.is_empty() {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": self.user_tier,
                "cache_control": { "type": "ephemeral" }
            }));
        }

        if !self.volatile_tier.is_empty() {
            blocks.push(serde_json::json!({
                "type": "text",
                "text": self.volatile_tier,
            }));
        }

        blocks
    }
}

/// Volatile per-turn metadata injected into Tier 3.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub turn_count: u32,
    pub local_time_line: String,
}

/// Assembles a [`SystemPrompt`] from a persona's constitution/traits and a
/// per-user memory block. Persona loading itself lives in `conduit-core`;
/// this builder only arranges the result into cache-stable tiers.
pub struct PromptBuilder {
    static_tier: String,
}

impl PromptBuilder {
    /// `constitution` and `traits` are concatenated into the static tier —
    /// this is the text whose token count must clear the stable-prefix
    /// floor checked at startup.
    pub fn new(constitution: &str, traits: &str) -> Self {
        Self {
            static_tier: format!("{constitution}\n\n{traits}"),
        }
    }

    pub fn build(&self, user_context: Option<&str>, session: Option<&SessionInfo>) -> SystemPrompt {
        let user_tier = user_context.unwrap_or("").to_string();
        let volatile_tier = match session {
            Some(info) => format!(
                "[Turn {} | {}]",
                info.turn_count, info.local_time_line
            ),
            None => String::new(),
        };

        SystemPrompt {
            static_tier: self.static_tier.clone(),
            user_tier,
            volatile_tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_joins_non_empty_tiers() {
        let builder = PromptBuilder::new("be helpful", "warm, concise");
        let prompt = builder.build(Some("likes coffee"), None);
        let text = prompt.to_plain_text();
        assert!(text.contains("be helpful"));
        assert!(text.contains("likes coffee"));
    }

    #[test]
    fn anthropic_blocks_mark_first_two_tiers_cacheable() {
        let builder = PromptBuilder::new("be helpful", "warm");
        let session = SessionInfo { turn_count: 3, local_time_line: "Tue 14:00".to_string() };
        let prompt = builder.build(Some("likes coffee"), Some(&session));
        let blocks = prompt.to_anthropic_blocks();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].get("cache_control").is_some());
        assert!(blocks[1].get("cache_control").is_some());
        assert!(blocks[2].get("cache_control").is_none());
    }
}
