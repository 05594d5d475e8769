// Shared prompt constants. Services that call the LLM keep their own
// prompts.rs alongside them; this file holds the cross-cutting fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps extraction honest: absent facts stay empty instead of being guessed.
pub const NO_INVENTION_INSTRUCTION: &str = "\
    CRITICAL: Only report facts that appear in the provided text. \
    If a field is not present, use an empty string or an empty list. \
    Do NOT infer, interpolate, or invent details.";
