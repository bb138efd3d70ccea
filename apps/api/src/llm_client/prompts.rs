// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction that keeps assessments grounded in the supplied resume.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Base every highlight and concern on facts present in the candidate profile. \
    Do NOT infer, interpolate, or invent experience, employers, or skills. \
    If the profile does not mention something, treat it as unknown rather than absent.";
