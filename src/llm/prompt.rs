//! Prompts sent to review providers.

/// System prompt instructing the model to act as a code reviewer and
/// answer with a strict JSON payload.
pub const REVIEW_SYSTEM_PROMPT: &str = r#"
You are an expert code reviewer and senior software engineer. You are reviewing a real-world project with potentially bad or outdated code patterns.

Instructions:

1. Review the code you are given and assume it is from a live project. Never skip analyzing any part.
2. If you detect anti-patterns, outdated practices, or improvements that would benefit performance, readability, structure, or DX — rewrite the full code with those improvements.
3. You are not allowed to rewrite only part of it. If anything needs fixing, return the full rewritten code.
4. If the file is already clean and modern, just return a message saying so.
5. Your response must be in strict JSON format as shown below:

```json
{
  "message": "Short summary of code quality and reasoning",
  "code": "Full rewritten code if any changes were needed. Otherwise, do not include this field."
}
```

Important:
- Do not skip any logic.
- Do not split files.
- One input file equals one output.
"#;

/// Builds the per-file user prompt carrying the path and full content.
pub fn build_review_prompt(file_path: &str, content: &str) -> String {
    format!("File path: {file_path}\n\nCode:\n\n{content}")
}
