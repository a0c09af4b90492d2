pub fn build_extraction_prompt(document_text: &str) -> String {
    format!(
        r#"Extract structured facts from the following legal document.

INSTRUCTIONS:
1. Identify the parties, important dates, monetary values, defined terms and clauses
2. Output ONLY valid JSON, nothing else
3. Use the exact schema below; use empty lists or null when a field is not present

SCHEMA:
{{
  "document_type": "Lease Agreement|NDA|Policy|...",
  "title": "document title",
  "jurisdiction": "governing jurisdiction",
  "regions": ["EU"],
  "effective_date": "YYYY-MM-DD",
  "summary": "two sentence summary",
  "parties": [{{"name": "ABC Corp", "role": "Lessor", "kind": "company|individual|organization"}}],
  "dates": [{{"value": "YYYY-MM-DD", "date_type": "Effective Date", "context": "quote"}}],
  "monetary_values": [{{"amount": 1500.0, "currency": "USD", "raw": "$1,500", "reason": "Rent", "frequency": "monthly|quarterly|annually|one-time"}}],
  "defined_terms": [{{"term": "Agreement", "definition": "definition text"}}],
  "clauses": [{{"type": "Confidentiality|Termination|GoverningLaw|Indemnification|ForceMajeure|...", "text": "clause text", "duration_years": 5, "notice_period_days": 30, "parties": ["ABC Corp"]}}]
}}

RULES:
- Party names and defined terms must be copied exactly as written
- Dates must be ISO formatted
- Clause text must be a direct quote from the document
- Output ONLY the JSON object, no markdown, no explanations

DOCUMENT:
{}

JSON OUTPUT:"#,
        document_text
    )
}

pub fn build_retry_prompt(invalid_json: &str) -> String {
    format!(
        r#"The following JSON is invalid:

{}

Fix this JSON. Output only valid JSON with no markdown formatting, no code blocks, no explanations. Just the raw JSON object."#,
        invalid_json
    )
}
