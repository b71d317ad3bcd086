//! Prompt builder: assembles the fixed request the LLM collaborator must
//! satisfy. The schema text comes verbatim from the registry's `render()`
//! and the question is included untouched; the rules block pins the reply
//! to a single JSON object with exactly the six expected fields.

/// Build the full prompt for one question against the given schema text.
pub fn build_prompt(schema_text: &str, question: &str) -> String {
    format!(
        r#"You are a senior data engineer.

Database schema:
{schema_text}

User question:
{question}

Return JSON:

{{
  "sql": "",
  "python": "",
  "pyspark": "",
  "explanation": "",
  "warning": "",
  "is_modification": false
}}

RULES:

SQL:
- Compact
- Clean formatting
- No unnecessary aliases
- Prefer readable joins

Python:
- Use pandas
- Table names = dataframe variables
Example:
city = uploaded_tables["city"]

PySpark:
- Use spark dataframe names same as tables
Example:
city = spark.table("city")

Modification:
If INSERT/UPDATE/DELETE:
- still generate
- set is_modification=true
- include warning

Return ONLY JSON.
"#
    )
}
