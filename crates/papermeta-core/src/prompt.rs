//! Prompt template for bibliographic extraction.

/// Instructions sent ahead of the paper text.
pub const EXTRACTION_INSTRUCTIONS: &str = "\
You are a research paper metadata extractor. Given text from the first few pages of a paper, extract the following information:
- Title
- Authors (as a list)
- Year
- Journal/Conference
- DOI (if available)
- Keywords (if available)
- Abstract (the full abstract text if found)

If any field is unreadable or not found, return \"unknown\" for that field.

Return ONLY a raw JSON object with these exact field names: title, authors, year, journal, doi, keywords, abstract. Do not include any other text or markdown formatting.";

/// Build the full prompt for one document.
pub fn build_prompt(text: &str) -> String {
    format!(
        "{}\n\nExtract bibliographic information from this text:\n\n{}",
        EXTRACTION_INSTRUCTIONS,
        text.trim()
    )
}
