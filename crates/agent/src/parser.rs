//! Default output parser: one JSON object, optionally fenced or wrapped in prose.

use ironloop_core::{OutputParser, ParsedOutput};
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonOutputParser;

impl OutputParser for JsonOutputParser {
    fn parse(&self, text: &str) -> Option<ParsedOutput> {
        let start = text.find('{')?;
        let end = text.rfind('}')?;
        if end < start {
            return None;
        }

        match serde_json::from_str::<ParsedOutput>(&text[start..=end]) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(error = %e, "Model output is not a valid reply object");
                None
            }
        }
    }
}
