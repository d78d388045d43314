use bytes::Bytes;
use std::sync::Arc;

use crate::scenario::IterationContext;
use crate::{Error, Result};

pub type PayloadFn = dyn Fn(&IterationContext<'_>) -> Bytes + Send + Sync + 'static;

/// Request body source for each iteration.
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Same bytes for every request.
    Static(Bytes),
    /// Built per iteration.
    Generated(Arc<PayloadFn>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Static(b) => f.debug_tuple("Static").field(&b.len()).finish(),
            Self::Generated(_) => f.write_str("Generated(..)"),
        }
    }
}

impl Payload {
    pub fn generated<F>(f: F) -> Self
    where
        F: Fn(&IterationContext<'_>) -> Bytes + Send + Sync + 'static,
    {
        Self::Generated(Arc::new(f))
    }

    /// A JSON object `{ field: text }`, serialized once.
    pub fn json_text(field: &str, text: &str) -> Result<Self> {
        let mut obj = serde_json::Map::with_capacity(1);
        obj.insert(field.to_string(), serde_json::Value::String(text.to_string()));
        let body = serde_json::to_vec(&serde_json::Value::Object(obj))
            .map_err(|err| Error::InvalidRequest(format!("payload serialization: {err}")))?;
        Ok(Self::Static(Bytes::from(body)))
    }

    pub fn render(&self, ctx: &IterationContext<'_>) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Static(b) => b.clone(),
            Self::Generated(f) => f(ctx),
        }
    }
}

/// Text made of a preamble followed by `lines` repeated until `size` characters, then cut
/// to exactly `size` characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedText {
    pub preamble: String,
    pub lines: Vec<String>,
    pub size: usize,
}

impl RepeatedText {
    pub fn render(&self) -> String {
        let mut text = self.preamble.clone();
        let mut chars = text.chars().count();

        let block: String = self.lines.concat();
        let block_chars = block.chars().count();
        if block_chars > 0 {
            while chars < self.size {
                text.push_str(&block);
                chars += block_chars;
            }
        }

        match text.char_indices().nth(self.size) {
            Some((cut, _)) => {
                text.truncate(cut);
                text
            }
            None => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notes(size: usize) -> RepeatedText {
        RepeatedText {
            preamble: "Team Planning – Q2 Stress Test\n\nKey Decisions:\n".to_string(),
            lines: vec![
                "- Decision: Stress testing long input. ".to_string(),
                "- Action: John to complete task by next Friday. ".to_string(),
            ],
            size,
        }
    }

    #[test]
    fn repeated_text_is_cut_to_size_in_chars() {
        let text = notes(5000).render();
        assert_eq!(text.chars().count(), 5000);
        assert!(text.starts_with("Team Planning – Q2"));
        assert!(text.contains("- Action: John"));
    }

    #[test]
    fn size_smaller_than_preamble_truncates_preamble() {
        assert_eq!(notes(4).render(), "Team");
    }

    #[test]
    fn empty_lines_do_not_loop() {
        let t = RepeatedText {
            preamble: "abc".to_string(),
            lines: vec![String::new()],
            size: 10,
        };
        assert_eq!(t.render(), "abc");
    }

    #[test]
    fn json_text_payload_is_valid_json() -> Result<()> {
        let payload = Payload::json_text("text", &notes(300).render())?;
        let Payload::Static(body) = payload else {
            panic!("expected static payload");
        };
        let v: serde_json::Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(err) => panic!("{err}"),
        };
        assert_eq!(
            v.get("text").and_then(|t| t.as_str()).map(|t| t.chars().count()),
            Some(300)
        );
        Ok(())
    }
}
