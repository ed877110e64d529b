//! 法理图谱的结构化响应格式与 Prompt

use serde::Deserialize;

use crate::graph::NodeMetadata;

use super::DoctrineError;

pub const DOCTRINE_SYSTEM: &str = "You are a legal research assistant. You map a legal doctrine \
to its governing rule, its elements, and the leading cases that shaped it. Respond with JSON only.";

pub fn analysis_prompt(topic: &str, min_cases: usize, max_cases: usize) -> String {
    format!(
        r#"Doctrine: {topic}

Return a JSON object:
{{"rule": "the rule statement", "elements": ["element 1", "element 2"],
  "cases": [{{"name": "case name", "citation": "reporter citation", "year": 1990, "summary": "facts and reasoning", "holding": "the holding"}}]}}

Include between {min_cases} and {max_cases} leading cases, oldest first."#
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct DoctrinalMap {
    pub rule: String,
    #[serde(default)]
    pub elements: Vec<String>,
    pub cases: Vec<CaseRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaseRecord {
    pub name: String,
    #[serde(default)]
    pub citation: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    pub summary: String,
    #[serde(default)]
    pub holding: Option<String>,
}

impl DoctrinalMap {
    pub(super) fn validate(&self, min_cases: usize, max_cases: usize) -> Result<(), DoctrineError> {
        if self.rule.trim().is_empty() {
            return Err(DoctrineError::InvalidShape("empty rule statement".to_string()));
        }
        let n = self.cases.len();
        if n < min_cases || n > max_cases {
            return Err(DoctrineError::InvalidShape(format!(
                "expected {min_cases}-{max_cases} cases, got {n}"
            )));
        }
        if let Some(case) = self.cases.iter().find(|c| c.name.trim().is_empty()) {
            return Err(DoctrineError::InvalidShape(format!(
                "case without a name: {}",
                case.summary
            )));
        }
        Ok(())
    }

    /// Nexus 正文：规则 + 要件列表
    pub fn nexus_content(&self) -> String {
        let mut out = format!("**Rule.** {}\n", self.rule.trim());
        if !self.elements.is_empty() {
            out.push_str("\n**Elements**\n");
            for (i, e) in self.elements.iter().enumerate() {
                out.push_str(&format!("{}. {}\n", i + 1, e.trim()));
            }
        }
        out
    }
}

impl CaseRecord {
    pub fn render(&self) -> String {
        let mut head = format!("**{}**", self.name.trim());
        match (&self.citation, self.year) {
            (Some(c), Some(y)) => head.push_str(&format!(" ({c}, {y})")),
            (Some(c), None) => head.push_str(&format!(" ({c})")),
            (None, Some(y)) => head.push_str(&format!(" ({y})")),
            (None, None) => {}
        }
        let mut out = format!("{head}\n\n{}", self.summary.trim());
        if let Some(h) = &self.holding {
            out.push_str(&format!("\n\n**Holding.** {}", h.trim()));
        }
        out
    }

    pub fn metadata(&self) -> NodeMetadata {
        let mut meta = NodeMetadata::default();
        if let Some(c) = &self.citation {
            meta.extra.insert("citation".to_string(), serde_json::Value::from(c.clone()));
        }
        if let Some(y) = self.year {
            meta.extra.insert("year".to_string(), serde_json::Value::from(y));
        }
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(name: &str) -> CaseRecord {
        CaseRecord {
            name: name.to_string(),
            citation: Some("[1932] AC 562".to_string()),
            year: Some(1932),
            summary: "snail in a bottle".to_string(),
            holding: Some("duty to neighbours".to_string()),
        }
    }

    #[test]
    fn test_render_case() {
        let text = case("Donoghue v Stevenson").render();
        assert!(text.starts_with("**Donoghue v Stevenson** ([1932] AC 562, 1932)"));
        assert!(text.contains("**Holding.** duty to neighbours"));
        assert_eq!(case("x").metadata().extra["year"], 1932);
    }

    #[test]
    fn test_validate_bounds() {
        let map = DoctrinalMap {
            rule: "r".to_string(),
            elements: vec![],
            cases: (0..9).map(|i| case(&i.to_string())).collect(),
        };
        assert!(map.validate(5, 8).is_err());
        assert!(map.validate(5, 9).is_ok());
    }
}
