use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::{Classifier, ClassifyError, Verdict, VerdictSource};

const ACCEPTED_DOMAINS: [&str; 3] = [".com", ".org", ".net"];

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"))
}

/// Offline email-format check
///
/// Approves text shaped like `local@domain.tld` that also contains one of
/// `.com`, `.org` or `.net` anywhere in it. The substring test is not tied
/// to the domain, so `a@b.io` is rejected while `x.com@b.io` passes.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        HeuristicClassifier
    }

    pub fn evaluate(&self, text: &str) -> Verdict {
        let is_email = email_pattern().is_match(text);
        let has_valid_domain = ACCEPTED_DOMAINS.iter().any(|d| text.contains(d));
        let approved = is_email && has_valid_domain;

        Verdict {
            approved,
            message: if approved {
                "Valid email format".to_string()
            } else {
                "Invalid format or domain".to_string()
            },
            source: VerdictSource::Heuristic,
        }
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn classify(&self, text: &str) -> Result<Verdict, ClassifyError> {
        Ok(self.evaluate(text))
    }
}
