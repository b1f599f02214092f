use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)(token|secret|password|pwd|private_key)\s*[:=]\s*["']?([^\s"';&]{4,})["']?"#)
            .expect("valid regex"),
        Regex::new(r"(?i)\b(bearer)\s+([A-Za-z0-9_\-\.=]{8,})").expect("valid regex"),
    ]
});

/// Scrubs credentials out of driver messages before they reach logs or widgets.
#[derive(Debug, Default, Clone)]
pub struct Redactor {
    known_secrets: Vec<String>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Masks this literal wherever it appears, whatever the surrounding text.
    pub fn with_secret(mut self, secret: &str) -> Self {
        if secret.len() >= 4 && !self.known_secrets.iter().any(|known| known == secret) {
            self.known_secrets.push(secret.to_string());
        }
        self
    }

    pub fn redact(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }

        let mut result = input.to_string();
        for secret in &self.known_secrets {
            result = result.replace(secret.as_str(), "[REDACTED]");
        }

        for pattern in SECRET_PATTERNS.iter() {
            if !pattern.is_match(&result) {
                continue;
            }
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let key = caps
                        .get(1)
                        .map(|m| m.as_str())
                        .unwrap_or("secret")
                        .to_ascii_lowercase();
                    if key == "bearer" {
                        "bearer [REDACTED]".to_string()
                    } else {
                        format!("{}=[REDACTED]", key)
                    }
                })
                .to_string();
        }

        result
    }
}
