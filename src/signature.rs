//! Signature Engine (spec.md §4.4).
//!
//! Rules are grouped by category and evaluated cheapest-first: exact
//! substring probes via Boyer–Moore–Horspool, then regex patterns. The
//! ruleset is immutable after load, so no synchronization is needed to
//! share it across threads (spec.md §5).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::request::{AttackCategory, Request};

/// A compiled signature matcher: either a sublinear exact-substring probe
/// or a regular expression, matching spec.md §4.4's evaluation order.
enum Matcher {
    Substring(BoyerMooreHorspool),
    Regex(Regex),
}

/// An immutable compiled rule (spec.md §3 data model).
pub struct Rule {
    pub rule_id: u32,
    pub category: AttackCategory,
    pub base_confidence: f64,
    pub weight: f64,
    matcher: Matcher,
    hit_counter: std::sync::atomic::AtomicU64,
}

impl Rule {
    pub fn substring(rule_id: u32, category: AttackCategory, base_confidence: f64, weight: f64, pattern: &str) -> Rule {
        Rule {
            rule_id,
            category,
            base_confidence,
            weight,
            matcher: Matcher::Substring(BoyerMooreHorspool::new(pattern.as_bytes())),
            hit_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn regex(rule_id: u32, category: AttackCategory, base_confidence: f64, weight: f64, pattern: &str) -> Rule {
        Rule {
            rule_id,
            category,
            base_confidence,
            weight,
            matcher: Matcher::Regex(Regex::new(pattern).expect("rule pattern must compile")),
            hit_counter: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn matches(&self, haystack: &str) -> Option<(usize, usize)> {
        match &self.matcher {
            Matcher::Substring(bmh) => bmh.find(haystack.as_bytes()).map(|pos| (pos, pos + bmh.pattern_len())),
            Matcher::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_counter.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Span of the matched text within the field that was scanned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuleHit {
    pub category: AttackCategory,
    pub confidence: f64,
    pub rule_id: u32,
    pub span: Span,
}

/// Boyer–Moore–Horspool substring search: a sublinear algorithm for the
/// exact-match rule class (spec.md §4.4 requirement).
struct BoyerMooreHorspool {
    pattern: Vec<u8>,
    shift: [usize; 256],
}

impl BoyerMooreHorspool {
    fn new(pattern: &[u8]) -> BoyerMooreHorspool {
        let mut shift = [pattern.len().max(1); 256];
        if !pattern.is_empty() {
            for (i, &b) in pattern[..pattern.len() - 1].iter().enumerate() {
                shift[b as usize] = pattern.len() - 1 - i;
            }
        }
        BoyerMooreHorspool {
            pattern: pattern.to_vec(),
            shift,
        }
    }

    fn pattern_len(&self) -> usize {
        self.pattern.len()
    }

    fn find(&self, haystack: &[u8]) -> Option<usize> {
        let m = self.pattern.len();
        let n = haystack.len();
        if m == 0 || m > n {
            return None;
        }
        let mut pos = 0;
        while pos <= n - m {
            let mut j = m - 1;
            while haystack[pos + j] == self.pattern[j] {
                if j == 0 {
                    return Some(pos);
                }
                j -= 1;
            }
            let last = haystack[pos + m - 1];
            pos += self.shift[last as usize];
        }
        None
    }
}

/// Evaluation order: cheapest high-confidence exact probes before regex
/// (spec.md §4.4). Ties are broken by higher base-confidence, then lower
/// `rule_id` for determinism.
pub struct SignatureEngine {
    rules: Vec<Rule>,
}

impl SignatureEngine {
    pub fn new(rules: Vec<Rule>) -> SignatureEngine {
        let mut rules = rules;
        rules.sort_by(|a, b| {
            let a_cheap = matches!(a.matcher, Matcher::Substring(_));
            let b_cheap = matches!(b.matcher, Matcher::Substring(_));
            b_cheap
                .cmp(&a_cheap)
                .then(b.base_confidence.partial_cmp(&a.base_confidence).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.rule_id.cmp(&b.rule_id))
        });
        SignatureEngine { rules }
    }

    /// The default ruleset, covering the categories named in spec.md §4.4.
    /// Grounded in the attack categories enumerated by the original C
    /// server's `advanced_security.h`/`intrusion_detector.h`.
    pub fn default_ruleset() -> SignatureEngine {
        let rules = vec![
            Rule::substring(1, AttackCategory::SqlInjection, 0.9, 1.0, "' OR '1'='1"),
            Rule::substring(2, AttackCategory::SqlInjection, 0.8, 1.0, "UNION SELECT"),
            Rule::regex(
                3,
                AttackCategory::SqlInjection,
                0.75,
                1.0,
                r"(?i)(\bor\b|\band\b)\s+['\d]+\s*=\s*['\d]+",
            ),
            Rule::regex(4, AttackCategory::SqlInjection, 0.7, 1.0, r"(?i)(select|insert|update|delete|drop)\s+.*\bfrom\b"),
            Rule::substring(10, AttackCategory::Xss, 0.85, 1.0, "<script"),
            Rule::substring(11, AttackCategory::Xss, 0.8, 1.0, "javascript:"),
            Rule::regex(12, AttackCategory::Xss, 0.7, 1.0, r"(?i)on(error|load|click|mouseover)\s*="),
            Rule::substring(20, AttackCategory::PathTraversal, 0.9, 1.0, "../"),
            Rule::substring(21, AttackCategory::PathTraversal, 0.9, 1.0, "..\\"),
            Rule::substring(22, AttackCategory::PathTraversal, 0.85, 1.0, "%2e%2e%2f"),
            Rule::substring(30, AttackCategory::CommandInjection, 0.85, 1.0, ";cat "),
            Rule::substring(31, AttackCategory::CommandInjection, 0.8, 1.0, "|nc "),
            Rule::regex(32, AttackCategory::CommandInjection, 0.75, 1.0, r"(?i)(\$\(|`).*`?"),
            Rule::substring(40, AttackCategory::ProtocolAbuse, 0.6, 1.0, "\r\nTransfer-Encoding"),
            Rule::substring(50, AttackCategory::Scan, 0.4, 0.5, "nikto"),
            Rule::substring(51, AttackCategory::Scan, 0.4, 0.5, "sqlmap"),
            Rule::substring(60, AttackCategory::Recon, 0.5, 0.5, "/.git/"),
            Rule::substring(61, AttackCategory::Recon, 0.5, 0.5, "/.env"),
            Rule::substring(62, AttackCategory::Recon, 0.5, 0.5, "/wp-admin"),
        ];
        SignatureEngine::new(rules)
    }

    /// Scan the URI, each header value, and the body, in that order. The
    /// first confirmed hit determines the category (spec.md §4.4); ties
    /// are resolved by rule ordering, already applied at construction.
    pub fn scan(&self, request: &Request) -> Option<RuleHit> {
        let path = request
            .target
            .decoded_path
            .as_deref()
            .unwrap_or(&request.target.raw_path);
        let uri = match request.target.decoded_query.as_deref().or(request.target.query.as_deref()) {
            Some(q) => format!("{}?{}", path, q),
            None => path.to_string(),
        };

        if let Some(hit) = self.scan_field(&uri) {
            return Some(hit);
        }
        for header in &request.headers {
            if let Some(hit) = self.scan_field(&header.value) {
                return Some(hit);
            }
        }
        if let Ok(body_text) = std::str::from_utf8(&request.body) {
            if let Some(hit) = self.scan_field(body_text) {
                return Some(hit);
            }
        }
        None
    }

    fn scan_field(&self, field: &str) -> Option<RuleHit> {
        for rule in &self.rules {
            if let Some((start, end)) = rule.matches(field) {
                rule.hit_counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Some(RuleHit {
                    category: rule.category,
                    confidence: rule.base_confidence * rule.weight,
                    rule_id: rule.rule_id,
                    span: Span { start, end },
                });
            }
        }
        None
    }
}
