//! Ties every stage together into the single entry point a transport
//! layer calls per request (spec.md §5 control flow): Parser -> Validator
//! -> Signature -> Rate/DoS Shaper -> Behavior Analyzer -> Correlation
//! Engine -> Decision Arbiter, with short-circuiting deny at any stage and
//! an audit record written for every terminal decision.

use crate::arbiter::{arbitrate, verdict_for_error, ArbiterInput};
use crate::audit::Severity;
use crate::behavior::{self, BehaviorConfig};
use crate::context::Context;
use crate::correlation::{self, CorrelationConfig};
use crate::error::CoreError;
use crate::parser::{self, ParserLimits};
use crate::registry::{BehaviorFlags, CorrelationEvent, HistoryEntry};
use crate::request::{ReasonCode, Request, Verdict};
use crate::shaper::{self, ShaperConfig};
use crate::validator::{self, ValidatorConfig};

pub struct Pipeline<'a> {
    ctx: &'a Context,
    parser_limits: ParserLimits,
    validator_config: ValidatorConfig,
    shaper_config: ShaperConfig,
    behavior_config: BehaviorConfig,
    correlation_config: CorrelationConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(ctx: &'a Context) -> Pipeline<'a> {
        let config = &ctx.config;
        Pipeline {
            ctx,
            parser_limits: ParserLimits::from_config(config),
            validator_config: ValidatorConfig::from_config(config),
            shaper_config: ShaperConfig {
                window_ms: config.rate_limit_window_seconds * 1000,
                window_cap: config.rate_limit_requests,
                burst_window_ms: config.burst_window_seconds * 1000,
                burst_cap: config.burst_limit,
                ban_duration_ms: config.ban_duration_seconds as u64 * 1000,
                ban_threshold: config.ban_threshold,
            },
            behavior_config: BehaviorConfig::default(),
            correlation_config: CorrelationConfig::default(),
        }
    }

    /// Process one raw request buffer for `identity` (the client's address
    /// or whatever the transport layer uses to key the registry). Returns
    /// the final `Verdict` and, on a successful parse, the parsed request
    /// (so the caller can actually serve it on allow).
    pub fn process(&self, identity: &str, raw: &[u8], now_ms: u64) -> (Verdict, Option<Request>) {
        let parsed = parser::parse_request(raw, &self.parser_limits, now_ms);

        let mut request = match parsed {
            Ok((request, _consumed)) => request,
            Err(error) => {
                self.note_arrival(identity, now_ms, None, error.is_attack());
                let verdict = verdict_for_error(&error, self.ctx.config.security_level);
                self.audit(identity, now_ms, &verdict, &error);
                return (verdict, None);
            }
        };

        if let Err(error) = validator::validate(&mut request, &self.validator_config) {
            self.note_arrival(identity, now_ms, Some(&request), error.is_attack());
            let verdict = verdict_for_error(&error, self.ctx.config.security_level);
            self.audit(identity, now_ms, &verdict, &error);
            return (verdict, None);
        }

        if let Some(hit) = self.ctx.signatures.scan(&request) {
            let error = CoreError::SignatureHit {
                category: hit.category,
                rule_id: hit.rule_id,
                confidence: hit.confidence,
            };
            self.note_arrival(identity, now_ms, Some(&request), error.is_attack());
            let verdict = verdict_for_error(&error, self.ctx.config.security_level);
            self.audit(identity, now_ms, &verdict, &error);
            return (verdict, None);
        }

        let shaper_result = self
            .ctx
            .registry
            .with_client(identity, now_ms, |record| {
                record.record_arrival(now_ms);
                shaper::apply(record, &self.shaper_config, now_ms)
            })
            .unwrap_or(Err(CoreError::CapacityExhausted));

        match shaper_result {
            Ok(_outcome) => {}
            Err(error) => {
                self.push_history(identity, now_ms, &request, 429, true, error.is_attack());
                let verdict = verdict_for_error(&error, self.ctx.config.security_level);
                self.audit(identity, now_ms, &verdict, &error);
                return (verdict, None);
            }
        };

        self.push_history(identity, now_ms, &request, 200, false, false);

        let behavior_result = if self.ctx.config.behavior_analysis_enabled {
            self.ctx.registry.with_client(identity, now_ms, |record| {
                let result = behavior::analyze(record, &self.behavior_config, now_ms);
                (result.classification, result.confidence)
            }).ok()
        } else {
            None
        };

        let correlation_result = if self.ctx.config.correlation_enabled {
            self.ctx
                .registry
                .peek(identity, |record| correlation::correlate(record, &self.correlation_config, now_ms))
                .flatten()
        } else {
            None
        };

        let flags = self.ctx.registry.peek(identity, |record| record.flags).unwrap_or(BehaviorFlags::empty());

        let input = ArbiterInput {
            behavior: behavior_result.map(|(c, s)| (c, s)),
            correlation: correlation_result,
            flags,
        };
        let verdict = arbitrate(&input, self.ctx.config.security_level);

        if verdict.allow {
            self.ctx.audit.record(now_ms, "allow", Severity::Info, identity, &request_target(&request), "request admitted");
            (verdict, Some(request))
        } else {
            self.ctx.audit.record(
                now_ms,
                "deny",
                Severity::High,
                identity,
                &request_target(&request),
                &format!("{:?}", verdict.reason),
            );
            (verdict, None)
        }
    }

    fn note_arrival(&self, identity: &str, now_ms: u64, request: Option<&Request>, attack: bool) {
        let path = request
            .and_then(|r| r.target.normalized_path.clone().or_else(|| Some(r.target.raw_path.clone())))
            .unwrap_or_default();
        let _ = self.ctx.registry.with_client(identity, now_ms, |record| {
            record.record_arrival(now_ms);
            record.error_count += 1;
            if attack {
                record.attack_count += 1;
            }
            record.flags.insert(BehaviorFlags::SUSPICIOUS);
            record.push_correlation_event(CorrelationEvent {
                path,
                status: 400,
                timestamp_ms: now_ms,
                malformed: true,
                flags: record.flags,
            });
        });
    }

    fn push_history(&self, identity: &str, now_ms: u64, request: &Request, status: u16, malformed: bool, attack: bool) {
        let path = request
            .target
            .normalized_path
            .clone()
            .unwrap_or_else(|| request.target.raw_path.clone());
        let size = request.body.len();
        let method = request.method;
        let obfuscated = request_uses_encoding_obfuscation(request);
        let _ = self.ctx.registry.with_client(identity, now_ms, |record| {
            if malformed {
                record.error_count += 1;
            }
            if attack {
                record.attack_count += 1;
            }
            if obfuscated {
                record.flags.insert(BehaviorFlags::OBFUSCATED);
            }
            record.push_history(HistoryEntry {
                method,
                path: path.clone(),
                size,
                status,
                timestamp_ms: now_ms,
                malformed,
            });
            record.push_correlation_event(CorrelationEvent {
                path,
                status,
                timestamp_ms: now_ms,
                malformed,
                flags: record.flags,
            });
        });
    }

    fn audit(&self, identity: &str, now_ms: u64, verdict: &Verdict, error: &CoreError) {
        self.ctx.audit.record(
            now_ms,
            "deny",
            error.severity(),
            identity,
            &format!("{:?}", verdict.reason),
            &error.to_string(),
        );
    }
}

fn request_target(request: &Request) -> String {
    request
        .target
        .normalized_path
        .clone()
        .unwrap_or_else(|| request.target.raw_path.clone())
}

/// A request "hides" its real target behind percent-encoding when
/// decoding actually changes the path or query — the classic way a
/// payload evades naive substring matching before the Signature Engine
/// decodes it (§4.4's motivation for decoding before scanning). Only
/// meaningful once `validate` has run, so this is always called after a
/// successful `validator::validate`.
fn request_uses_encoding_obfuscation(request: &Request) -> bool {
    let path_changed = request
        .target
        .decoded_path
        .as_deref()
        .map(|decoded| decoded != request.target.raw_path)
        .unwrap_or(false);
    let query_changed = match (&request.target.query, &request.target.decoded_query) {
        (Some(raw), Some(decoded)) => decoded != raw,
        _ => false,
    };
    path_changed || query_changed
}
