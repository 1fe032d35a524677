//! Classification of the evaluator's free-text verdict.
//!
//! The evaluator is an external text generator and cannot be trusted to
//! follow its output format. Parsing is therefore total: any response that
//! carries none of the expected markers degrades to [`EvaluationOutcome::Continue`]
//! instead of raising an error, so the session never stalls on malformed
//! evaluator output.

/// The structured outcome of one evaluated turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    /// The turn satisfied every success criterion.
    Success { reason: String },
    /// The evaluator was unsure and offered guidance.
    Hint { reason: String },
    /// The turn did not satisfy the criteria.
    Continue { reason: String },
}

/// Markers scanned for, in fixed priority order. When a response contains
/// more than one marker the first entry here wins; the tie-break is
/// implementation-defined, not a business rule.
const MARKERS: [(&str, Kind); 3] = [
    ("SUCCESS", Kind::Success),
    ("HINT", Kind::Hint),
    ("CONTINUE", Kind::Continue),
];

#[derive(Clone, Copy)]
enum Kind {
    Success,
    Hint,
    Continue,
}

impl EvaluationOutcome {
    /// Classifies a raw evaluator response.
    ///
    /// Markers are matched case-insensitively; the remainder of the text
    /// after the marker (and any `:`/decoration run) becomes the reason.
    pub fn parse(raw: &str) -> Self {
        // ASCII-only uppercasing keeps byte offsets valid for slicing `raw`.
        let upper = raw.to_ascii_uppercase();
        for (marker, kind) in MARKERS {
            if let Some(pos) = upper.find(marker) {
                let reason = trim_reason(&raw[pos + marker.len()..]);
                return match kind {
                    Kind::Success => Self::Success { reason },
                    Kind::Hint => Self::Hint { reason },
                    Kind::Continue => Self::Continue { reason },
                };
            }
        }
        Self::Continue {
            reason: format!("Let's keep trying. {}", raw.trim()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Success { reason } | Self::Hint { reason } | Self::Continue { reason } => reason,
        }
    }
}

/// Strips the separator run that evaluators place between the marker and the
/// reason: colons, whitespace, and the marker decorations they were asked for.
fn trim_reason(rest: &str) -> String {
    rest.trim_start_matches(|c: char| {
        c == ':' || c == '✅' || c == '❌' || c == '💡' || c.is_whitespace()
    })
    .trim()
    .to_string()
}
