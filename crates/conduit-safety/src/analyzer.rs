use regex::Regex;

use conduit_core::types::{Recommendation, SafetyReport};

use crate::error::Result;

/// Per-hit contribution to `risk_score`, shared by the keyword, regex, and
/// emoji-density stages.
const HIT_WEIGHT: f64 = 0.2;

/// One forbidden-token family: a canonical lemma used in the `KEYWORD:<lemma>`
/// flag, and the set of normalized phrasings that count as a hit.
struct KeywordFamily {
    lemma: &'static str,
    variants: &'static [&'static str],
}

/// Romantic escalation, AI self-disclosure, personal-info solicitation, and
/// meet-up solicitation phrasings. A representative subset, not an
/// exhaustive list — new variants get added here as reviewers see them slip
/// through.
const KEYWORD_FAMILIES: &[KeywordFamily] = &[
    KeywordFamily {
        lemma: "loveyou",
        variants: &[
            "i love you",
            "i luv u",
            "love you",
            "luv u",
            "luv you",
            "i am in love with you",
            "im in love with you",
            "falling in love with you",
        ],
    },
    KeywordFamily {
        lemma: "missyou",
        variants: &["i miss you", "miss u", "miss you so much"],
    },
    KeywordFamily {
        lemma: "relationship_ask",
        variants: &["be my girlfriend", "be my boyfriend", "will you be my gf", "will you be my bf"],
    },
    KeywordFamily {
        lemma: "soulmate",
        variants: &["you are my soulmate", "youre my soulmate"],
    },
    KeywordFamily {
        lemma: "marryme",
        variants: &["marry me", "will you marry me"],
    },
    KeywordFamily {
        lemma: "ai_query",
        variants: &["are you an ai", "are you a bot", "are you real", "are you human"],
    },
    KeywordFamily {
        lemma: "ai_admit",
        variants: &[
            "as an ai",
            "i am an ai",
            "im an ai",
            "i am a language model",
            "im a language model",
            "i am a bot",
            "im a bot",
        ],
    },
    KeywordFamily {
        lemma: "realname",
        variants: &["what is your real name", "your real name is"],
    },
    KeywordFamily {
        lemma: "phonenumber",
        variants: &["what is your phone number", "give me your number", "send me your number"],
    },
    KeywordFamily {
        lemma: "homeaddress",
        variants: &["what is your address", "send me your address", "can i get your address"],
    },
    KeywordFamily {
        lemma: "socialhandle",
        variants: &["what is your instagram", "add me on snapchat", "follow me on instagram", "what is your snap"],
    },
    KeywordFamily {
        lemma: "meetup",
        variants: &["lets meet up", "can we meet in person", "meet me at", "come over to my place", "lets hang out irl"],
    },
    KeywordFamily {
        lemma: "pickup",
        variants: &["where should i pick you up", "ill pick you up"],
    },
];

/// Regex pattern families, each with a short id used in the `PATTERN:<id>`
/// flag. Matched against normalized text so punctuation/casing/leet don't
/// dodge them.
const PATTERN_FAMILIES: &[(&str, &str)] = &[
    ("address", r"\bwhere\s+(do|are)\s+(you|u)\s+(live|stay|from)\b"),
    ("photo_request", r"\bsend\s+(me\s+)?(a\s+)?(pic|photo|selfie)\b"),
    ("ai_disclosure", r"\bas an ai\b"),
    ("meetup", r"\b(meet\s+up|meet\s+in\s+person|hang\s+out\s+irl)\b"),
    ("phone_number", r"\bwhat\s+is\s+your\s+(phone\s+)?number\b"),
];

/// Heavy black heart (U+2764) and the contiguous U+1F493-U+1F49F block
/// (beating/two/sparkling/growing/arrow/colored hearts, heart-with-ribbon,
/// revolving hearts, heart decoration), plus the stragglers outside that
/// block.
const HEART_EMOJI_PATTERN: &str = r"[\u{2764}\u{1F493}-\u{1F49F}\u{1F5A4}\u{1F9E1}\u{1F90D}\u{1F90E}]";
const HEART_DENSITY_THRESHOLD: usize = 4;

/// Deterministic, side-effect-free scoring pipeline: normalize → keyword
/// match → regex match → emoji density → aggregate score. Each stage is
/// pure and contributes independently to `risk_score`, so the pipeline is
/// cheap to run on every outbound draft and never calls a model (a model
/// failure must never block the analyzer from running).
pub struct SafetyAnalyzer {
    keyword_families: Vec<(&'static str, Vec<String>)>,
    pattern_families: Vec<(&'static str, Regex)>,
    heart_emoji: Regex,
}

impl SafetyAnalyzer {
    pub fn new() -> Result<Self> {
        let keyword_families = KEYWORD_FAMILIES
            .iter()
            .map(|f| (f.lemma, f.variants.iter().map(|v| normalize(v)).collect()))
            .collect();

        let mut pattern_families = Vec::with_capacity(PATTERN_FAMILIES.len());
        for (id, pattern) in PATTERN_FAMILIES {
            pattern_families.push((*id, Regex::new(pattern)?));
        }

        Ok(Self {
            keyword_families,
            pattern_families,
            heart_emoji: Regex::new(HEART_EMOJI_PATTERN)?,
        })
    }

    /// Score `text` (a candidate outbound message, post-refinement) and
    /// produce a report. Recommendation follows hit count, not the
    /// (capped) score: 0 hits approves, 1-2 send to review, 3+ flags.
    pub fn analyze(&self, text: &str) -> SafetyReport {
        let normalized = normalize(text);
        let mut flags = Vec::new();

        for (lemma, variants) in &self.keyword_families {
            if variants.iter().any(|v| normalized.contains(v.as_str())) {
                flags.push(format!("KEYWORD:{lemma}"));
            }
        }

        for (id, re) in &self.pattern_families {
            if re.is_match(&normalized) {
                flags.push(format!("PATTERN:{id}"));
            }
        }

        if self.heart_emoji.find_iter(text).count() >= HEART_DENSITY_THRESHOLD {
            flags.push("EMOJI:romantic_density".to_string());
        }

        let risk_score = (HIT_WEIGHT * flags.len() as f64).min(1.0);
        let recommendation = match flags.len() {
            0 => Recommendation::Approve,
            1 | 2 => Recommendation::Review,
            _ => Recommendation::Flag,
        };

        SafetyReport { risk_score, flags, recommendation }
    }
}

impl Default for SafetyAnalyzer {
    fn default() -> Self {
        Self::new().expect("built-in detection patterns must compile")
    }
}

/// Casefold, strip common Latin diacritics, map leet substitutions, and
/// collapse non-alphanumeric runs to single spaces so punctuation, spacing,
/// and simple obfuscation can't dodge a keyword or pattern match.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let lower = ch.to_lowercase().next().unwrap_or(ch);
        let deaccented = strip_diacritic(lower);
        let unleeted = unleet(deaccented);
        if unleeted.is_alphanumeric() {
            out.push(unleeted);
        } else {
            out.push(' ');
        }
    }
    collapse_spaces(&out)
}

fn strip_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}

fn unleet(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '@' => 'a',
        other => other,
    }
}

fn collapse_spaces(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for c in text.trim().chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_message_is_approved() {
        let a = SafetyAnalyzer::default();
        let r = a.analyze("Thanks so much, see you at 3pm!");
        assert_eq!(r.recommendation, Recommendation::Approve);
        assert!(r.flags.is_empty());
        assert_eq!(r.risk_score, 0.0);
    }

    #[test]
    fn single_keyword_hit_sends_to_review() {
        let a = SafetyAnalyzer::default();
        let r = a.analyze("I miss you so much");
        assert_eq!(r.recommendation, Recommendation::Review);
        assert_eq!(r.flags, vec!["KEYWORD:missyou".to_string()]);
        assert!((r.risk_score - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn romantic_escalation_with_address_ask_and_hearts_is_flagged() {
        let a = SafetyAnalyzer::default();
        let r = a.analyze("i luv u, where do u live? \u{2764}\u{2764}\u{2764}\u{2764}");
        assert_eq!(r.flags, vec![
            "KEYWORD:loveyou".to_string(),
            "PATTERN:address".to_string(),
            "EMOJI:romantic_density".to_string(),
        ]);
        assert!((r.risk_score - 0.6).abs() < f64::EPSILON);
        assert_eq!(r.recommendation, Recommendation::Flag);
    }

    #[test]
    fn leet_substitutions_normalize_to_the_same_lemma() {
        let a = SafetyAnalyzer::default();
        let r = a.analyze("1 l0v3 y0u");
        assert_eq!(r.flags, vec!["KEYWORD:loveyou".to_string()]);
    }

    #[test]
    fn diacritics_are_stripped_before_matching() {
        assert_eq!(normalize("Wh\u{e9}re d\u{f2} y\u{f6}u l\u{ee}ve"), "where do you live");
    }

    #[test]
    fn heart_emoji_density_requires_at_least_four() {
        let a = SafetyAnalyzer::default();
        let three = a.analyze("ok \u{2764}\u{2764}\u{2764}");
        assert!(!three.flags.iter().any(|f| f == "EMOJI:romantic_density"));

        let four = a.analyze("ok \u{2764}\u{2764}\u{2764}\u{2764}");
        assert!(four.flags.iter().any(|f| f == "EMOJI:romantic_density"));
    }
}
