//! Rule-based intent classification for inbound SMS replies.
//!
//! Pure function over the message body: no I/O, no state. Each
//! precedence rule is an independently testable predicate and the
//! ordering is fixed — first match wins:
//!
//! 1. opt-out  2. deny phrase / affirm  3. wrong number  4. bare deny
//! 5. price provided  6. ask offer  7. condition info  8. delay  9. noop
//!
//! Ambiguity is never an error; anything unmatched resolves to `Noop`.

use regex::Regex;

use crate::config::Lexicons;

/// Classified purpose of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    OptOut,
    Affirm,
    Deny,
    PriceProvided,
    AskOffer,
    ConditionInfo,
    WrongNumber,
    Delay,
    Noop,
}

impl Intent {
    /// Short label for logging and persistence.
    pub fn label(self) -> &'static str {
        match self {
            Intent::OptOut => "optout",
            Intent::Affirm => "affirm",
            Intent::Deny => "deny",
            Intent::PriceProvided => "price_provided",
            Intent::AskOffer => "ask_offer",
            Intent::ConditionInfo => "condition_info",
            Intent::WrongNumber => "wrong_number",
            Intent::Delay => "delay",
            Intent::Noop => "noop",
        }
    }
}

/// Classification result: the label plus whatever structured data the
/// message carried.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    /// Extracted asking price in whole dollars.
    pub price: Option<i64>,
    /// Condition keywords with a short window of surrounding context.
    pub condition_notes: Vec<String>,
    /// Timeline/postponement text, captured on `Delay`.
    pub timeline: Option<String>,
}

impl Classification {
    fn plain(intent: Intent) -> Self {
        Self {
            intent,
            price: None,
            condition_notes: Vec::new(),
            timeline: None,
        }
    }
}

/// Compiled classifier. Build once from the configured lexicons and
/// reuse across messages.
pub struct Classifier {
    opt_out: Regex,
    affirm: Regex,
    deny_phrase: Option<Regex>,
    deny_word: Regex,
    price_context: Regex,
    phone_context: Regex,
    condition: Regex,
    wrong_number: Regex,
    delay: Regex,
    currency_amount: Regex,
    k_amount: Regex,
    big_number: Regex,
}

/// Half-width of the context window stored around condition keywords.
const CONDITION_WINDOW: usize = 30;

impl Classifier {
    pub fn new(lexicons: &Lexicons) -> Self {
        let deny_phrases: Vec<&str> = lexicons
            .deny
            .iter()
            .filter(|e| e.contains(' '))
            .map(String::as_str)
            .collect();
        let deny_words: Vec<&str> = lexicons
            .deny
            .iter()
            .filter(|e| !e.contains(' '))
            .map(String::as_str)
            .collect();

        Self {
            opt_out: word_set(&lexicons.opt_out),
            affirm: word_set(&lexicons.affirm),
            deny_phrase: if deny_phrases.is_empty() {
                None
            } else {
                Some(word_set_refs(&deny_phrases))
            },
            deny_word: word_set_refs(&deny_words),
            price_context: word_set(&lexicons.price_context),
            phone_context: word_set(&lexicons.phone_context),
            condition: word_set(&lexicons.condition),
            wrong_number: word_set(&lexicons.wrong_number),
            delay: word_set(&lexicons.delay),
            // A currency symbol directly adjacent to a digit.
            currency_amount: Regex::new(r"\$\s?\d[\d,]*(?:\.\d+)?\s?[kK]?").expect("static regex"),
            // A number with a thousand-shorthand suffix: 245k, 85 k.
            k_amount: Regex::new(r"(?i)\b\d+(?:\.\d+)?\s?k\b").expect("static regex"),
            // A four-or-more digit group, or a comma-grouped number.
            big_number: Regex::new(r"\b\d{1,3}(?:,\d{3})+\b|\b\d{4,}\b").expect("static regex"),
        }
    }

    /// Classify an inbound body. Always returns a label; never signals
    /// "no classification".
    pub fn classify(&self, body: &str) -> Classification {
        let text = body.to_lowercase();
        let text = text.trim();
        if text.is_empty() {
            return Classification::plain(Intent::Noop);
        }

        if self.is_opt_out(text) {
            return Classification::plain(Intent::OptOut);
        }

        // Deny phrases ("not interested") outrank bare affirm words so
        // "sure, not interested" reads as a denial.
        if let Some(ref phrases) = self.deny_phrase
            && phrases.is_match(text)
        {
            return Classification::plain(Intent::Deny);
        }
        if self.affirm.is_match(text) {
            return Classification::plain(Intent::Affirm);
        }
        // Wrong-number phrases outrank the bare "no": "no longer own
        // that house" is a disqualifier, not a soft denial.
        if self.wrong_number.is_match(text) {
            return Classification::plain(Intent::WrongNumber);
        }
        if self.deny_word.is_match(text) {
            return Classification::plain(Intent::Deny);
        }

        if self.is_price(text) {
            let mut c = Classification::plain(Intent::PriceProvided);
            c.price = self.extract_price(text);
            // A priced message may also describe condition; keep the
            // notes so nothing is lost to the precedence order.
            c.condition_notes = self.extract_condition_notes(text);
            return c;
        }

        if self.price_context.is_match(text) {
            return Classification::plain(Intent::AskOffer);
        }

        if self.condition.is_match(text) {
            let mut c = Classification::plain(Intent::ConditionInfo);
            c.condition_notes = self.extract_condition_notes(text);
            return c;
        }

        if self.delay.is_match(text) {
            let mut c = Classification::plain(Intent::Delay);
            c.timeline = Some(text.chars().take(200).collect());
            return c;
        }

        Classification::plain(Intent::Noop)
    }

    // ── Predicates ──────────────────────────────────────────────────

    fn is_opt_out(&self, text: &str) -> bool {
        self.opt_out.is_match(text)
    }

    /// Price detection. A relayed phone number must never read as a
    /// price, so the keyword branch is guarded by phone-context words.
    fn is_price(&self, text: &str) -> bool {
        if self.currency_amount.is_match(text) || self.k_amount.is_match(text) {
            return true;
        }
        self.price_context.is_match(text)
            && self.big_number.is_match(text)
            && !self.phone_context.is_match(text)
    }

    // ── Extraction ──────────────────────────────────────────────────

    /// Pull the most plausible dollar amount out of the text.
    fn extract_price(&self, text: &str) -> Option<i64> {
        let candidate = self
            .currency_amount
            .find(text)
            .map(|m| m.as_str())
            .or_else(|| self.k_amount.find(text).map(|m| m.as_str()))
            .or_else(|| self.big_number.find(text).map(|m| m.as_str()))?;

        let has_k = candidate.to_lowercase().trim_end().ends_with('k');
        let numeric: String = candidate
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        let value = numeric.parse::<f64>().ok()?;
        let dollars = if has_k { value * 1000.0 } else { value };
        if dollars <= 0.0 {
            return None;
        }
        Some(dollars.round() as i64)
    }

    /// Short windowed context around each condition-keyword hit.
    fn extract_condition_notes(&self, text: &str) -> Vec<String> {
        let mut notes = Vec::new();
        for m in self.condition.find_iter(text) {
            let start = m.start().saturating_sub(CONDITION_WINDOW);
            let end = (m.end() + CONDITION_WINDOW).min(text.len());
            // Snap to char boundaries so slicing never panics on
            // multi-byte input.
            let start = floor_char_boundary(text, start);
            let end = ceil_char_boundary(text, end);
            notes.push(text[start..end].trim().to_string());
        }
        notes
    }
}

/// Compile a vocabulary into one case-insensitive alternation with
/// whole-word/phrase boundaries. Longer entries go first so phrases
/// win over their own prefixes.
fn word_set(entries: &[String]) -> Regex {
    let refs: Vec<&str> = entries.iter().map(String::as_str).collect();
    word_set_refs(&refs)
}

fn word_set_refs(entries: &[&str]) -> Regex {
    let mut sorted: Vec<&str> = entries.to_vec();
    sorted.sort_by_key(|e| std::cmp::Reverse(e.len()));
    let alternation = sorted
        .iter()
        .map(|e| regex::escape(e))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = if alternation.is_empty() {
        // Never matches; keeps empty vocabularies harmless.
        r"\b\B".to_string()
    } else {
        format!(r"(?i)\b(?:{alternation})\b")
    };
    Regex::new(&pattern).expect("vocabulary entries escape to valid regex")
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(&Lexicons::default())
    }

    fn intent_of(body: &str) -> Intent {
        classifier().classify(body).intent
    }

    // ── Opt-out boundaries ──────────────────────────────────────────

    #[test]
    fn standalone_stop_is_optout() {
        assert_eq!(intent_of("STOP"), Intent::OptOut);
        assert_eq!(intent_of("please stop texting me"), Intent::OptOut);
        assert_eq!(intent_of("remove me from your list"), Intent::OptOut);
        assert_eq!(intent_of("I want to opt out"), Intent::OptOut);
    }

    #[test]
    fn embedded_optout_substrings_do_not_trigger() {
        // "end" inside "weekend", "stop" inside "unstoppable".
        assert_ne!(intent_of("maybe this weekend works"), Intent::OptOut);
        assert_ne!(intent_of("the market is unstoppable"), Intent::OptOut);
        // "cancel" inside "cancellation" has a word boundary issue only
        // if matching were substring-based.
        assert_ne!(
            intent_of("what is your cancellation policy"),
            Intent::OptOut
        );
    }

    #[test]
    fn optout_outranks_everything() {
        assert_eq!(intent_of("yes but stop texting"), Intent::OptOut);
        assert_eq!(intent_of("stop. asking $200k btw"), Intent::OptOut);
    }

    // ── Affirm / deny boundaries ────────────────────────────────────

    #[test]
    fn affirm_on_whole_word_only() {
        assert_eq!(intent_of("yes"), Intent::Affirm);
        assert_eq!(intent_of("Yeah that's me"), Intent::Affirm);
        // "yesterday" contains "yes" but must not affirm.
        assert_ne!(intent_of("we spoke yesterday"), Intent::Affirm);
    }

    #[test]
    fn deny_words_and_phrases() {
        assert_eq!(intent_of("no"), Intent::Deny);
        assert_eq!(intent_of("nope"), Intent::Deny);
        assert_eq!(intent_of("not interested"), Intent::Deny);
        assert_eq!(intent_of("we are not selling"), Intent::Deny);
    }

    #[test]
    fn deny_phrase_outranks_bare_affirm_word() {
        assert_eq!(intent_of("sure, but not interested"), Intent::Deny);
    }

    // ── Price vs phone number ───────────────────────────────────────

    #[test]
    fn currency_adjacent_digit_is_price() {
        let c = classifier().classify("$245k");
        assert_eq!(c.intent, Intent::PriceProvided);
        assert_eq!(c.price, Some(245_000));
    }

    #[test]
    fn k_suffix_is_price() {
        let c = classifier().classify("we'd take 185k");
        assert_eq!(c.intent, Intent::PriceProvided);
        assert_eq!(c.price, Some(185_000));
    }

    #[test]
    fn keyword_with_large_number_is_price() {
        let c = classifier().classify("asking 250,000 for it");
        assert_eq!(c.intent, Intent::PriceProvided);
        assert_eq!(c.price, Some(250_000));
    }

    #[test]
    fn phone_context_blocks_keyword_price() {
        // "call" + digits must not read as an asking price.
        assert_ne!(
            intent_of("best price talk - call me at 555-123-4567"),
            Intent::PriceProvided
        );
        assert_ne!(
            intent_of("you can reach my asking agent at 5551234567"),
            Intent::PriceProvided
        );
    }

    #[test]
    fn plain_phone_number_is_not_price() {
        assert_ne!(intent_of("call me at 555-123-4567"), Intent::PriceProvided);
    }

    #[test]
    fn price_decimal_amounts() {
        let c = classifier().classify("$249.5k maybe");
        assert_eq!(c.intent, Intent::PriceProvided);
        assert_eq!(c.price, Some(249_500));
    }

    #[test]
    fn priced_message_keeps_condition_notes() {
        let c = classifier().classify("asking $200k, roof is two years old");
        assert_eq!(c.intent, Intent::PriceProvided);
        assert!(!c.condition_notes.is_empty());
        assert!(c.condition_notes[0].contains("roof"));
    }

    // ── Ask offer ───────────────────────────────────────────────────

    #[test]
    fn price_keyword_without_number_is_ask_offer() {
        assert_eq!(intent_of("how much would you offer"), Intent::AskOffer);
        assert_eq!(intent_of("what's your price"), Intent::AskOffer);
        assert_eq!(intent_of("what is it worth to you"), Intent::AskOffer);
    }

    // ── Condition ───────────────────────────────────────────────────

    #[test]
    fn condition_keywords_with_context_window() {
        let c = classifier().classify("the roof needs work and there's a tenant in place");
        assert_eq!(c.intent, Intent::ConditionInfo);
        assert!(c.condition_notes.len() >= 2);
        assert!(c.condition_notes.iter().any(|n| n.contains("roof")));
        assert!(c.condition_notes.iter().any(|n| n.contains("tenant")));
    }

    #[test]
    fn condition_window_survives_multibyte_text() {
        let c = classifier().classify("déjà vu — the hvac is brand new ✨✨");
        assert_eq!(c.intent, Intent::ConditionInfo);
        assert!(c.condition_notes[0].contains("hvac"));
    }

    // ── Wrong number ────────────────────────────────────────────────

    #[test]
    fn wrong_number_phrases() {
        assert_eq!(intent_of("you have the wrong number"), Intent::WrongNumber);
        assert_eq!(intent_of("that property is not mine"), Intent::WrongNumber);
        assert_eq!(intent_of("i sold that place years ago"), Intent::WrongNumber);
    }

    #[test]
    fn no_longer_own_outranks_bare_no() {
        // "no" alone is a soft denial; an ownership disqualifier in
        // the same breath must win.
        assert_eq!(
            intent_of("no longer own that house"),
            Intent::WrongNumber
        );
        assert_eq!(intent_of("no, i dont own it anymore"), Intent::WrongNumber);
        assert_eq!(intent_of("no"), Intent::Deny);
    }

    #[test]
    fn new_contact_number_is_not_wrong_number() {
        // Someone relaying a new number is still the right person.
        assert_ne!(
            intent_of("this is my new number, use it going forward"),
            Intent::WrongNumber
        );
    }

    // ── Delay ───────────────────────────────────────────────────────

    #[test]
    fn delay_captures_timeline() {
        let c = classifier().classify("Busy this month, try me next week");
        assert_eq!(c.intent, Intent::Delay);
        assert!(c.timeline.as_deref().unwrap().contains("next week"));
    }

    // ── Default ─────────────────────────────────────────────────────

    #[test]
    fn unmatched_text_is_noop_never_error() {
        assert_eq!(intent_of("k"), Intent::Noop);
        assert_eq!(intent_of("???"), Intent::Noop);
        assert_eq!(intent_of(""), Intent::Noop);
        assert_eq!(intent_of("who is this"), Intent::Noop);
    }

    // ── Custom vocabularies ─────────────────────────────────────────

    #[test]
    fn alternate_lexicon_is_honored() {
        let lex = Lexicons {
            opt_out: vec!["basta".to_string()],
            ..Lexicons::default()
        };
        let clf = Classifier::new(&lex);
        assert_eq!(clf.classify("basta").intent, Intent::OptOut);
        // Default vocabulary no longer applies.
        assert_ne!(clf.classify("stop").intent, Intent::OptOut);
    }

    #[test]
    fn empty_vocabulary_never_matches() {
        let lex = Lexicons {
            delay: Vec::new(),
            ..Lexicons::default()
        };
        let clf = Classifier::new(&lex);
        assert_eq!(clf.classify("later").intent, Intent::Noop);
    }
}
