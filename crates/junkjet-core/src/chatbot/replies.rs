/// How a rule keyword is compared against the lowercased message.
#[derive(Debug, Clone)]
pub enum Keyword {
    /// Matches anywhere in the message ("plastic" matches "plastics").
    Contains(String),
    /// Matches a whole word only ("hi" does not match "this").
    Word(String),
}

impl Keyword {
    fn matches(&self, lowered: &str) -> bool {
        match self {
            Keyword::Contains(k) => lowered.contains(k.as_str()),
            Keyword::Word(k) => lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| w == k),
        }
    }
}

/// One keyword rule: if any keyword matches, reply with `response`.
#[derive(Debug, Clone)]
pub struct ReplyRule {
    pub intent: String,
    pub keywords: Vec<Keyword>,
    pub response: String,
}

impl ReplyRule {
    pub fn new(intent: &str, keywords: Vec<Keyword>, response: &str) -> Self {
        Self {
            intent: intent.to_string(),
            keywords,
            response: response.to_string(),
        }
    }

    pub fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| k.matches(lowered))
    }
}

/// A selected reply and the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<'a> {
    /// `None` when the fallback was used.
    pub intent: Option<&'a str>,
    pub text: &'a str,
}

/// Ordered keyword rules, evaluated top to bottom, with a catch-all.
#[derive(Debug, Clone)]
pub struct ReplyRules {
    rules: Vec<ReplyRule>,
    fallback: String,
}

const FALLBACK_REPLY: &str = "I can help you buy and sell waste materials on JunkJet. \
Tell me what you have (plastic, metal, electronics, paper) or ask how our three-phase \
marketplace works.";

fn contains(k: &str) -> Keyword {
    Keyword::Contains(k.to_string())
}

fn word(k: &str) -> Keyword {
    Keyword::Word(k.to_string())
}

impl ReplyRules {
    pub fn new(rules: Vec<ReplyRule>, fallback: impl Into<String>) -> Self {
        Self {
            rules,
            fallback: fallback.into(),
        }
    }

    /// The marketplace's built-in rule table.
    pub fn builtin() -> Self {
        let rules = vec![
            ReplyRule::new(
                "plastic",
                vec![contains("plastic"), word("pet"), word("hdpe")],
                "For plastic waste, clean containers thoroughly and separate by type (PET, HDPE, etc.). \
                 This significantly increases their recycling value!",
            ),
            ReplyRule::new(
                "metal",
                vec![contains("metal"), contains("alumin"), contains("copper"), contains("steel")],
                "Metal waste is highly valuable! Separate aluminum, steel, and copper. \
                 Remove any non-metal attachments for better pricing.",
            ),
            ReplyRule::new(
                "electronics",
                vec![contains("electronic"), contains("e-waste"), word("ewaste")],
                "Electronics require special handling. Ensure data is wiped and batteries are removed. \
                 Our certified Phase 2 partners handle e-waste safely.",
            ),
            ReplyRule::new(
                "phases",
                vec![contains("phase")],
                "Our three-phase system connects households (Phase 1) → middle buyers (Phase 2) → \
                 organizations (Phase 3). Which phase would you like to know more about?",
            ),
            ReplyRule::new(
                "pricing",
                vec![contains("price"), word("cost"), word("costs"), contains("worth")],
                "Prices depend on material, quantity and cleanliness. Sorted, clean lots fetch the best \
                 rates; list your items and nearby buyers will send offers.",
            ),
            ReplyRule::new(
                "sell",
                vec![word("sell"), word("selling"), word("list")],
                "To sell, add your waste item with its type and approximate weight. \
                 Middle buyers near your home address will be able to find it.",
            ),
            ReplyRule::new(
                "buy",
                vec![word("buy"), word("buying"), word("purchase")],
                "To buy, browse available waste by material and location, \
                 or tell me what you need and I'll point you to nearby sellers.",
            ),
            ReplyRule::new(
                "greeting",
                vec![word("hello"), word("hi"), word("hey"), word("namaste")],
                "Hello! I'm the JunkJet assistant. Are you looking to sell waste from home, \
                 collect it as a buyer, or source materials in bulk?",
            ),
        ];
        Self::new(rules, FALLBACK_REPLY)
    }

    /// Pick the reply for a message. Never fails: unmatched text gets the fallback.
    pub fn select(&self, message: &str) -> Reply<'_> {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| Reply {
                intent: Some(rule.intent.as_str()),
                text: rule.response.as_str(),
            })
            .unwrap_or(Reply {
                intent: None,
                text: self.fallback.as_str(),
            })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ReplyRules {
    fn default() -> Self {
        Self::builtin()
    }
}
