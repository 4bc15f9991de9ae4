//! Navigation intents spoken by the user

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Screens the host application can show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Screen {
    Dashboard,
    Transactions,
    Accounts,
    Loans,
    Budget,
    Settings,
}

impl Screen {
    pub const ALL: [Self; 6] = [
        Self::Dashboard,
        Self::Transactions,
        Self::Accounts,
        Self::Loans,
        Self::Budget,
        Self::Settings,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Transactions => "transactions",
            Self::Accounts => "accounts",
            Self::Loans => "loans",
            Self::Budget => "budget",
            Self::Settings => "settings",
        }
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Screen {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|screen| screen.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown screen: {s}"))
    }
}

/// Receives navigation requests
pub trait Navigator: Send + Sync {
    fn navigate(&self, screen: Screen);
}

/// Verbs that turn a mention of a screen into a request to open it
static NAVIGATION_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(show|open|go to|go back to|take me to|navigate to|view|see|display|bring up|switch to)\b")
        .expect("valid regex")
});

static SCREEN_KEYWORDS: LazyLock<Vec<(Screen, Regex)>> = LazyLock::new(|| {
    [
        (Screen::Transactions, r"(?i)\b(transactions?|purchases|spending history|payments)\b"),
        (Screen::Accounts, r"(?i)\b(accounts?|balances?)\b"),
        (Screen::Loans, r"(?i)\b(loans?|mortgages?|debts?)\b"),
        (Screen::Budget, r"(?i)\b(budgets?|budgeting)\b"),
        (Screen::Settings, r"(?i)\b(settings|preferences|profile)\b"),
        (Screen::Dashboard, r"(?i)\b(dashboard|home|overview)\b"),
    ]
    .into_iter()
    .map(|(screen, pattern)| (screen, Regex::new(pattern).expect("valid regex")))
    .collect()
});

/// Screen the user asked to see, if the transcript is a navigation request
///
/// A screen keyword alone is not enough ("what is my balance" stays on the
/// voice screen); it must follow a navigation verb. The earliest keyword
/// after the verb wins.
#[must_use]
pub fn detect_navigation(transcript: &str) -> Option<Screen> {
    let verb = NAVIGATION_VERB.find(transcript)?;
    let rest = &transcript[verb.end()..];

    SCREEN_KEYWORDS
        .iter()
        .filter_map(|(screen, pattern)| pattern.find(rest).map(|m| (m.start(), *screen)))
        .min_by_key(|(start, _)| *start)
        .map(|(_, screen)| screen)
}
