use std::fmt;

use serde::{Deserialize, Serialize};

/// A narrow kind of data a query can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Emails,
    PhoneNumbers,
    Addresses,
    Prices,
    Names,
    Dates,
    Links,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Emails => "emails",
            DataKind::PhoneNumbers => "phone_numbers",
            DataKind::Addresses => "addresses",
            DataKind::Prices => "prices",
            DataKind::Names => "names",
            DataKind::Dates => "dates",
            DataKind::Links => "links",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked top to bottom; the first kind with a matching keyword wins.
const KEYWORDS: &[(DataKind, &[&str])] = &[
    (DataKind::Emails, &["email", "e-mail", "contact"]),
    (DataKind::PhoneNumbers, &["phone", "telephone", "mobile", "cell"]),
    (DataKind::Addresses, &["address", "location", "street"]),
    (DataKind::Prices, &["price", "cost", "fee", "$"]),
    (DataKind::Names, &["name", "person", "people"]),
    (DataKind::Dates, &["date", "time", "when"]),
    (DataKind::Links, &["link", "url", "website"]),
];

/// Maps a free-text query to the data kind it asks for, if any.
pub fn detect(query: &str) -> Option<DataKind> {
    let query = query.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| query.contains(w)))
        .map(|(kind, _)| *kind)
}
