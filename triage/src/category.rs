//! Conversation categories
//!
//! The category set is closed: remote answers and persisted cache entries are
//! parsed into this enum, and anything that does not parse is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TriageError;

/// Conversation classification categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    /// Recruiters, job offers, interview requests
    JobOffers,
    /// Introductions, invitations to connect or meet
    Networking,
    /// Product pitches, demos, pricing
    Sales,
    /// Scams, prizes, bulk junk
    Spam,
    /// Anything the rules and the remote classifier could not place
    Other,
}

impl Category {
    /// Tie-break order for local scoring. `Other` is never scored.
    pub const PRIORITY: [Category; 4] = [
        Category::JobOffers,
        Category::Networking,
        Category::Sales,
        Category::Spam,
    ];

    pub const ALL: [Category; 5] = [
        Category::JobOffers,
        Category::Networking,
        Category::Sales,
        Category::Spam,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobOffers => "JobOffers",
            Self::Networking => "Networking",
            Self::Sales => "Sales",
            Self::Spam => "Spam",
            Self::Other => "Other",
        }
    }

    /// Human readable label for badges and filter buttons.
    pub fn label(&self) -> &'static str {
        match self {
            Self::JobOffers => "Job Offers",
            Self::Networking => "Networking",
            Self::Sales => "Sales",
            Self::Spam => "Spam",
            Self::Other => "Other",
        }
    }

    /// Parse a category name, ignoring case, spaces, `_` and `-`.
    ///
    /// Returns `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(|c| c.to_lowercase())
            .collect();

        match key.as_str() {
            "joboffers" | "joboffer" => Some(Self::JobOffers),
            "networking" => Some(Self::Networking),
            "sales" => Some(Self::Sales),
            "spam" => Some(Self::Spam),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| TriageError::InvalidCategory(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants() {
        assert_eq!(Category::parse("JobOffers"), Some(Category::JobOffers));
        assert_eq!(Category::parse("job offers"), Some(Category::JobOffers));
        assert_eq!(Category::parse("JOB_OFFERS"), Some(Category::JobOffers));
        assert_eq!(Category::parse("spam"), Some(Category::Spam));
        assert_eq!(Category::parse("Other"), Some(Category::Other));
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert_eq!(Category::parse("newsletter"), None);
        assert_eq!(Category::parse(""), None);
        assert!("Personal".parse::<Category>().is_err());
    }

    #[test]
    fn test_as_str_round_trips_through_serde() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }
}
