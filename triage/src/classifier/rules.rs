//! Keyword rules for local classification

use crate::category::Category;

/// Per-category keyword lists. Keywords are lowercase substrings; each
/// distinct keyword found adds one point, however often it occurs.
#[derive(Debug, Clone)]
pub struct KeywordRules {
    table: Vec<(Category, Vec<String>)>,
}

/// Score of the best local match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalScore {
    pub category: Category,
    pub score: u32,
}

impl Default for KeywordRules {
    fn default() -> Self {
        Self {
            table: Category::PRIORITY
                .iter()
                .map(|c| (*c, Self::default_keywords(*c)))
                .collect(),
        }
    }
}

impl KeywordRules {
    fn default_keywords(category: Category) -> Vec<String> {
        let words: &[&str] = match category {
            Category::JobOffers => &[
                "job",
                "opportunity",
                "hiring",
                "position",
                "recruiter",
                "recruiting",
                "career",
                "interview",
                "salary",
                "vacancy",
                "candidate",
                "full-time",
                "remote role",
            ],
            Category::Networking => &[
                "connect",
                "network",
                "introduce",
                "introduction",
                "coffee",
                "catch up",
                "meetup",
                "conference",
                "collaborat",
                "mentor",
                "alumni",
                "event",
            ],
            Category::Sales => &[
                "discount",
                "pricing",
                "demo",
                "free trial",
                "product",
                "solution",
                "purchase",
                "quote",
                "subscription",
                "book a call",
                "limited offer",
                "roi",
            ],
            Category::Spam => &[
                "winner",
                "congratulations",
                "prize",
                "lottery",
                "click here",
                "crypto",
                "bitcoin",
                "wire transfer",
                "guaranteed",
                "act now",
                "inheritance",
                "100% free",
            ],
            Category::Other => &[],
        };

        words.iter().map(|w| w.to_string()).collect()
    }

    /// Add keywords to a category. `Other` is never scored and is ignored.
    pub fn extend<I, S>(&mut self, category: Category, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if let Some((_, words)) = self.table.iter_mut().find(|(c, _)| *c == category) {
            for keyword in keywords {
                let keyword = keyword.as_ref().trim().to_lowercase();
                if !keyword.is_empty() && !words.contains(&keyword) {
                    words.push(keyword);
                }
            }
        }
    }

    /// Score every scored category against an already case-folded haystack,
    /// in priority order.
    pub fn scores(&self, haystack: &str) -> Vec<LocalScore> {
        self.table
            .iter()
            .map(|(category, words)| LocalScore {
                category: *category,
                score: words.iter().filter(|w| haystack.contains(w.as_str())).count() as u32,
            })
            .collect()
    }

    /// The strictly highest score; ties go to the earlier category in
    /// priority order. `None` when nothing matched at all.
    pub fn best(&self, haystack: &str) -> Option<LocalScore> {
        let mut best: Option<LocalScore> = None;
        for candidate in self.scores(haystack) {
            if candidate.score == 0 {
                continue;
            }
            match best {
                Some(current) if candidate.score <= current.score => {}
                _ => best = Some(candidate),
            }
        }
        best
    }
}

/// Build the case-folded text the rules are matched against.
pub fn haystack(text: &str, sender: &str, subject: &str) -> String {
    format!("{} {} {}", sender, subject, text).to_lowercase()
}
